//! Joins the auxiliary series onto the primary table.
//!
//! Every join is a left join keyed by date or location, so the primary row
//! count never changes here.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::lags::TrailingWindow;
use crate::loader::{RawSources, DATE_COLUMN, LOCATION_COLUMN};
use crate::table::{ColumnData, Table, TableError};

pub const PRICE_COLUMN: &str = "dcoilwtico";
pub const PRICE_MEAN_COLUMN: &str = "oil_ma30";
pub const PRICE_CHANGE_COLUMN: &str = "oil_pct_7";
pub const HOLIDAY_COLUMN: &str = "is_natl_holiday";
pub const TRANSACTIONS_COLUMN: &str = "transactions";

const PRICE_MEAN_WINDOW: usize = 30;
const PRICE_CHANGE_PERIOD: usize = 7;
const TRANSACTIONS_MEAN_WINDOW: usize = 7;
const NATIONAL_LOCALE: &str = "National";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub price_calendar_days: usize,
    pub price_observed_days: usize,
    pub holiday_dates: usize,
    pub transaction_dates: usize,
    pub unmatched_locations: usize,
}

/// Daily price calendar with its derived statistics, indexed by day offset
/// from `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCalendar {
    pub start: NaiveDate,
    pub price: Vec<Option<f64>>,
    pub trailing_mean: Vec<Option<f64>>,
    pub pct_change: Vec<Option<f64>>,
}

impl PriceCalendar {
    fn offset(&self, date: NaiveDate) -> Option<usize> {
        let days = (date - self.start).num_days();
        usize::try_from(days).ok().filter(|d| *d < self.price.len())
    }
}

pub fn merge_external(table: &mut Table, raw: &RawSources) -> Result<MergeReport, TableError> {
    let dates = table.dates(DATE_COLUMN)?.to_vec();

    let calendar = build_price_calendar(&dates, &raw.oil)?;
    let price_observed_days = raw.oil.floats(PRICE_COLUMN)?.iter().flatten().count();
    let lookup = |values: &[Option<f64>]| -> ColumnData {
        ColumnData::Float(
            dates
                .iter()
                .map(|d| calendar.offset(*d).and_then(|idx| values[idx]))
                .collect(),
        )
    };
    table.push_column(PRICE_COLUMN, lookup(&calendar.price))?;
    table.push_column(PRICE_MEAN_COLUMN, lookup(&calendar.trailing_mean))?;
    table.push_column(PRICE_CHANGE_COLUMN, lookup(&calendar.pct_change))?;

    let holidays = national_holidays(&raw.holidays)?;
    table.push_column(
        HOLIDAY_COLUMN,
        ColumnData::Int(
            dates
                .iter()
                .map(|d| Some(i64::from(holidays.contains(d))))
                .collect(),
        ),
    )?;

    let smoothed = smoothed_transactions(&raw.transactions)?;
    table.push_column(
        TRANSACTIONS_COLUMN,
        ColumnData::Float(fill_transactions(&dates, &smoothed)),
    )?;

    let unmatched_locations = join_locations(table, &raw.stores)?;

    let report = MergeReport {
        price_calendar_days: calendar.price.len(),
        price_observed_days,
        holiday_dates: holidays.len(),
        transaction_dates: smoothed.len(),
        unmatched_locations,
    };

    if unmatched_locations > 0 {
        warn!(
            component = "external",
            event = "external.locations.unmatched",
            rows = unmatched_locations
        );
    }
    info!(
        component = "external",
        event = "external.merge.finish",
        price_calendar_days = report.price_calendar_days,
        price_observed_days = report.price_observed_days,
        holiday_dates = report.holiday_dates,
        transaction_dates = report.transaction_dates
    );

    Ok(report)
}

/// Reindexes the price series to a complete daily calendar spanning both the
/// primary dates and the observed price dates, then fills every gap.
pub fn build_price_calendar(
    primary_dates: &[NaiveDate],
    oil: &Table,
) -> Result<PriceCalendar, TableError> {
    let oil_dates = oil.dates(DATE_COLUMN)?;
    let oil_prices = oil.floats(PRICE_COLUMN)?;

    let bounds = primary_dates
        .iter()
        .chain(oil_dates)
        .fold(None, |acc: Option<(NaiveDate, NaiveDate)>, d| match acc {
            None => Some((*d, *d)),
            Some((lo, hi)) => Some((lo.min(*d), hi.max(*d))),
        });
    let Some((start, end)) = bounds else {
        return Ok(PriceCalendar {
            start: NaiveDate::MIN,
            price: Vec::new(),
            trailing_mean: Vec::new(),
            pct_change: Vec::new(),
        });
    };

    let days = (end - start).num_days() as usize + 1;
    let mut price = vec![None; days];
    let mut assigned = vec![false; days];
    for (date, value) in oil_dates.iter().zip(oil_prices) {
        let idx = (*date - start).num_days() as usize;
        if !assigned[idx] {
            price[idx] = *value;
            assigned[idx] = true;
        }
    }

    fill_gaps(&mut price);

    let mut window = TrailingWindow::new(PRICE_MEAN_WINDOW);
    let trailing_mean = price
        .iter()
        .map(|value| {
            window.push(*value);
            window.mean()
        })
        .collect();
    let pct_change = pct_change(&price, PRICE_CHANGE_PERIOD);

    Ok(PriceCalendar {
        start,
        price,
        trailing_mean,
        pct_change,
    })
}

/// Linear interpolation between known points, then constant extension at
/// both edges. A series with no known point is left untouched.
pub fn fill_gaps(values: &mut [Option<f64>]) {
    let known: Vec<usize> = (0..values.len()).filter(|i| values[*i].is_some()).collect();
    let (Some(&first), Some(&last)) = (known.first(), known.last()) else {
        return;
    };

    for pair in known.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if hi - lo < 2 {
            continue;
        }
        let (Some(a), Some(b)) = (values[lo], values[hi]) else {
            continue;
        };
        let span = (hi - lo) as f64;
        for idx in lo + 1..hi {
            values[idx] = Some(a + (b - a) * (idx - lo) as f64 / span);
        }
    }

    let head = values[first];
    values[..first].iter_mut().for_each(|v| *v = head);
    let tail = values[last];
    values[last + 1..].iter_mut().for_each(|v| *v = tail);
}

/// `p[t] / p[t - period] - 1`; undefined without a non-zero base.
pub fn pct_change(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|idx| {
            let base = values[idx.checked_sub(period)?]?;
            let current = values[idx]?;
            if base == 0.0 {
                None
            } else {
                Some(current / base - 1.0)
            }
        })
        .collect()
}

/// Dates carrying at least one national, non-transferred holiday.
pub fn national_holidays(holidays: &Table) -> Result<HashSet<NaiveDate>, TableError> {
    let dates = holidays.dates(DATE_COLUMN)?;
    let locales = holidays.strs("locale")?;
    let transferred = holidays.bools("transferred")?;

    Ok(dates
        .iter()
        .zip(locales)
        .zip(transferred)
        .filter(|((_, locale), moved)| {
            locale.as_deref() == Some(NATIONAL_LOCALE) && **moved == Some(false)
        })
        .map(|((date, _), _)| *date)
        .collect())
}

/// Transactions summed over all locations per date, then averaged over the
/// trailing seven observed dates.
pub fn smoothed_transactions(
    transactions: &Table,
) -> Result<BTreeMap<NaiveDate, Option<f64>>, TableError> {
    let dates = transactions.dates(DATE_COLUMN)?;
    let counts = transactions.floats(TRANSACTIONS_COLUMN)?;

    let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (date, count) in dates.iter().zip(counts) {
        *totals.entry(*date).or_insert(0.0) += count.unwrap_or(0.0);
    }

    let mut window = TrailingWindow::new(TRANSACTIONS_MEAN_WINDOW);
    Ok(totals
        .into_iter()
        .map(|(date, total)| {
            window.push(Some(total));
            (date, window.mean())
        })
        .collect())
}

/// Smoothed transactions per primary row, forward-filled along ascending
/// primary dates and zero where nothing precedes.
fn fill_transactions(
    dates: &[NaiveDate],
    smoothed: &BTreeMap<NaiveDate, Option<f64>>,
) -> Vec<Option<f64>> {
    let distinct: BTreeSet<NaiveDate> = dates.iter().copied().collect();
    let mut last = None;
    let mut filled = HashMap::with_capacity(distinct.len());
    for date in distinct {
        if let Some(value) = smoothed.get(&date).copied().flatten() {
            last = Some(value);
        }
        filled.insert(date, last.unwrap_or(0.0));
    }
    dates.iter().map(|d| filled.get(d).copied()).collect()
}

/// Appends every non-key location column; returns the number of primary
/// rows without a matching location.
fn join_locations(table: &mut Table, stores: &Table) -> Result<usize, TableError> {
    let mut by_location = HashMap::new();
    for (idx, location) in stores.ints(LOCATION_COLUMN)?.iter().enumerate() {
        if let Some(location) = location {
            by_location.entry(*location).or_insert(idx);
        }
    }

    let matches: Vec<Option<usize>> = table
        .ints(LOCATION_COLUMN)?
        .iter()
        .map(|location| location.and_then(|l| by_location.get(&l).copied()))
        .collect();
    let unmatched = matches.iter().filter(|m| m.is_none()).count();

    let joined = stores.gather(&matches)?;
    for column in joined.columns() {
        if column.name == LOCATION_COLUMN {
            continue;
        }
        table.push_column(column.name.clone(), column.data.clone())?;
    }
    Ok(unmatched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 1, 1).unwrap() + chrono::Days::new(offset)
    }

    fn oil(points: &[(u64, Option<f64>)]) -> Table {
        let mut table = Table::new("oil");
        table
            .push_column(
                DATE_COLUMN,
                ColumnData::Date(points.iter().map(|p| day(p.0)).collect()),
            )
            .unwrap();
        table
            .push_column(
                PRICE_COLUMN,
                ColumnData::Float(points.iter().map(|p| p.1).collect()),
            )
            .unwrap();
        table
    }

    #[test]
    fn fill_gaps_interpolates_interior_and_extends_edges() {
        let mut values = vec![None, Some(1.0), None, None, Some(4.0), None];
        fill_gaps(&mut values);
        assert_eq!(
            values,
            vec![Some(1.0), Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(4.0)]
        );

        let mut empty = vec![None, None];
        fill_gaps(&mut empty);
        assert_eq!(empty, vec![None, None]);
    }

    #[test]
    fn price_calendar_spans_primary_and_price_dates() {
        let oil = oil(&[(2, Some(10.0)), (4, None), (6, Some(14.0))]);
        let primary = [day(0), day(9)];
        let calendar = build_price_calendar(&primary, &oil).unwrap();

        assert_eq!(calendar.start, day(0));
        assert_eq!(calendar.price.len(), 10);
        assert!(calendar.price.iter().all(Option::is_some));
        assert_eq!(calendar.price[0], Some(10.0));
        assert_eq!(calendar.price[4], Some(12.0));
        assert_eq!(calendar.price[9], Some(14.0));
        assert!(calendar.trailing_mean.iter().all(Option::is_none));
        assert_eq!(&calendar.pct_change[..7], &[None; 7]);
        assert_eq!(calendar.pct_change[7], Some(14.0 / 10.0 - 1.0));
    }

    #[test]
    fn pct_change_skips_zero_base() {
        let values = [Some(0.0), Some(2.0), Some(3.0)];
        assert_eq!(pct_change(&values, 1), vec![None, None, Some(0.5)]);
    }

    #[test]
    fn national_holidays_ignore_local_and_transferred() {
        let mut holidays = Table::new("holidays_events");
        holidays
            .push_column(
                DATE_COLUMN,
                ColumnData::Date(vec![day(0), day(0), day(1), day(2)]),
            )
            .unwrap();
        holidays
            .push_column(
                "locale",
                ColumnData::Str(
                    ["National", "National", "Local", "National"]
                        .iter()
                        .map(|s| Some(s.to_string()))
                        .collect(),
                ),
            )
            .unwrap();
        holidays
            .push_column(
                "transferred",
                ColumnData::Bool(vec![Some(false), Some(false), Some(false), Some(true)]),
            )
            .unwrap();

        let flags = national_holidays(&holidays).unwrap();
        assert_eq!(flags.len(), 1);
        assert!(flags.contains(&day(0)));
    }

    #[test]
    fn transactions_are_summed_smoothed_and_filled() {
        let mut tx = Table::new("transactions");
        let mut dates = Vec::new();
        let mut counts = Vec::new();
        for d in 0..8u64 {
            for store in 0..2 {
                dates.push(day(d));
                counts.push(Some(10.0 * (d + 1) as f64 + store as f64));
            }
        }
        tx.push_column(DATE_COLUMN, ColumnData::Date(dates)).unwrap();
        tx.push_column(TRANSACTIONS_COLUMN, ColumnData::Float(counts))
            .unwrap();

        let smoothed = smoothed_transactions(&tx).unwrap();
        assert_eq!(smoothed.len(), 8);
        assert_eq!(smoothed[&day(5)], None);
        // Daily totals are 20(d+1) + 1; days 0..=6 average to 81.
        assert_eq!(smoothed[&day(6)], Some(81.0));
        assert_eq!(smoothed[&day(7)], Some(101.0));

        let primary = [day(0), day(7), day(9), day(7)];
        let filled = fill_transactions(&primary, &smoothed);
        assert_eq!(filled, vec![Some(0.0), Some(101.0), Some(101.0), Some(101.0)]);
    }

    fn stores(columns: &[(&str, [&str; 2])]) -> Table {
        let mut stores = Table::new("stores");
        stores
            .push_column(LOCATION_COLUMN, ColumnData::Int(vec![Some(1), Some(2)]))
            .unwrap();
        for (name, values) in columns {
            stores
                .push_column(
                    *name,
                    ColumnData::Str(values.iter().map(|v| Some(v.to_string())).collect()),
                )
                .unwrap();
        }
        stores
    }

    fn primary(locations: &[i64]) -> Table {
        let mut table = Table::new("train");
        table
            .push_column(
                LOCATION_COLUMN,
                ColumnData::Int(locations.iter().map(|l| Some(*l)).collect()),
            )
            .unwrap();
        table
            .push_column(
                crate::loader::PRODUCT_COLUMN,
                ColumnData::Str(vec![Some("EGGS".to_string()); locations.len()]),
            )
            .unwrap();
        table
    }

    #[test]
    fn unknown_location_joins_as_nulls_and_is_counted() {
        let mut table = primary(&[1, 3, 2, 3]);
        let stores = stores(&[("city", ["Quito", "Guayaquil"])]);

        let unmatched = join_locations(&mut table, &stores).unwrap();
        assert_eq!(unmatched, 2);
        assert_eq!(table.len(), 4);
        assert_eq!(
            table.strs("city").unwrap(),
            &[
                Some("Quito".to_string()),
                None,
                Some("Guayaquil".to_string()),
                None
            ]
        );

        assert_eq!(table.drop_incomplete_rows(), 2);
        assert_eq!(table.ints(LOCATION_COLUMN).unwrap(), &[Some(1), Some(2)]);
    }

    #[test]
    fn location_column_clashing_with_primary_is_rejected() {
        let mut table = primary(&[1, 2]);
        let stores = stores(&[(crate::loader::PRODUCT_COLUMN, ["X", "Y"])]);

        let err = join_locations(&mut table, &stores).unwrap_err();
        assert!(matches!(
            err,
            TableError::DuplicateColumn { ref column, .. } if column == crate::loader::PRODUCT_COLUMN
        ));
    }
}
