//! Calendar features derived from the date column.

use std::f64::consts::PI;

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::loader::DATE_COLUMN;
use crate::table::{ColumnData, Table, TableError};

pub const CALENDAR_COLUMNS: [&str; 8] = [
    "year",
    "month",
    "dow",
    "weekofyr",
    "dow_sin",
    "dow_cos",
    "month_sin",
    "month_cos",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarFeatures {
    pub year: i64,
    pub month: i64,
    pub dow: i64,
    pub week_of_year: i64,
    pub dow_sin: f64,
    pub dow_cos: f64,
    pub month_sin: f64,
    pub month_cos: f64,
}

impl CalendarFeatures {
    /// Day of week counts from Monday = 0; week of year is ISO-8601.
    pub fn from_date(date: NaiveDate) -> Self {
        let month = date.month() as i64;
        let dow = date.weekday().num_days_from_monday() as i64;
        let (dow_sin, dow_cos) = cyclical_encoding(dow as f64, 7.0);
        let (month_sin, month_cos) = cyclical_encoding(month as f64, 12.0);

        Self {
            year: date.year() as i64,
            month,
            dow,
            week_of_year: date.iso_week().week() as i64,
            dow_sin,
            dow_cos,
            month_sin,
            month_cos,
        }
    }
}

pub fn cyclical_encoding(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.sin(), angle.cos())
}

pub fn add_calendar_features(table: &mut Table) -> Result<(), TableError> {
    let features: Vec<CalendarFeatures> = table
        .dates(DATE_COLUMN)?
        .iter()
        .map(|date| CalendarFeatures::from_date(*date))
        .collect();

    let ints = |f: fn(&CalendarFeatures) -> i64| {
        ColumnData::Int(features.iter().map(|c| Some(f(c))).collect())
    };
    let floats = |f: fn(&CalendarFeatures) -> f64| {
        ColumnData::Float(features.iter().map(|c| Some(f(c))).collect())
    };

    table.push_column("year", ints(|c| c.year))?;
    table.push_column("month", ints(|c| c.month))?;
    table.push_column("dow", ints(|c| c.dow))?;
    table.push_column("weekofyr", ints(|c| c.week_of_year))?;
    table.push_column("dow_sin", floats(|c| c.dow_sin))?;
    table.push_column("dow_cos", floats(|c| c.dow_cos))?;
    table.push_column("month_sin", floats(|c| c.month_sin))?;
    table.push_column("month_cos", floats(|c| c.month_cos))?;

    debug!(
        component = "calendar",
        event = "calendar.features.added",
        rows = table.len()
    );
    Ok(())
}
