//! Primary-key deduplication and upper-tail clipping of the target.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::loader::{DATE_COLUMN, LOCATION_COLUMN, PRODUCT_COLUMN, TARGET_COLUMN};
use crate::table::{Table, TableError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanReport {
    pub input_rows: usize,
    pub duplicates_removed: usize,
    pub clip_upper: Option<f64>,
    pub values_clipped: usize,
}

/// Drops primary-key duplicates (first occurrence wins) and clips the target
/// at the `clip_quantile` of the deduplicated table.
pub fn clean_primary(table: Table, clip_quantile: f64) -> Result<(Table, CleanReport), TableError> {
    let input_rows = table.len();
    let (mut table, duplicates_removed) = drop_duplicate_keys(table)?;

    info!(
        component = "cleaning",
        event = "cleaning.duplicates_removed",
        input_rows,
        duplicates_removed
    );

    let clip_upper = quantile(table.floats(TARGET_COLUMN)?, clip_quantile);
    let mut values_clipped = 0usize;
    if let Some(upper) = clip_upper {
        for value in table.floats_mut(TARGET_COLUMN)?.iter_mut().flatten() {
            if *value > upper {
                *value = upper;
                values_clipped += 1;
            }
        }
    }

    info!(
        component = "cleaning",
        event = "cleaning.finish",
        output_rows = table.len(),
        clip_quantile,
        clip_upper = ?clip_upper,
        values_clipped
    );

    Ok((
        table,
        CleanReport {
            input_rows,
            duplicates_removed,
            clip_upper,
            values_clipped,
        },
    ))
}

fn drop_duplicate_keys(table: Table) -> Result<(Table, usize), TableError> {
    let dates = table.dates(DATE_COLUMN)?;
    let locations = table.ints(LOCATION_COLUMN)?;
    let products = table.strs(PRODUCT_COLUMN)?;

    let mut seen = HashSet::with_capacity(table.len());
    let mut keep = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        if seen.insert((dates[row], locations[row], products[row].as_deref())) {
            keep.push(row);
        }
    }

    let removed = table.len() - keep.len();
    if removed == 0 {
        return Ok((table, 0));
    }
    Ok((table.take(&keep), removed))
}

/// Linear-interpolated quantile over the non-null values; `None` when the
/// column holds no values.
pub fn quantile(values: &[Option<f64>], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().flatten().copied().collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}
