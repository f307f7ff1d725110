//! Fixed-length history/horizon windows per series for sequence models.

use ndarray::{Array2, Array3, ShapeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::loader::{DATE_COLUMN, LOCATION_COLUMN, PRODUCT_COLUMN, TARGET_COLUMN};
use crate::table::{Table, TableError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub history: usize,
    pub horizon: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            history: 60,
            horizon: 15,
        }
    }
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("invalid sequence config: {0}")]
    InvalidConfig(String),
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("array shape error: {0}")]
    Shape(#[from] ShapeError),
}

/// Stacked windows: `features` is `(n, history, F)`, `targets` is
/// `(n, horizon)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSet {
    pub features: Array3<f32>,
    pub targets: Array2<f32>,
    pub feature_columns: Vec<String>,
}

impl SequenceSet {
    pub fn len(&self) -> usize {
        self.targets.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Windows available in a series of `len` rows.
pub fn window_count(len: usize, history: usize, horizon: usize) -> usize {
    (len + 1).saturating_sub(history + horizon)
}

/// Every numeric column except the date and the target, in table order.
pub fn window_feature_columns(table: &Table) -> Vec<String> {
    table
        .columns()
        .iter()
        .filter(|c| c.name != DATE_COLUMN && c.name != TARGET_COLUMN)
        .filter(|c| c.data.column_type().is_numeric())
        .map(|c| c.name.clone())
        .collect()
}

pub fn build_sequences(table: &Table, cfg: &SequenceConfig) -> Result<SequenceSet, SequenceError> {
    if cfg.history == 0 || cfg.horizon == 0 {
        return Err(SequenceError::InvalidConfig(
            "history and horizon must be > 0".to_string(),
        ));
    }

    let feature_columns = window_feature_columns(table);
    let feature_count = feature_columns.len();
    let columns = feature_columns
        .iter()
        .map(|name| table.require(name).map(|c| &c.data))
        .collect::<Result<Vec<_>, _>>()?;
    let target = table.floats(TARGET_COLUMN)?;

    let null_cell = |column: &str, row: usize| TableError::NullValue {
        table: table.name().to_string(),
        column: column.to_string(),
        row,
    };

    let groups = table.group_rows(LOCATION_COLUMN, PRODUCT_COLUMN, DATE_COLUMN)?;
    let mut features = Vec::new();
    let mut targets = Vec::new();
    let mut windows = 0usize;

    for group in &groups {
        let count = window_count(group.rows.len(), cfg.history, cfg.horizon);
        for start in cfg.history..cfg.history + count {
            for row in &group.rows[start - cfg.history..start] {
                for (name, data) in feature_columns.iter().zip(&columns) {
                    let value = data
                        .numeric_value(*row)
                        .ok_or_else(|| null_cell(name.as_str(), *row))?;
                    features.push(value as f32);
                }
            }
            for row in &group.rows[start..start + cfg.horizon] {
                let value = target[*row].ok_or_else(|| null_cell(TARGET_COLUMN, *row))?;
                targets.push(value as f32);
            }
        }
        windows += count;
    }

    let features = Array3::from_shape_vec((windows, cfg.history, feature_count), features)?;
    let targets = Array2::from_shape_vec((windows, cfg.horizon), targets)?;

    info!(
        component = "sequences",
        event = "sequences.built",
        table = table.name(),
        series = groups.len(),
        windows,
        history = cfg.history,
        horizon = cfg.horizon,
        features = feature_count
    );

    Ok(SequenceSet {
        features,
        targets,
        feature_columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnData;
    use chrono::NaiveDate;

    fn series(n: usize) -> Table {
        let start = NaiveDate::from_ymd_opt(2016, 1, 1).unwrap();
        let mut table = Table::new("train");
        table
            .push_column(
                DATE_COLUMN,
                ColumnData::Date((0..n).map(|i| start + chrono::Days::new(i as u64)).collect()),
            )
            .unwrap();
        table
            .push_column(LOCATION_COLUMN, ColumnData::Int(vec![Some(1); n]))
            .unwrap();
        table
            .push_column(PRODUCT_COLUMN, ColumnData::Str(vec![Some("BREAD".into()); n]))
            .unwrap();
        table
            .push_column(
                TARGET_COLUMN,
                ColumnData::Float((0..n).map(|i| Some(i as f64)).collect()),
            )
            .unwrap();
        table
            .push_column(
                "lag_1",
                ColumnData::Float((0..n).map(|i| Some(100.0 + i as f64)).collect()),
            )
            .unwrap();
        table
            .push_column("city", ColumnData::Str(vec![Some("Quito".into()); n]))
            .unwrap();
        table
    }

    #[test]
    fn window_count_matches_history_and_horizon() {
        assert_eq!(window_count(10, 3, 2), 6);
        assert_eq!(window_count(5, 3, 2), 1);
        assert_eq!(window_count(4, 3, 2), 0);
        assert_eq!(window_count(0, 3, 2), 0);
    }

    #[test]
    fn windows_align_features_and_targets() {
        let table = series(10);
        let cfg = SequenceConfig {
            history: 3,
            horizon: 2,
        };
        let set = build_sequences(&table, &cfg).unwrap();

        assert_eq!(set.feature_columns, vec![LOCATION_COLUMN, "lag_1"]);
        assert_eq!(set.features.shape(), &[6, 3, 2]);
        assert_eq!(set.targets.shape(), &[6, 2]);

        // First window: history rows 0..3, targets rows 3..5.
        assert_eq!(set.features[[0, 0, 1]], 100.0);
        assert_eq!(set.features[[0, 2, 1]], 102.0);
        assert_eq!(set.targets[[0, 0]], 3.0);
        assert_eq!(set.targets[[0, 1]], 4.0);
        // Last window ends on the last row.
        assert_eq!(set.targets[[5, 1]], 9.0);
    }

    #[test]
    fn short_or_empty_tables_give_empty_arrays() {
        let cfg = SequenceConfig {
            history: 3,
            horizon: 2,
        };
        let set = build_sequences(&series(4), &cfg).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.features.shape(), &[0, 3, 2]);
        assert_eq!(set.targets.shape(), &[0, 2]);

        let empty = build_sequences(&series(0), &cfg).unwrap();
        assert_eq!(empty.features.shape(), &[0, 3, 2]);
    }

    #[test]
    fn null_feature_cell_is_rejected() {
        let mut table = series(6);
        table.floats_mut("lag_1").unwrap()[0] = None;
        let cfg = SequenceConfig {
            history: 3,
            horizon: 2,
        };
        assert!(matches!(
            build_sequences(&table, &cfg),
            Err(SequenceError::Table(TableError::NullValue { .. }))
        ));
    }
}
