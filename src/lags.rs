//! Per-series lag and trailing-window statistics of the target.
//!
//! Every statistic for row `i` of a series is computed from rows strictly
//! before `i`: lags look `L` steps back, and rolling windows read the buffer
//! before the current value is pushed into it.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::loader::{DATE_COLUMN, LOCATION_COLUMN, PRODUCT_COLUMN, TARGET_COLUMN};
use crate::table::{ColumnData, Table, TableError};

pub const IS_ZERO_COLUMN: &str = "is_zero";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagConfig {
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
}

impl Default for LagConfig {
    fn default() -> Self {
        Self {
            lags: vec![7, 14, 28],
            rolling_windows: vec![7, 28],
        }
    }
}

impl LagConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_offsets("lags", &self.lags)?;
        validate_offsets("rolling_windows", &self.rolling_windows)
    }

    /// Names of the emitted columns, in emission order.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lags.iter().map(|l| format!("lag_{l}")).collect();
        for w in &self.rolling_windows {
            names.push(format!("roll_mean_{w}"));
            names.push(format!("roll_std_{w}"));
        }
        names.push(IS_ZERO_COLUMN.to_string());
        names
    }
}

fn validate_offsets(field: &str, values: &[usize]) -> Result<(), String> {
    if values.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    let mut seen = HashSet::new();
    for value in values {
        if *value == 0 {
            return Err(format!("{field} entries must be > 0"));
        }
        if !seen.insert(*value) {
            return Err(format!("{field} entries must be unique"));
        }
    }
    Ok(())
}

/// Fixed-capacity buffer of the most recent values of one series.
#[derive(Debug, Clone)]
pub(crate) struct TrailingWindow {
    values: VecDeque<Option<f64>>,
    capacity: usize,
}

impl TrailingWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, value: Option<f64>) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    /// All buffered values, once the window is full and holds no gaps.
    fn full(&self) -> Option<Vec<f64>> {
        if self.capacity == 0 || self.values.len() < self.capacity {
            return None;
        }
        self.values.iter().copied().collect()
    }

    pub(crate) fn mean(&self) -> Option<f64> {
        let window = self.full()?;
        Some(window.iter().sum::<f64>() / window.len() as f64)
    }

    /// Sample standard deviation (n - 1 denominator).
    pub(crate) fn sample_std(&self) -> Option<f64> {
        let window = self.full()?;
        if window.len() < 2 {
            return None;
        }
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let variance = window
            .iter()
            .map(|v| {
                let d = *v - mean;
                d * d
            })
            .sum::<f64>()
            / (window.len() - 1) as f64;
        Some(variance.sqrt())
    }
}

pub fn add_lag_features(table: &mut Table, cfg: &LagConfig) -> Result<(), TableError> {
    let groups = table.group_rows(LOCATION_COLUMN, PRODUCT_COLUMN, DATE_COLUMN)?;
    let target = table.floats(TARGET_COLUMN)?.to_vec();
    let rows = table.len();

    for lag in &cfg.lags {
        let mut out = vec![None; rows];
        for group in &groups {
            for (pos, row) in group.rows.iter().enumerate().skip(*lag) {
                out[*row] = target[group.rows[pos - lag]];
            }
        }
        table.push_column(format!("lag_{lag}"), ColumnData::Float(out))?;
    }

    for window_size in &cfg.rolling_windows {
        let mut means = vec![None; rows];
        let mut stds = vec![None; rows];
        for group in &groups {
            let mut window = TrailingWindow::new(*window_size);
            for row in &group.rows {
                means[*row] = window.mean();
                stds[*row] = window.sample_std();
                window.push(target[*row]);
            }
        }
        table.push_column(format!("roll_mean_{window_size}"), ColumnData::Float(means))?;
        table.push_column(format!("roll_std_{window_size}"), ColumnData::Float(stds))?;
    }

    let is_zero = target
        .iter()
        .map(|v| Some(i64::from(*v == Some(0.0))))
        .collect();
    table.push_column(IS_ZERO_COLUMN, ColumnData::Int(is_zero))?;

    info!(
        component = "lags",
        event = "lags.features.added",
        series = groups.len(),
        lags = ?cfg.lags,
        rolling_windows = ?cfg.rolling_windows
    );
    Ok(())
}
