//! Standard scaling of float columns and the persisted scaler registry.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::loader::DATE_COLUMN;
use crate::table::{ColumnType, Table, TableError};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingScope {
    /// Statistics over every row of the cleaned table.
    #[default]
    FullTable,
    /// Statistics over rows dated on or before the train threshold only.
    TrainOnly,
}

impl ScalingScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullTable => "full",
            Self::TrainOnly => "train",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" | "full_table" => Some(Self::FullTable),
            "train" | "train_only" => Some(Self::TrainOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

#[derive(Debug, Error)]
pub enum ScalingError {
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("column `{column}` has no values to fit a scaler on")]
    EmptyFit { column: String },
    #[error("no scaler registered for column `{0}`")]
    UnknownColumn(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// Per-column mean and population standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: f64,
    pub scale: f64,
    pub var: f64,
    pub n_samples_seen: usize,
}

impl StandardScaler {
    /// Fits over the non-null values; `None` when there are none. A zero or
    /// non-finite deviation gives a unit scale.
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a Option<f64>>) -> Option<Self> {
        let observed: Vec<f64> = values.into_iter().flatten().copied().collect();
        if observed.is_empty() {
            return None;
        }
        let n = observed.len() as f64;
        let mean = observed.iter().sum::<f64>() / n;
        let var = observed
            .iter()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        let scale = if std.is_finite() && std > 0.0 { std } else { 1.0 };

        Some(Self {
            mean,
            scale,
            var,
            n_samples_seen: observed.len(),
        })
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.mean) / self.scale
    }

    pub fn inverse_transform(&self, value: f64) -> f64 {
        value * self.scale + self.mean
    }
}

/// Fitted scalers for every float column, keyed by column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerRegistry {
    pub schema_version: u32,
    pub fingerprint: String,
    pub scope: ScalingScope,
    pub scalers: BTreeMap<String, StandardScaler>,
}

impl ScalerRegistry {
    /// Fits one scaler per float column of `table`. Under `TrainOnly` only rows
    /// dated on or before `train_end` contribute.
    pub fn fit(
        table: &Table,
        scope: ScalingScope,
        train_end: NaiveDate,
    ) -> Result<Self, ScalingError> {
        let fit_rows: Vec<usize> = match scope {
            ScalingScope::FullTable => (0..table.len()).collect(),
            ScalingScope::TrainOnly => table
                .dates(DATE_COLUMN)?
                .iter()
                .enumerate()
                .filter(|(_, d)| **d <= train_end)
                .map(|(row, _)| row)
                .collect(),
        };

        let mut scalers = BTreeMap::new();
        for name in table.float_column_names() {
            let values = table.floats(&name)?;
            let scaler = StandardScaler::fit(fit_rows.iter().map(|row| &values[*row]))
                .ok_or_else(|| ScalingError::EmptyFit {
                    column: name.clone(),
                })?;
            scalers.insert(name, scaler);
        }

        let schema = feature_schema(table);
        info!(
            component = "scaling",
            event = "scaling.fit",
            scope = scope.as_str(),
            fit_rows = fit_rows.len(),
            columns = scalers.len(),
            fingerprint = %schema.fingerprint
        );

        Ok(Self {
            schema_version: schema.version,
            fingerprint: schema.fingerprint,
            scope,
            scalers,
        })
    }

    /// Rewrites every registered column of `table` as `(x - mean) / scale`.
    pub fn apply(&self, table: &mut Table) -> Result<(), ScalingError> {
        for (name, scaler) in &self.scalers {
            for value in table.floats_mut(name)?.iter_mut().flatten() {
                *value = scaler.transform(*value);
            }
        }
        Ok(())
    }

    pub fn scaler(&self, column: &str) -> Result<&StandardScaler, ScalingError> {
        self.scalers
            .get(column)
            .ok_or_else(|| ScalingError::UnknownColumn(column.to_string()))
    }

    pub fn inverse_transform(&self, column: &str, value: f64) -> Result<f64, ScalingError> {
        Ok(self.scaler(column)?.inverse_transform(value))
    }

    pub fn to_json(&self) -> Result<String, ScalingError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ScalingError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ScalingError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

pub fn feature_schema(table: &Table) -> FeatureSchema {
    let columns: Vec<FeatureColumn> = table
        .schema()
        .into_iter()
        .map(|(name, dtype)| FeatureColumn { name, dtype })
        .collect();
    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint: schema_fingerprint(FEATURE_SCHEMA_VERSION, &columns),
        columns,
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), ScalingError> {
    if expected_version != actual.version {
        return Err(ScalingError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(ScalingError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{};", column.dtype));
    }
    hex::encode(hasher.finalize())
}
