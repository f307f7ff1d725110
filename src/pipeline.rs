//! End-to-end preprocessing: load, clean, derive features, scale, split,
//! window and persist.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::calendar::add_calendar_features;
use crate::cleaning::{clean_primary, CleanReport};
use crate::export::{ArtifactBatch, ExportError, SCALERS_FILE, SEQUENCE_ARCHIVE_FILE};
use crate::external::{merge_external, MergeReport};
use crate::lags::{add_lag_features, LagConfig};
use crate::loader::{load_raw, LoadError, RawSources};
use crate::observability::{log_artifact_written, log_stage_finish, parse_bool};
use crate::scaling::{ScalerRegistry, ScalingError, ScalingScope};
use crate::sequences::{build_sequences, SequenceConfig, SequenceError, SequenceSet};
use crate::split::{chrono_split, Partition, Partitions, SplitThresholds};
use crate::table::TableError;

pub const DATA_DIR_ENV: &str = "SALESPREP_DATA_DIR";
pub const OUT_DIR_ENV: &str = "SALESPREP_OUT_DIR";
pub const LAGS_ENV: &str = "SALESPREP_LAGS";
pub const ROLLING_WINDOWS_ENV: &str = "SALESPREP_ROLLING_WINDOWS";
pub const SEQ_HISTORY_ENV: &str = "SALESPREP_SEQ_HISTORY";
pub const SEQ_HORIZON_ENV: &str = "SALESPREP_SEQ_HORIZON";
pub const TRAIN_END_ENV: &str = "SALESPREP_TRAIN_END";
pub const VAL_END_ENV: &str = "SALESPREP_VAL_END";
pub const BUILD_SEQUENCES_ENV: &str = "SALESPREP_BUILD_SEQUENCES";
pub const SCALING_SCOPE_ENV: &str = "SALESPREP_SCALING_SCOPE";
pub const CLIP_QUANTILE_ENV: &str = "SALESPREP_CLIP_QUANTILE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    pub sequence_history: usize,
    pub sequence_horizon: usize,
    pub train_end: NaiveDate,
    pub val_end: NaiveDate,
    pub build_sequences: bool,
    pub scaling_scope: ScalingScope,
    pub clip_quantile: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let lags = LagConfig::default();
        let sequences = SequenceConfig::default();
        Self {
            data_dir: PathBuf::from("data/raw"),
            out_dir: PathBuf::from("data/processed"),
            lags: lags.lags,
            rolling_windows: lags.rolling_windows,
            sequence_history: sequences.history,
            sequence_horizon: sequences.horizon,
            train_end: NaiveDate::from_ymd_opt(2016, 12, 31).unwrap_or(NaiveDate::MIN),
            val_end: NaiveDate::from_ymd_opt(2017, 6, 30).unwrap_or(NaiveDate::MAX),
            build_sequences: false,
            scaling_scope: ScalingScope::FullTable,
            clip_quantile: 0.999,
        }
    }
}

impl PipelineConfig {
    pub fn lag_config(&self) -> LagConfig {
        LagConfig {
            lags: self.lags.clone(),
            rolling_windows: self.rolling_windows.clone(),
        }
    }

    pub fn sequence_config(&self) -> SequenceConfig {
        SequenceConfig {
            history: self.sequence_history,
            horizon: self.sequence_horizon,
        }
    }

    pub fn thresholds(&self) -> SplitThresholds {
        SplitThresholds {
            train_end: self.train_end,
            val_end: self.val_end,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lag_config().validate().map_err(ConfigError::Invalid)?;
        self.thresholds().validate().map_err(ConfigError::Invalid)?;
        if self.sequence_history == 0 || self.sequence_horizon == 0 {
            return Err(ConfigError::Invalid(
                "sequence_history and sequence_horizon must be > 0".to_string(),
            ));
        }
        if !(self.clip_quantile > 0.0 && self.clip_quantile <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "clip_quantile must be in (0, 1], got {}",
                self.clip_quantile
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("schema error: {0}")]
    Table(#[from] TableError),
    #[error(transparent)]
    Scaling(#[from] ScalingError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Overlays `SALESPREP_*` variables on the defaults. A variable that is set
/// but does not parse fails the whole load.
pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default();

    if let Some(raw) = env_value(DATA_DIR_ENV) {
        config.data_dir = PathBuf::from(raw);
    }
    if let Some(raw) = env_value(OUT_DIR_ENV) {
        config.out_dir = PathBuf::from(raw);
    }
    if let Some(raw) = env_value(LAGS_ENV) {
        config.lags = parse_list(LAGS_ENV, &raw)?;
    }
    if let Some(raw) = env_value(ROLLING_WINDOWS_ENV) {
        config.rolling_windows = parse_list(ROLLING_WINDOWS_ENV, &raw)?;
    }
    if let Some(raw) = env_value(SEQ_HISTORY_ENV) {
        config.sequence_history = parse_value(SEQ_HISTORY_ENV, &raw)?;
    }
    if let Some(raw) = env_value(SEQ_HORIZON_ENV) {
        config.sequence_horizon = parse_value(SEQ_HORIZON_ENV, &raw)?;
    }
    if let Some(raw) = env_value(TRAIN_END_ENV) {
        config.train_end = parse_value(TRAIN_END_ENV, &raw)?;
    }
    if let Some(raw) = env_value(VAL_END_ENV) {
        config.val_end = parse_value(VAL_END_ENV, &raw)?;
    }
    if let Some(raw) = env_value(BUILD_SEQUENCES_ENV) {
        config.build_sequences = parse_bool(&raw).ok_or_else(|| ConfigError::InvalidEnv {
            var: BUILD_SEQUENCES_ENV,
            value: raw.clone(),
            reason: "expected a boolean".to_string(),
        })?;
    }
    if let Some(raw) = env_value(SCALING_SCOPE_ENV) {
        config.scaling_scope =
            ScalingScope::parse(&raw).ok_or_else(|| ConfigError::InvalidEnv {
                var: SCALING_SCOPE_ENV,
                value: raw.clone(),
                reason: "expected `full` or `train`".to_string(),
            })?;
    }
    if let Some(raw) = env_value(CLIP_QUANTILE_ENV) {
        config.clip_quantile = parse_value(CLIP_QUANTILE_ENV, &raw)?;
    }

    Ok(config)
}

fn env_value(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|err| ConfigError::InvalidEnv {
        var,
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

fn parse_list(var: &'static str, raw: &str) -> Result<Vec<usize>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_value(var, part))
        .collect()
}

/// Windows for each partition, built independently.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceArrays {
    pub train: SequenceSet,
    pub validation: SequenceSet,
    pub test: SequenceSet,
}

impl SequenceArrays {
    pub fn get(&self, partition: Partition) -> &SequenceSet {
        match partition {
            Partition::Train => &self.train,
            Partition::Validation => &self.validation,
            Partition::Test => &self.test,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub clean: CleanReport,
    pub merge: MergeReport,
    pub rows_before_drop: usize,
    pub incomplete_rows_dropped: usize,
    pub train_rows: usize,
    pub val_rows: usize,
    pub test_rows: usize,
    pub sequence_windows: Option<[usize; 3]>,
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub partitions: Partitions,
    pub registry: ScalerRegistry,
    pub sequences: Option<SequenceArrays>,
    pub report: PipelineReport,
}

/// Runs every in-memory stage over already-loaded sources. Nothing is
/// written to disk.
pub fn transform_sources(
    raw: &RawSources,
    cfg: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    cfg.validate()?;

    let started = Instant::now();
    let (mut table, clean) = clean_primary(raw.train.clone(), cfg.clip_quantile)?;
    log_stage_finish("clean", table.len(), started.elapsed());

    let started = Instant::now();
    add_calendar_features(&mut table)?;
    log_stage_finish("calendar", table.len(), started.elapsed());

    let started = Instant::now();
    let merge = merge_external(&mut table, raw)?;
    log_stage_finish("external", table.len(), started.elapsed());

    let started = Instant::now();
    add_lag_features(&mut table, &cfg.lag_config())?;
    log_stage_finish("lags", table.len(), started.elapsed());

    let rows_before_drop = table.len();
    let incomplete_rows_dropped = table.drop_incomplete_rows();
    if incomplete_rows_dropped > 0 {
        warn!(
            component = "pipeline",
            event = "pipeline.incomplete_rows.dropped",
            rows_before = rows_before_drop,
            dropped = incomplete_rows_dropped,
            remaining = table.len()
        );
    }

    let started = Instant::now();
    let registry = ScalerRegistry::fit(&table, cfg.scaling_scope, cfg.train_end)?;
    registry.apply(&mut table)?;
    log_stage_finish("scaling", table.len(), started.elapsed());

    let partitions = chrono_split(&table, &cfg.thresholds())?;

    let sequences = if cfg.build_sequences {
        let started = Instant::now();
        let seq_cfg = cfg.sequence_config();
        let arrays = SequenceArrays {
            train: build_sequences(&partitions.train, &seq_cfg)?,
            validation: build_sequences(&partitions.validation, &seq_cfg)?,
            test: build_sequences(&partitions.test, &seq_cfg)?,
        };
        log_stage_finish(
            "sequences",
            arrays.train.len() + arrays.validation.len() + arrays.test.len(),
            started.elapsed(),
        );
        Some(arrays)
    } else {
        None
    };

    let report = PipelineReport {
        clean,
        merge,
        rows_before_drop,
        incomplete_rows_dropped,
        train_rows: partitions.train.len(),
        val_rows: partitions.validation.len(),
        test_rows: partitions.test.len(),
        sequence_windows: sequences
            .as_ref()
            .map(|s| [s.train.len(), s.validation.len(), s.test.len()]),
        artifacts: Vec::new(),
    };

    Ok(PipelineOutput {
        partitions,
        registry,
        sequences,
        report,
    })
}

/// Loads the sources from `cfg.data_dir`, transforms them and writes every
/// artifact into `cfg.out_dir`. Nothing is written unless all stages succeed.
pub fn preprocess_data(cfg: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    let started = Instant::now();
    info!(
        component = "pipeline",
        event = "pipeline.start",
        data_dir = %cfg.data_dir.display(),
        out_dir = %cfg.out_dir.display(),
        scaling_scope = cfg.scaling_scope.as_str(),
        build_sequences = cfg.build_sequences
    );

    cfg.validate()?;
    let raw = load_raw(&cfg.data_dir)?;
    let mut output = transform_sources(&raw, cfg)?;
    output.report.artifacts = persist(&output, &cfg.out_dir)?;

    info!(
        component = "pipeline",
        event = "pipeline.finish",
        train_rows = output.report.train_rows,
        val_rows = output.report.val_rows,
        test_rows = output.report.test_rows,
        incomplete_rows_dropped = output.report.incomplete_rows_dropped,
        artifacts = output.report.artifacts.len(),
        elapsed_ms = started.elapsed().as_millis() as u64
    );
    Ok(output)
}

/// Encodes every artifact before touching `out_dir`, then commits them as
/// one batch.
fn persist(output: &PipelineOutput, out_dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let mut batch = ArtifactBatch::default();
    for partition in Partition::ALL {
        batch.add_parquet(
            output.partitions.get(partition),
            &out_dir.join(partition.file_name()),
        )?;
    }
    batch.add_registry(&output.registry, &out_dir.join(SCALERS_FILE))?;
    if let Some(arrays) = &output.sequences {
        let sets: Vec<(Partition, &SequenceSet)> = Partition::ALL
            .iter()
            .map(|p| (*p, arrays.get(*p)))
            .collect();
        batch.add_sequence_archive(&sets, &out_dir.join(SEQUENCE_ARCHIVE_FILE))?;
    }

    let written = batch.commit()?;
    for path in &written {
        log_artifact_written(path);
    }
    Ok(written)
}
