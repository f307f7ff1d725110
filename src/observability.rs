//! Logging for a preprocessing run.
//!
//! The `preprocess` binary installs the subscriber from `SALESPREP_LOG_*`
//! before building the pipeline config. Every stage then emits events with
//! a `component` and a dotted `event` name (`loader.source.loaded`,
//! `pipeline.stage.finish`, `export.parquet.written`, ...), and the helpers
//! below cover the run-level milestones.

use std::env;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_ENV: &str = "SALESPREP_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "SALESPREP_LOG_FORMAT";
pub const LOG_TARGET_ENV: &str = "SALESPREP_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Unparseable format or target values keep their defaults.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var(LOG_LEVEL_ENV) {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Ok(format) = env::var(LOG_FORMAT_ENV) {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var(LOG_TARGET_ENV) {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

/// First event of a run, before any source is read.
pub fn log_app_start(config: &LoggingConfig, data_dir: &Path, out_dir: &Path) {
    info!(
        component = "preprocess",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target,
        data_dir = %data_dir.display(),
        out_dir = %out_dir.display()
    );
}

/// One per pipeline stage; `rows` is the table length after the stage.
pub fn log_stage_finish(stage: &str, rows: usize, elapsed: Duration) {
    info!(
        component = "pipeline",
        event = "pipeline.stage.finish",
        stage,
        rows,
        elapsed_ms = elapsed.as_millis() as u64
    );
}

/// Emitted once per file after the whole artifact batch is committed.
pub fn log_artifact_written(path: &Path) {
    info!(
        component = "preprocess",
        event = "artifact.written",
        path = %path.display()
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
