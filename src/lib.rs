//! Store-sales preprocessing crate.
//!
//! Turns the raw store-sales CSV sources into model-ready artifacts:
//! - cleaned, feature-enriched and scaled train/val/test partitions (Parquet)
//! - the fitted scaler registry (JSON)
//! - optional fixed-length history/horizon windows (`.npz`)

mod calendar;
mod cleaning;
mod export;
mod external;
mod lags;
mod loader;
mod metrics;
mod observability;
mod pipeline;
mod scaling;
mod sequences;
mod split;
mod table;

pub use calendar::{add_calendar_features, cyclical_encoding, CalendarFeatures, CALENDAR_COLUMNS};
pub use cleaning::{clean_primary, quantile, CleanReport};
pub use export::{
    arrow_data_type, encode_parquet, encode_sequence_archive, to_record_batch, write_atomic,
    write_parquet, write_registry, write_sequence_archive, ArtifactBatch, ExportError,
    SCALERS_FILE, SEQUENCE_ARCHIVE_FILE,
};
pub use external::{
    build_price_calendar, fill_gaps, merge_external, national_holidays, pct_change,
    smoothed_transactions, MergeReport, PriceCalendar, HOLIDAY_COLUMN, PRICE_CHANGE_COLUMN,
    PRICE_COLUMN, PRICE_MEAN_COLUMN, TRANSACTIONS_COLUMN,
};
pub use lags::{add_lag_features, LagConfig, IS_ZERO_COLUMN};
pub use loader::{
    load_raw, load_source, parse_date, LoadError, RawSources, SourceKind, DATE_COLUMN,
    LOCATION_COLUMN, PRODUCT_COLUMN, TARGET_COLUMN,
};
pub use metrics::{mae, mape, nwrmsle, rmse, rmsle, smape, summary, MetricsError, DEFAULT_EPS};
pub use observability::{
    init_logging, log_app_start, log_artifact_written, log_stage_finish,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    pipeline_config_from_env, preprocess_data, transform_sources, ConfigError, PipelineConfig,
    PipelineError, PipelineOutput, PipelineReport, SequenceArrays,
};
pub use scaling::{
    assert_schema_compatible, feature_schema, FeatureColumn, FeatureSchema, ScalerRegistry,
    ScalingError, ScalingScope, StandardScaler, FEATURE_SCHEMA_VERSION,
};
pub use sequences::{
    build_sequences, window_count, window_feature_columns, SequenceConfig, SequenceError,
    SequenceSet,
};
pub use split::{assign_partition, chrono_split, Partition, Partitions, SplitThresholds};
pub use table::{Column, ColumnData, ColumnType, SeriesGroup, SeriesKey, Table, TableError};
