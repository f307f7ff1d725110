mod common;

use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use salesprep::{
    add_calendar_features, load_raw, log_app_start, log_artifact_written, log_stage_finish,
    preprocess_data, ColumnData, LoggingConfig, PipelineConfig, Table, DATE_COLUMN,
};
use tempfile::tempdir;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

#[test]
fn pipeline_run_emits_stage_events() {
    let data = tempdir().unwrap();
    let out = tempdir().unwrap();
    common::write_fixture(data.path());

    let logs = capture_logs(Level::INFO, || {
        let cfg = PipelineConfig {
            data_dir: data.path().to_path_buf(),
            out_dir: out.path().to_path_buf(),
            lags: vec![7],
            rolling_windows: vec![7],
            ..PipelineConfig::default()
        };
        preprocess_data(&cfg).expect("fixture run should succeed");
    });

    for event in [
        "pipeline.start",
        "loader.source.loaded",
        "cleaning.duplicates_removed",
        "cleaning.finish",
        "external.merge.finish",
        "lags.features.added",
        "pipeline.incomplete_rows.dropped",
        "scaling.fit",
        "split.finish",
        "export.parquet.written",
        "export.scalers.written",
        "pipeline.finish",
    ] {
        assert!(
            logs.contains(&format!("\"event\":\"{event}\"")),
            "missing {event}"
        );
    }
    assert!(logs.contains("\"dropped\":14"));
    assert!(!logs.contains("\"event\":\"export.sequences.written\""));
}

#[test]
fn debug_events_are_filtered_at_info() {
    let build = || {
        let mut table = Table::new("train");
        table
            .push_column(DATE_COLUMN, ColumnData::Date(vec![common::start_date()]))
            .expect("date column should push");
        add_calendar_features(&mut table).expect("calendar features should build");
        let missing = tempdir().expect("tempdir should create");
        assert!(load_raw(&missing.path().join("absent")).is_err());
    };

    let info_logs = capture_logs(Level::INFO, build);
    assert!(!info_logs.contains("\"event\":\"calendar.features.added\""));
    assert!(!info_logs.contains("\"event\":\"loader.dir.absent\""));

    let debug_logs = capture_logs(Level::DEBUG, build);
    assert!(debug_logs.contains("\"event\":\"calendar.features.added\""));
    assert!(debug_logs.contains("\"event\":\"loader.dir.absent\""));
}

#[test]
fn lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start(&cfg, Path::new("data/raw"), Path::new("data/processed"));
        log_stage_finish("clean", 10, Duration::from_millis(5));
        log_artifact_written(Path::new("data/processed/train.parquet"));
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"pipeline.stage.finish\""));
    assert!(logs.contains("\"stage\":\"clean\""));
    assert!(logs.contains("\"event\":\"artifact.written\""));
}
