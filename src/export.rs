//! Persisted artifacts: partition files, the sequence archive and the scaler
//! registry. Every file lands under its final name through a rename.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::Datelike;
use ndarray_npy::{WriteNpyError, WriteNpyExt};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use thiserror::Error;
use tracing::{info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::scaling::ScalerRegistry;
use crate::sequences::SequenceSet;
use crate::split::Partition;
use crate::table::{ColumnData, ColumnType, Table};

pub const SCALERS_FILE: &str = "scalers.json";
pub const SEQUENCE_ARCHIVE_FILE: &str = "lstm_data.npz";

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid output path: {0}")]
    InvalidPath(String),
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
    #[error("npy error: {0}")]
    Npy(#[from] WriteNpyError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn arrow_data_type(dtype: ColumnType) -> DataType {
    match dtype {
        ColumnType::Date => DataType::Date32,
        ColumnType::Int => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::Bool => DataType::Boolean,
        ColumnType::Str => DataType::Utf8,
    }
}

pub fn to_record_batch(table: &Table) -> Result<RecordBatch, ExportError> {
    let fields: Vec<Field> = table
        .columns()
        .iter()
        .map(|c| {
            let dtype = c.data.column_type();
            Field::new(&c.name, arrow_data_type(dtype), dtype != ColumnType::Date)
        })
        .collect();

    let arrays: Vec<ArrayRef> = table
        .columns()
        .iter()
        .map(|c| -> ArrayRef {
            match &c.data {
                ColumnData::Date(v) => Arc::new(Date32Array::from(
                    v.iter()
                        .map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
                        .collect::<Vec<i32>>(),
                )),
                ColumnData::Int(v) => Arc::new(Int64Array::from(v.clone())),
                ColumnData::Float(v) => Arc::new(Float64Array::from(v.clone())),
                ColumnData::Bool(v) => Arc::new(BooleanArray::from(v.clone())),
                ColumnData::Str(v) => Arc::new(StringArray::from(v.clone())),
            }
        })
        .collect();

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Encodes `table` as a single Snappy-compressed Parquet row group.
pub fn encode_parquet(table: &Table) -> Result<Vec<u8>, ExportError> {
    let batch = to_record_batch(table)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
    }
    Ok(buffer)
}

/// Encodes `X_<partition>` and `y_<partition>` float32 arrays for each entry
/// into one deflate-compressed `.npz` archive.
pub fn encode_sequence_archive(sets: &[(Partition, &SequenceSet)]) -> Result<Vec<u8>, ExportError> {
    let entry_options =
        || SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    for (partition, set) in sets {
        zip.start_file(format!("X_{}.npy", partition.as_str()), entry_options())?;
        set.features.write_npy(&mut zip)?;
        zip.start_file(format!("y_{}.npy", partition.as_str()), entry_options())?;
        set.targets.write_npy(&mut zip)?;
    }
    Ok(zip.finish()?.into_inner())
}

pub fn write_parquet(table: &Table, path: &Path) -> Result<(), ExportError> {
    let mut batch = ArtifactBatch::default();
    batch.add_parquet(table, path)?;
    batch.commit()?;
    Ok(())
}

pub fn write_sequence_archive(
    path: &Path,
    sets: &[(Partition, &SequenceSet)],
) -> Result<(), ExportError> {
    let mut batch = ArtifactBatch::default();
    batch.add_sequence_archive(sets, path)?;
    batch.commit()?;
    Ok(())
}

pub fn write_registry(registry: &ScalerRegistry, path: &Path) -> Result<(), ExportError> {
    let mut batch = ArtifactBatch::default();
    batch.add_registry(registry, path)?;
    batch.commit()?;
    Ok(())
}

#[derive(Debug)]
struct StagedArtifact {
    path: PathBuf,
    bytes: Vec<u8>,
    event: &'static str,
    items: usize,
}

/// Encoded artifacts that land on disk together. A failed commit leaves
/// none of them under its final name and no `.tmp` files behind.
#[derive(Debug, Default)]
pub struct ArtifactBatch {
    staged: Vec<StagedArtifact>,
}

impl ArtifactBatch {
    pub fn add_parquet(&mut self, table: &Table, path: &Path) -> Result<(), ExportError> {
        let bytes = encode_parquet(table)?;
        self.push(path, bytes, "export.parquet.written", table.len());
        Ok(())
    }

    pub fn add_registry(&mut self, registry: &ScalerRegistry, path: &Path) -> Result<(), ExportError> {
        let bytes = serde_json::to_vec_pretty(registry)?;
        self.push(path, bytes, "export.scalers.written", registry.scalers.len());
        Ok(())
    }

    pub fn add_sequence_archive(
        &mut self,
        sets: &[(Partition, &SequenceSet)],
        path: &Path,
    ) -> Result<(), ExportError> {
        let bytes = encode_sequence_archive(sets)?;
        let windows = sets.iter().map(|(_, s)| s.len()).sum();
        self.push(path, bytes, "export.sequences.written", windows);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    fn push(&mut self, path: &Path, bytes: Vec<u8>, event: &'static str, items: usize) {
        self.staged.push(StagedArtifact {
            path: path.to_path_buf(),
            bytes,
            event,
            items,
        });
    }

    /// Writes every artifact to its `.tmp` sibling, then renames them all
    /// into place. Returns the final paths in insertion order.
    pub fn commit(self) -> Result<Vec<PathBuf>, ExportError> {
        let mut tmp_paths = Vec::with_capacity(self.staged.len());
        for artifact in &self.staged {
            match stage_tmp(&artifact.path, &artifact.bytes) {
                Ok(tmp) => tmp_paths.push(tmp),
                Err(err) => {
                    discard(&tmp_paths);
                    return Err(err);
                }
            }
        }

        let mut committed = Vec::with_capacity(self.staged.len());
        for (idx, (artifact, tmp)) in self.staged.iter().zip(&tmp_paths).enumerate() {
            if let Err(err) = fs::rename(tmp, &artifact.path) {
                discard(&committed);
                discard(&tmp_paths[idx..]);
                warn!(
                    component = "export",
                    event = "export.commit.rolled_back",
                    path = %artifact.path.display(),
                    staged = self.staged.len(),
                    error = %err
                );
                return Err(err.into());
            }
            committed.push(artifact.path.clone());
        }

        for artifact in &self.staged {
            info!(
                component = "export",
                event = artifact.event,
                path = %artifact.path.display(),
                items = artifact.items,
                bytes = artifact.bytes.len()
            );
        }
        Ok(committed)
    }
}

/// Writes next to `path` under a `.tmp` suffix, syncs, then renames over
/// `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let tmp_path = stage_tmp(path, bytes)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        discard(&[tmp_path]);
        return Err(err.into());
    }
    Ok(())
}

fn stage_tmp(path: &Path, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| ExportError::InvalidPath(path.display().to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let written = fs::File::create(&tmp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    match written {
        Ok(()) => Ok(tmp_path),
        Err(err) => {
            if tmp_path.is_file() {
                discard(&[tmp_path]);
            }
            Err(err.into())
        }
    }
}

/// Best-effort removal; the original error is what the caller reports.
fn discard(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}
