//! Raw CSV source loading for the six store-sales tables.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::table::{ColumnData, ColumnType, Table, TableError};

pub const DATE_COLUMN: &str = "date";
pub const LOCATION_COLUMN: &str = "store_nbr";
pub const PRODUCT_COLUMN: &str = "family";
pub const TARGET_COLUMN: &str = "sales";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Train,
    Test,
    Stores,
    Oil,
    Holidays,
    Transactions,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        Self::Train,
        Self::Test,
        Self::Stores,
        Self::Oil,
        Self::Holidays,
        Self::Transactions,
    ];

    pub fn file_stem(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
            Self::Stores => "stores",
            Self::Oil => "oil",
            Self::Holidays => "holidays_events",
            Self::Transactions => "transactions",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.csv", self.file_stem())
    }

    fn date_column(self) -> Option<&'static str> {
        match self {
            Self::Stores => None,
            _ => Some(DATE_COLUMN),
        }
    }

    fn required_columns(self) -> &'static [(&'static str, ColumnType)] {
        match self {
            Self::Train => &[
                (DATE_COLUMN, ColumnType::Date),
                (LOCATION_COLUMN, ColumnType::Int),
                (PRODUCT_COLUMN, ColumnType::Str),
                (TARGET_COLUMN, ColumnType::Float),
            ],
            Self::Test => &[
                (DATE_COLUMN, ColumnType::Date),
                (LOCATION_COLUMN, ColumnType::Int),
                (PRODUCT_COLUMN, ColumnType::Str),
            ],
            Self::Stores => &[(LOCATION_COLUMN, ColumnType::Int)],
            Self::Oil => &[(DATE_COLUMN, ColumnType::Date), ("dcoilwtico", ColumnType::Float)],
            Self::Holidays => &[
                (DATE_COLUMN, ColumnType::Date),
                ("locale", ColumnType::Str),
                ("transferred", ColumnType::Bool),
            ],
            Self::Transactions => &[
                (DATE_COLUMN, ColumnType::Date),
                ("transactions", ColumnType::Float),
            ],
        }
    }

    fn non_null_columns(self) -> &'static [&'static str] {
        match self {
            Self::Train | Self::Test => &[LOCATION_COLUMN, PRODUCT_COLUMN],
            Self::Stores => &[LOCATION_COLUMN],
            _ => &[],
        }
    }
}

/// The six raw tables, as read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSources {
    pub train: Table,
    pub test: Table,
    pub stores: Table,
    pub oil: Table,
    pub holidays: Table,
    pub transactions: Table,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("missing required sources in {}: {}", .dir.display(), .missing.join(", "))]
    MissingSources { dir: PathBuf, missing: Vec<String> },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error in {source_name}: {error}")]
    Csv {
        source_name: String,
        error: csv::Error,
    },
    #[error("failed to parse {source_name}.{column} row {row} value '{value}'")]
    ParseField {
        source_name: String,
        column: String,
        row: usize,
        value: String,
    },
    #[error("schema error: {0}")]
    Schema(#[from] TableError),
}

/// Loads all six sources from `dir`. Every absent file is reported, not just
/// the first one.
pub fn load_raw(dir: &Path) -> Result<RawSources, LoadError> {
    let found = source_paths(dir)?;
    let missing: Vec<String> = SourceKind::ALL
        .iter()
        .filter(|kind| !found.contains_key(kind.file_stem()))
        .map(|kind| kind.file_stem().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(LoadError::MissingSources {
            dir: dir.to_path_buf(),
            missing,
        });
    }

    info!(
        component = "loader",
        event = "loader.start",
        data_dir = %dir.display()
    );

    let load = |kind: SourceKind| -> Result<Table, LoadError> {
        read_source(resolve(&found, dir, kind)?, kind)
    };
    Ok(RawSources {
        train: load(SourceKind::Train)?,
        test: load(SourceKind::Test)?,
        stores: load(SourceKind::Stores)?,
        oil: load(SourceKind::Oil)?,
        holidays: load(SourceKind::Holidays)?,
        transactions: load(SourceKind::Transactions)?,
    })
}

pub fn load_source(dir: &Path, kind: SourceKind) -> Result<Table, LoadError> {
    let found = source_paths(dir)?;
    read_source(resolve(&found, dir, kind)?, kind)
}

fn resolve<'a>(
    found: &'a HashMap<String, PathBuf>,
    dir: &Path,
    kind: SourceKind,
) -> Result<&'a Path, LoadError> {
    found
        .get(kind.file_stem())
        .map(PathBuf::as_path)
        .ok_or_else(|| LoadError::MissingSources {
            dir: dir.to_path_buf(),
            missing: vec![kind.file_stem().to_string()],
        })
}

fn read_source(path: &Path, kind: SourceKind) -> Result<Table, LoadError> {
    let source_name = kind.file_stem();
    let csv_error = |error| LoadError::Csv {
        source_name: source_name.to_string(),
        error,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(csv_error)?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record: StringRecord = record.map_err(csv_error)?;
        for (idx, column) in cells.iter_mut().enumerate() {
            column.push(record.get(idx).unwrap_or_default().trim().to_string());
        }
    }

    let mut table = Table::new(source_name);
    for (header, raw) in headers.iter().zip(cells) {
        let data = if kind.date_column() == Some(header.as_str()) {
            parse_dates(source_name, header, &raw)?
        } else {
            infer_column(&raw)
        };
        table.push_column(header.clone(), data)?;
    }

    validate_schema(&mut table, kind)?;

    info!(
        component = "loader",
        event = "loader.source.loaded",
        source = source_name,
        path = %path.display(),
        rows = table.len(),
        columns = table.columns().len()
    );

    Ok(table)
}

/// CSV files in `dir` keyed by stem. The extension matches in any case; an
/// exact `.csv` wins when both spellings exist.
fn source_paths(dir: &Path) -> Result<HashMap<String, PathBuf>, LoadError> {
    let mut found = HashMap::new();
    if !dir.is_dir() {
        debug!(
            component = "loader",
            event = "loader.dir.absent",
            data_dir = %dir.display()
        );
        return Ok(found);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(ext) = path.extension() else {
            continue;
        };
        if !ext.eq_ignore_ascii_case("csv") || !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        let exact = ext == "csv";
        if exact || !found.contains_key(&stem) {
            found.insert(stem, path);
        }
    }
    Ok(found)
}

fn validate_schema(table: &mut Table, kind: SourceKind) -> Result<(), TableError> {
    for (name, expected) in kind.required_columns() {
        let actual = table.require(name)?.data.column_type();
        match (expected, actual) {
            (ColumnType::Float, ColumnType::Int) => table.widen_to_float(name)?,
            (expected, actual) if *expected == actual => {}
            (expected, actual) => {
                return Err(TableError::ColumnType {
                    table: table.name().to_string(),
                    column: name.to_string(),
                    expected: *expected,
                    actual,
                })
            }
        }
    }

    for name in kind.non_null_columns() {
        table.ensure_no_nulls(name)?;
    }
    Ok(())
}

fn parse_dates(source_name: &str, column: &str, raw: &[String]) -> Result<ColumnData, LoadError> {
    let mut dates = Vec::with_capacity(raw.len());
    for (row, value) in raw.iter().enumerate() {
        let date = parse_date(value).ok_or_else(|| LoadError::ParseField {
            source_name: source_name.to_string(),
            column: column.to_string(),
            row,
            value: value.clone(),
        })?;
        dates.push(date);
    }
    Ok(ColumnData::Date(dates))
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, DATE_FORMAT).ok()
}

/// Cell texts read as nulls, alongside the empty cell.
const NA_TOKENS: &[&str] = &[
    "NaN", "nan", "-NaN", "-nan", "NA", "N/A", "n/a", "null", "NULL", "None", "#N/A", "<NA>",
];

fn is_missing(raw: &str) -> bool {
    raw.is_empty() || NA_TOKENS.contains(&raw)
}

/// Non-finite floats (`inf`, `-inf`) are nulls too.
fn parse_float(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Picks the narrowest type that parses every non-missing cell:
/// int, then float, then bool, then string.
fn infer_column(raw: &[String]) -> ColumnData {
    let present = || raw.iter().filter(|v| !is_missing(v));

    if present().next().is_none() {
        return ColumnData::Float(vec![None; raw.len()]);
    }
    if present().all(|v| v.parse::<i64>().is_ok()) {
        return ColumnData::Int(raw.iter().map(|v| v.parse::<i64>().ok()).collect());
    }
    if present().all(|v| v.parse::<f64>().is_ok()) {
        return ColumnData::Float(raw.iter().map(|v| parse_float(v)).collect());
    }
    if present().all(|v| parse_bool(v).is_some()) {
        return ColumnData::Bool(raw.iter().map(|v| parse_bool(v)).collect());
    }
    ColumnData::Str(
        raw.iter()
            .map(|v| if is_missing(v) { None } else { Some(v.clone()) })
            .collect(),
    )
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "True" | "true" | "TRUE" => Some(true),
        "False" | "false" | "FALSE" => Some(false),
        _ => None,
    }
}
