//! In-memory observation table: named, typed, nullable columns.
//!
//! Every stage of the pipeline owns one `Table` at a time and either
//! mutates it in place or hands a freshly selected copy to the next stage.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Date,
    Int,
    Float,
    Bool,
    Str,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Str => "str",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Bool)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column storage. Dates are never null; every other type is nullable.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Date(Vec<NaiveDate>),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Str(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Date(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Date(_) => ColumnType::Date,
            Self::Int(_) => ColumnType::Int,
            Self::Float(_) => ColumnType::Float,
            Self::Bool(_) => ColumnType::Bool,
            Self::Str(_) => ColumnType::Str,
        }
    }

    pub fn is_null(&self, row: usize) -> bool {
        match self {
            Self::Date(_) => false,
            Self::Int(v) => v[row].is_none(),
            Self::Float(v) => v[row].is_none(),
            Self::Bool(v) => v[row].is_none(),
            Self::Str(v) => v[row].is_none(),
        }
    }

    pub fn null_count(&self) -> usize {
        (0..self.len()).filter(|row| self.is_null(*row)).count()
    }

    /// Numeric view of a cell: ints and bools widen to `f64`, dates and
    /// strings have none.
    pub fn numeric_value(&self, row: usize) -> Option<f64> {
        match self {
            Self::Int(v) => v[row].map(|x| x as f64),
            Self::Float(v) => v[row],
            Self::Bool(v) => v[row].map(|x| if x { 1.0 } else { 0.0 }),
            Self::Date(_) | Self::Str(_) => None,
        }
    }

    fn take(&self, indices: &[usize]) -> Self {
        match self {
            Self::Date(v) => Self::Date(indices.iter().map(|i| v[*i]).collect()),
            Self::Int(v) => Self::Int(indices.iter().map(|i| v[*i]).collect()),
            Self::Float(v) => Self::Float(indices.iter().map(|i| v[*i]).collect()),
            Self::Bool(v) => Self::Bool(indices.iter().map(|i| v[*i]).collect()),
            Self::Str(v) => Self::Str(indices.iter().map(|i| v[*i].clone()).collect()),
        }
    }

    fn gather(&self, indices: &[Option<usize>]) -> Option<Self> {
        Some(match self {
            Self::Date(v) => Self::Date(
                indices
                    .iter()
                    .map(|i| i.map(|i| v[i]))
                    .collect::<Option<Vec<_>>>()?,
            ),
            Self::Int(v) => Self::Int(indices.iter().map(|i| i.and_then(|i| v[i])).collect()),
            Self::Float(v) => Self::Float(indices.iter().map(|i| i.and_then(|i| v[i])).collect()),
            Self::Bool(v) => Self::Bool(indices.iter().map(|i| i.and_then(|i| v[i])).collect()),
            Self::Str(v) => Self::Str(
                indices
                    .iter()
                    .map(|i| i.and_then(|i| v[i].clone()))
                    .collect(),
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("source `{table}` is missing required column `{column}`")]
    MissingColumn { table: String, column: String },
    #[error("column `{column}` in `{table}` has type {actual}, expected {expected}")]
    ColumnType {
        table: String,
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },
    #[error("column `{column}` has {actual} rows but table `{table}` has {expected}")]
    LengthMismatch {
        table: String,
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("column `{column}` already exists in `{table}`")]
    DuplicateColumn { table: String, column: String },
    #[error("column `{column}` in `{table}` has a null value at row {row}")]
    NullValue {
        table: String,
        column: String,
        row: usize,
    },
}

/// Identity of one time series: a (location, product) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub location: Option<i64>,
    pub product: Option<String>,
}

/// Row indices of one series, ascending by date (ties keep table order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesGroup {
    pub key: SeriesKey,
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    rows: usize,
    columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: 0,
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn require(&self, name: &str) -> Result<&Column, TableError> {
        self.column(name).ok_or_else(|| TableError::MissingColumn {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }

    /// Appends a column. The first column fixes the row count.
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        data: ColumnData,
    ) -> Result<(), TableError> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(TableError::DuplicateColumn {
                table: self.name.clone(),
                column: name,
            });
        }
        if self.columns.is_empty() {
            self.rows = data.len();
        } else if data.len() != self.rows {
            return Err(TableError::LengthMismatch {
                table: self.name.clone(),
                column: name,
                expected: self.rows,
                actual: data.len(),
            });
        }
        self.columns.push(Column { name, data });
        Ok(())
    }

    pub fn replace_column(&mut self, name: &str, data: ColumnData) -> Result<(), TableError> {
        if data.len() != self.rows {
            return Err(TableError::LengthMismatch {
                table: self.name.clone(),
                column: name.to_string(),
                expected: self.rows,
                actual: data.len(),
            });
        }
        let table = self.name.clone();
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| TableError::MissingColumn {
                table,
                column: name.to_string(),
            })?;
        column.data = data;
        Ok(())
    }

    pub fn dates(&self, name: &str) -> Result<&[NaiveDate], TableError> {
        match &self.require(name)?.data {
            ColumnData::Date(v) => Ok(v),
            other => Err(self.type_error(name, ColumnType::Date, other.column_type())),
        }
    }

    pub fn ints(&self, name: &str) -> Result<&[Option<i64>], TableError> {
        match &self.require(name)?.data {
            ColumnData::Int(v) => Ok(v),
            other => Err(self.type_error(name, ColumnType::Int, other.column_type())),
        }
    }

    pub fn floats(&self, name: &str) -> Result<&[Option<f64>], TableError> {
        match &self.require(name)?.data {
            ColumnData::Float(v) => Ok(v),
            other => Err(self.type_error(name, ColumnType::Float, other.column_type())),
        }
    }

    pub fn floats_mut(&mut self, name: &str) -> Result<&mut Vec<Option<f64>>, TableError> {
        let actual = self.require(name)?.data.column_type();
        if actual != ColumnType::Float {
            return Err(self.type_error(name, ColumnType::Float, actual));
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(Column {
                data: ColumnData::Float(v),
                ..
            }) => Ok(v),
            _ => Err(TableError::MissingColumn {
                table: self.name.clone(),
                column: name.to_string(),
            }),
        }
    }

    pub fn bools(&self, name: &str) -> Result<&[Option<bool>], TableError> {
        match &self.require(name)?.data {
            ColumnData::Bool(v) => Ok(v),
            other => Err(self.type_error(name, ColumnType::Bool, other.column_type())),
        }
    }

    pub fn strs(&self, name: &str) -> Result<&[Option<String>], TableError> {
        match &self.require(name)?.data {
            ColumnData::Str(v) => Ok(v),
            other => Err(self.type_error(name, ColumnType::Str, other.column_type())),
        }
    }

    /// Converts an integer column to float in place; float columns are left
    /// untouched.
    pub fn widen_to_float(&mut self, name: &str) -> Result<(), TableError> {
        let widened = match &self.require(name)?.data {
            ColumnData::Float(_) => return Ok(()),
            ColumnData::Int(v) => ColumnData::Float(v.iter().map(|x| x.map(|x| x as f64)).collect()),
            other => return Err(self.type_error(name, ColumnType::Float, other.column_type())),
        };
        self.replace_column(name, widened)
    }

    pub fn ensure_no_nulls(&self, name: &str) -> Result<(), TableError> {
        let column = self.require(name)?;
        match (0..self.rows).find(|row| column.data.is_null(*row)) {
            Some(row) => Err(TableError::NullValue {
                table: self.name.clone(),
                column: name.to_string(),
                row,
            }),
            None => Ok(()),
        }
    }

    /// Selects rows by index, in the given order.
    pub fn take(&self, indices: &[usize]) -> Table {
        Table {
            name: self.name.clone(),
            rows: indices.len(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    data: c.data.take(indices),
                })
                .collect(),
        }
    }

    /// Selects rows by optional index; `None` produces a null row. Fails for
    /// tables holding a date column, since dates cannot be null.
    pub fn gather(&self, indices: &[Option<usize>]) -> Result<Table, TableError> {
        let mut columns = Vec::with_capacity(self.columns.len());
        for c in &self.columns {
            let data = c.data.gather(indices).ok_or_else(|| TableError::NullValue {
                table: self.name.clone(),
                column: c.name.clone(),
                row: indices.iter().position(Option::is_none).unwrap_or_default(),
            })?;
            columns.push(Column {
                name: c.name.clone(),
                data,
            });
        }
        Ok(Table {
            name: self.name.clone(),
            rows: indices.len(),
            columns,
        })
    }

    pub fn is_row_complete(&self, row: usize) -> bool {
        self.columns.iter().all(|c| !c.data.is_null(row))
    }

    /// Removes every row holding at least one null cell and returns how many
    /// were removed.
    pub fn drop_incomplete_rows(&mut self) -> usize {
        let keep: Vec<usize> = (0..self.rows)
            .filter(|row| self.is_row_complete(*row))
            .collect();
        let dropped = self.rows - keep.len();
        if dropped > 0 {
            *self = self.take(&keep);
        }
        dropped
    }

    pub fn schema(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.data.column_type()))
            .collect()
    }

    pub fn float_column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.data.column_type() == ColumnType::Float)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Partitions rows into (location, product) series. Groups come out in
    /// key order; rows inside a group are ascending by date.
    pub fn group_rows(
        &self,
        location: &str,
        product: &str,
        date: &str,
    ) -> Result<Vec<SeriesGroup>, TableError> {
        let locations = self.ints(location)?;
        let products = self.strs(product)?;
        let dates = self.dates(date)?;

        let mut groups: BTreeMap<SeriesKey, Vec<usize>> = BTreeMap::new();
        for row in 0..self.rows {
            let key = SeriesKey {
                location: locations[row],
                product: products[row].clone(),
            };
            groups.entry(key).or_default().push(row);
        }

        Ok(groups
            .into_iter()
            .map(|(key, mut rows)| {
                rows.sort_by_key(|row| dates[*row]);
                SeriesGroup { key, rows }
            })
            .collect())
    }

    fn type_error(&self, column: &str, expected: ColumnType, actual: ColumnType) -> TableError {
        TableError::ColumnType {
            table: self.name.clone(),
            column: column.to_string(),
            expected,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 1, d).unwrap()
    }

    fn sample() -> Table {
        let mut table = Table::new("train");
        table
            .push_column("date", ColumnData::Date(vec![day(3), day(1), day(2), day(1)]))
            .unwrap();
        table
            .push_column("store_nbr", ColumnData::Int(vec![Some(1), Some(1), Some(1), Some(2)]))
            .unwrap();
        table
            .push_column(
                "family",
                ColumnData::Str(vec![Some("A".into()), Some("A".into()), Some("A".into()), Some("A".into())]),
            )
            .unwrap();
        table
            .push_column("sales", ColumnData::Float(vec![Some(3.0), None, Some(2.0), Some(9.0)]))
            .unwrap();
        table
    }

    #[test]
    fn push_column_rejects_length_mismatch_and_duplicates() {
        let mut table = sample();
        let err = table
            .push_column("extra", ColumnData::Int(vec![Some(1)]))
            .unwrap_err();
        assert!(matches!(err, TableError::LengthMismatch { expected: 4, actual: 1, .. }));

        let err = table
            .push_column("sales", ColumnData::Float(vec![None; 4]))
            .unwrap_err();
        assert!(matches!(err, TableError::DuplicateColumn { .. }));
    }

    #[test]
    fn typed_access_reports_table_and_column() {
        let table = sample();
        let err = table.floats("family").unwrap_err();
        assert_eq!(
            err.to_string(),
            "column `family` in `train` has type str, expected float"
        );
        let err = table.floats("missing").unwrap_err();
        assert_eq!(
            err.to_string(),
            "source `train` is missing required column `missing`"
        );
    }

    #[test]
    fn group_rows_orders_by_key_then_date() {
        let table = sample();
        let groups = table.group_rows("store_nbr", "family", "date").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key.location, Some(1));
        assert_eq!(groups[0].rows, vec![1, 2, 0]);
        assert_eq!(groups[1].rows, vec![3]);
    }

    #[test]
    fn drop_incomplete_rows_removes_any_null() {
        let mut table = sample();
        assert_eq!(table.drop_incomplete_rows(), 1);
        assert_eq!(table.len(), 3);
        assert_eq!(table.floats("sales").unwrap(), &[Some(3.0), Some(2.0), Some(9.0)]);
    }

    #[test]
    fn gather_fills_nulls_for_missing_rows() {
        let mut stores = Table::new("stores");
        stores
            .push_column("city", ColumnData::Str(vec![Some("Quito".into())]))
            .unwrap();
        let joined = stores.gather(&[Some(0), None]).unwrap();
        assert_eq!(joined.strs("city").unwrap(), &[Some("Quito".to_string()), None]);

        let table = sample();
        assert!(table.gather(&[None]).is_err());
    }

    #[test]
    fn widen_to_float_converts_ints() {
        let mut table = sample();
        table.widen_to_float("store_nbr").unwrap();
        assert_eq!(table.floats("store_nbr").unwrap()[3], Some(2.0));
        assert!(table.widen_to_float("family").is_err());
    }
}
