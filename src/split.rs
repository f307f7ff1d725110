//! Chronological train / validation / test partitioning.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::loader::DATE_COLUMN;
use crate::table::{Table, TableError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitThresholds {
    pub train_end: NaiveDate,
    pub val_end: NaiveDate,
}

impl SplitThresholds {
    pub fn validate(&self) -> Result<(), String> {
        if self.train_end >= self.val_end {
            return Err(format!(
                "train_end ({}) must be earlier than val_end ({})",
                self.train_end, self.val_end
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    Train,
    Validation,
    Test,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Self::Train, Self::Validation, Self::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "val",
            Self::Test => "test",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.parquet", self.as_str())
    }
}

/// `date <= train_end` is train, `train_end < date <= val_end` is validation,
/// anything later is test.
pub fn assign_partition(date: NaiveDate, thresholds: &SplitThresholds) -> Partition {
    if date <= thresholds.train_end {
        Partition::Train
    } else if date <= thresholds.val_end {
        Partition::Validation
    } else {
        Partition::Test
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partitions {
    pub train: Table,
    pub validation: Table,
    pub test: Table,
}

impl Partitions {
    pub fn get(&self, partition: Partition) -> &Table {
        match partition {
            Partition::Train => &self.train,
            Partition::Validation => &self.validation,
            Partition::Test => &self.test,
        }
    }

    pub fn total_rows(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }
}

/// Splits rows by date; each partition keeps table order.
pub fn chrono_split(table: &Table, thresholds: &SplitThresholds) -> Result<Partitions, TableError> {
    let mut train = Vec::new();
    let mut validation = Vec::new();
    let mut test = Vec::new();
    for (row, date) in table.dates(DATE_COLUMN)?.iter().enumerate() {
        match assign_partition(*date, thresholds) {
            Partition::Train => train.push(row),
            Partition::Validation => validation.push(row),
            Partition::Test => test.push(row),
        }
    }

    info!(
        component = "split",
        event = "split.finish",
        train_end = %thresholds.train_end,
        val_end = %thresholds.val_end,
        train_rows = train.len(),
        val_rows = validation.len(),
        test_rows = test.len()
    );

    Ok(Partitions {
        train: table.take(&train),
        validation: table.take(&validation),
        test: table.take(&test),
    })
}
