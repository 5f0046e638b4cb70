//! Date-indexed, column-oriented table of nullable values.
//!
//! One row per trading day. Columns are either numeric (prices, volume,
//! labels) or flags (the anomaly marker). A null is `None`; there is no NaN
//! sentinel, so "missing" is always explicit.

use chrono::NaiveDate;
use thiserror::Error;

pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";
pub const VOLUME: &str = "volume";

/// Price columns touched by the OHLC fill strategies, in canonical order.
pub const PRICE_COLUMNS: [&str; 4] = [OPEN, HIGH, LOW, CLOSE];

/// Boolean column added by the anomaly detector in flag mode.
pub const ANOMALY_FLAG: &str = "qaqc_anomaly";

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("column '{column}' has {actual} values, table has {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
}

/// Values of a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Numeric(Vec<Option<f64>>),
    Flag(Vec<Option<bool>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Numeric(v) => v.len(),
            ColumnValues::Flag(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, row: usize) -> bool {
        match self {
            ColumnValues::Numeric(v) => v.get(row).map_or(true, Option::is_none),
            ColumnValues::Flag(v) => v.get(row).map_or(true, Option::is_none),
        }
    }

    pub fn null_count(&self) -> usize {
        match self {
            ColumnValues::Numeric(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnValues::Flag(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Gather rows by position; `None` positions become nulls.
    fn gather(&self, positions: &[Option<usize>]) -> ColumnValues {
        match self {
            ColumnValues::Numeric(v) => ColumnValues::Numeric(
                positions
                    .iter()
                    .map(|p| p.and_then(|i| v.get(i).copied().flatten()))
                    .collect(),
            ),
            ColumnValues::Flag(v) => ColumnValues::Flag(
                positions
                    .iter()
                    .map(|p| p.and_then(|i| v.get(i).copied().flatten()))
                    .collect(),
            ),
        }
    }

    fn retain(&self, keep: &[bool]) -> ColumnValues {
        fn pick<T: Copy>(values: &[Option<T>], keep: &[bool]) -> Vec<Option<T>> {
            values
                .iter()
                .zip(keep)
                .filter(|(_, k)| **k)
                .map(|(v, _)| *v)
                .collect()
        }
        match self {
            ColumnValues::Numeric(v) => ColumnValues::Numeric(pick(v, keep)),
            ColumnValues::Flag(v) => ColumnValues::Flag(pick(v, keep)),
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

/// Per-instrument time series, ordered by date.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeriesTable {
    index: Vec<NaiveDate>,
    columns: Vec<Column>,
}

impl TimeSeriesTable {
    /// A table with the given row index and no columns.
    pub fn new(index: Vec<NaiveDate>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    /// Builder-style insert of a numeric column.
    pub fn with_numeric(
        mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<Self, TableError> {
        self.insert_column(name, ColumnValues::Numeric(values))?;
        Ok(self)
    }

    /// Builder-style insert of a flag column.
    pub fn with_flag(
        mut self,
        name: impl Into<String>,
        values: Vec<Option<bool>>,
    ) -> Result<Self, TableError> {
        self.insert_column(name, ColumnValues::Flag(values))?;
        Ok(self)
    }

    /// Insert or replace a column. Its length must match the row count.
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        values: ColumnValues,
    ) -> Result<(), TableError> {
        let name = name.into();
        if values.len() != self.index.len() {
            return Err(TableError::LengthMismatch {
                column: name,
                expected: self.index.len(),
                actual: values.len(),
            });
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column { name, values }),
        }
        Ok(())
    }

    pub fn index(&self) -> &[NaiveDate] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnValues> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.values)
    }

    /// Numeric values of a column; `None` if absent or not numeric.
    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        match self.column(name)? {
            ColumnValues::Numeric(v) => Some(v),
            ColumnValues::Flag(_) => None,
        }
    }

    pub fn numeric_mut(&mut self, name: &str) -> Option<&mut Vec<Option<f64>>> {
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(Column {
                values: ColumnValues::Numeric(v),
                ..
            }) => Some(v),
            _ => None,
        }
    }

    /// Flag values of a column; `None` if absent or not a flag column.
    pub fn flag(&self, name: &str) -> Option<&[Option<bool>]> {
        match self.column(name)? {
            ColumnValues::Flag(v) => Some(v),
            ColumnValues::Numeric(_) => None,
        }
    }

    /// True if any column is null in `row`.
    pub fn row_has_null(&self, row: usize) -> bool {
        self.columns.iter().any(|c| c.values.is_null(row))
    }

    /// Rebuild the table on a new index, pulling row `positions[i]` of the
    /// current table into row `i`. `None` yields an all-null row.
    pub fn gather_rows(&self, index: Vec<NaiveDate>, positions: &[Option<usize>]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: c.values.gather(positions),
            })
            .collect();
        Self { index, columns }
    }

    /// Keep only rows where `keep[i]` is true.
    pub fn retain_rows(&self, keep: &[bool]) -> Self {
        let index = self
            .index
            .iter()
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|(d, _)| *d)
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: c.values.retain(keep),
            })
            .collect();
        Self { index, columns }
    }
}
