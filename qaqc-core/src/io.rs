//! File I/O: long-format instrument files in, one file per instrument out.
//!
//! Input is a single Parquet or CSV file with a `date` (or `datetime`) column,
//! an `instrument` column and any number of numeric feature columns. Output is
//! one file per instrument holding `date` plus the table's columns.

use crate::calendar::TradingCalendar;
use crate::table::{ColumnValues, TimeSeriesTable};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DATE_COLUMN: &str = "date";
pub const DATETIME_COLUMN: &str = "datetime";
pub const INSTRUMENT_COLUMN: &str = "instrument";

/// Errors from reading or writing data files.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("polars error: {0}")]
    Polars(String),

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("null {column} at row {row}")]
    NullKey { column: &'static str, row: usize },

    #[error("unparsable date '{value}' at row {row}")]
    InvalidDate { value: String, row: usize },

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("table error: {0}")]
    Table(#[from] crate::table::TableError),
}

impl From<PolarsError> for DataError {
    fn from(e: PolarsError) -> Self {
        DataError::Polars(e.to_string())
    }
}

fn io_err(path: &Path, e: std::io::Error) -> DataError {
    DataError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// On-disk table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Parquet,
    Csv,
}

impl TableFormat {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, DataError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        ext.parse()
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Parquet => "parquet",
            TableFormat::Csv => "csv",
        }
    }
}

impl std::str::FromStr for TableFormat {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parquet" | "pq" => Ok(TableFormat::Parquet),
            "csv" => Ok(TableFormat::Csv),
            other => Err(DataError::UnsupportedFormat(other.to_string())),
        }
    }
}

fn epoch() -> NaiveDate {
    DateTime::UNIX_EPOCH.date_naive()
}

// ─── Reading ─────────────────────────────────────────────────────────

/// Load a file into a DataFrame, dispatching on its extension.
pub fn read_dataframe(path: &Path) -> Result<DataFrame, DataError> {
    match TableFormat::from_path(path)? {
        TableFormat::Parquet => {
            let file = fs::File::open(path).map_err(|e| io_err(path, e))?;
            Ok(ParquetReader::new(file).finish()?)
        }
        TableFormat::Csv => {
            // Keep instrument codes such as "000001" as strings.
            let overwrite = Schema::from_iter([Field::new(
                INSTRUMENT_COLUMN.into(),
                DataType::String,
            )]);
            let df = LazyCsvReader::new(path)
                .with_has_header(true)
                .with_try_parse_dates(true)
                .with_dtype_overwrite(Some(Arc::new(overwrite)))
                .finish()?
                .collect()?;
            Ok(df)
        }
    }
}

/// Read a long-format file and split it into one table per instrument.
pub fn read_instrument_tables(
    path: &Path,
) -> Result<BTreeMap<String, TimeSeriesTable>, DataError> {
    let df = read_dataframe(path)?;
    dataframe_to_tables(&df)
}

/// Read a single-instrument file written by [`write_table`].
pub fn read_table(path: &Path) -> Result<TimeSeriesTable, DataError> {
    let df = read_dataframe(path)?;
    let dates = date_values(&df)?;
    let rows: Vec<usize> = (0..dates.len()).collect();
    build_table(&df, &dates, &rows, &[DATE_COLUMN, DATETIME_COLUMN])
}

/// Split a long-format DataFrame by instrument. Rows of each instrument are
/// ordered by date.
pub fn dataframe_to_tables(
    df: &DataFrame,
) -> Result<BTreeMap<String, TimeSeriesTable>, DataError> {
    let dates = date_values(df)?;

    let instruments = df
        .column(INSTRUMENT_COLUMN)
        .map_err(|_| DataError::MissingColumn(INSTRUMENT_COLUMN.into()))?
        .cast(&DataType::String)?;
    let instrument_ca = instruments.as_materialized_series().str()?;

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for row in 0..df.height() {
        let id = instrument_ca.get(row).ok_or(DataError::NullKey {
            column: INSTRUMENT_COLUMN,
            row,
        })?;
        groups.entry(id.to_string()).or_default().push(row);
    }

    let skip = [DATE_COLUMN, DATETIME_COLUMN, INSTRUMENT_COLUMN];
    let mut tables = BTreeMap::new();
    for (id, mut rows) in groups {
        rows.sort_by_key(|&r| dates[r]);
        let table = build_table(df, &dates, &rows, &skip)?;
        tables.insert(id, table);
    }
    Ok(tables)
}

/// Extract the date axis from `date` or `datetime`, accepting Date, Datetime
/// or string columns.
fn date_values(df: &DataFrame) -> Result<Vec<NaiveDate>, DataError> {
    let (name, column) = [DATE_COLUMN, DATETIME_COLUMN]
        .into_iter()
        .find_map(|name| df.column(name).ok().map(|c| (name, c)))
        .ok_or_else(|| DataError::MissingColumn(DATE_COLUMN.into()))?;

    match column.dtype() {
        DataType::String => {
            let ca = column.as_materialized_series().str()?;
            (0..ca.len())
                .map(|row| {
                    let raw = ca.get(row).ok_or(DataError::NullKey { column: "date", row })?;
                    parse_date(raw).ok_or_else(|| DataError::InvalidDate {
                        value: raw.to_string(),
                        row,
                    })
                })
                .collect()
        }
        dtype => {
            let as_date = match dtype {
                DataType::Date => column.clone(),
                _ => column.cast(&DataType::Date).map_err(|e| {
                    DataError::Polars(format!("{name} column to date: {e}"))
                })?,
            };
            let ca = as_date.date()?;
            let epoch = epoch();
            (0..as_date.len())
                .map(|row| {
                    let days = ca.get(row).ok_or(DataError::NullKey { column: "date", row })?;
                    Ok(epoch + chrono::Duration::days(days as i64))
                })
                .collect()
        }
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Gather `rows` of every numeric or boolean column into a table.
/// Columns of other types are skipped.
fn build_table(
    df: &DataFrame,
    dates: &[NaiveDate],
    rows: &[usize],
    skip: &[&str],
) -> Result<TimeSeriesTable, DataError> {
    let index = rows.iter().map(|&r| dates[r]).collect();
    let mut table = TimeSeriesTable::new(index);

    for column in df.get_columns() {
        let name = column.name().as_str();
        if skip.contains(&name) {
            continue;
        }
        let values = match column.dtype() {
            DataType::Float64
            | DataType::Float32
            | DataType::Int64
            | DataType::Int32
            | DataType::Int16
            | DataType::Int8
            | DataType::UInt64
            | DataType::UInt32
            | DataType::UInt16
            | DataType::UInt8 => {
                let cast = column.cast(&DataType::Float64)?;
                let ca = cast.f64()?;
                ColumnValues::Numeric(rows.iter().map(|&r| ca.get(r)).collect())
            }
            DataType::Boolean => {
                let ca = column.as_materialized_series().bool()?;
                ColumnValues::Flag(rows.iter().map(|&r| ca.get(r)).collect())
            }
            _ => continue,
        };
        table.insert_column(name, values)?;
    }
    Ok(table)
}

// ─── Writing ─────────────────────────────────────────────────────────

/// Convert a table to a DataFrame with a leading `date` column.
pub fn table_to_dataframe(table: &TimeSeriesTable) -> Result<DataFrame, DataError> {
    let epoch = epoch();
    let days: Vec<i32> = table
        .index()
        .iter()
        .map(|d| (*d - epoch).num_days() as i32)
        .collect();

    let mut columns = Vec::with_capacity(table.columns().len() + 1);
    columns.push(Column::new(DATE_COLUMN.into(), days).cast(&DataType::Date)?);
    for column in table.columns() {
        let col = match &column.values {
            ColumnValues::Numeric(v) => Column::new(column.name.as_str().into(), v.as_slice()),
            ColumnValues::Flag(v) => Column::new(column.name.as_str().into(), v.as_slice()),
        };
        columns.push(col);
    }

    Ok(DataFrame::new(columns)?)
}

/// Write one table to `path` in the given format.
pub fn write_table(
    table: &TimeSeriesTable,
    path: &Path,
    format: TableFormat,
) -> Result<(), DataError> {
    let mut df = table_to_dataframe(table)?;
    let mut file = fs::File::create(path).map_err(|e| io_err(path, e))?;
    match format {
        TableFormat::Parquet => {
            ParquetWriter::new(file).finish(&mut df)?;
        }
        TableFormat::Csv => {
            CsvWriter::new(&mut file)
                .include_header(true)
                .finish(&mut df)?;
        }
    }
    Ok(())
}

// ─── Calendar ────────────────────────────────────────────────────────

/// Read a trading calendar: one ISO date per line. Blank lines and lines
/// starting with `#` are ignored.
pub fn read_calendar(path: &Path) -> Result<TradingCalendar, DataError> {
    let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let mut dates = Vec::new();
    for (row, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let date = parse_date(line).ok_or_else(|| DataError::InvalidDate {
            value: line.to_string(),
            row,
        })?;
        dates.push(date);
    }
    Ok(TradingCalendar::new(dates))
}
