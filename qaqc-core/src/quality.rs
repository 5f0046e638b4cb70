//! Per-instrument data-quality metrics.

use crate::table::{TimeSeriesTable, ANOMALY_FLAG};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Quality snapshot of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub total_rows: usize,
    /// Fraction of rows with at least one null in any column.
    pub missing_rate: f64,
    /// `max(0, 1 - missing_rate)`.
    pub completeness: f64,
    /// Fraction of rows flagged anomalous; only when the flag column exists.
    pub anomaly_rate: Option<f64>,
    pub per_column_missing_rate: BTreeMap<String, f64>,
}

impl QualityMetrics {
    /// Metrics of a table with no rows: treated as entirely missing.
    pub fn empty() -> Self {
        Self {
            total_rows: 0,
            missing_rate: 1.0,
            completeness: 0.0,
            anomaly_rate: None,
            per_column_missing_rate: BTreeMap::new(),
        }
    }
}

/// Computes `QualityMetrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityReporter;

impl QualityReporter {
    pub fn report(&self, table: &TimeSeriesTable) -> QualityMetrics {
        let total = table.len();
        if total == 0 {
            return QualityMetrics::empty();
        }
        let n = total as f64;

        let rows_missing = (0..total).filter(|&row| table.row_has_null(row)).count();
        let missing_rate = rows_missing as f64 / n;

        let per_column_missing_rate = table
            .columns()
            .iter()
            .map(|c| (c.name.clone(), c.values.null_count() as f64 / n))
            .collect();

        let anomaly_rate = table
            .flag(ANOMALY_FLAG)
            .map(|flags| flags.iter().filter(|f| **f == Some(true)).count() as f64 / n);

        QualityMetrics {
            total_rows: total,
            missing_rate,
            completeness: (1.0 - missing_rate).max(0.0),
            anomaly_rate,
            per_column_missing_rate,
        }
    }
}
