//! Price gap-filling strategies.
//!
//! Each strategy touches only the price columns present in the table;
//! absent columns stay absent.

use super::{forward_fill, TableStrategy};
use crate::table::{TimeSeriesTable, CLOSE, PRICE_COLUMNS};

/// Forward-fill every present price column.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardFillOhlc;

impl TableStrategy for ForwardFillOhlc {
    fn name(&self) -> &str {
        "ffill"
    }

    fn apply(&self, mut table: TimeSeriesTable) -> TimeSeriesTable {
        for col in PRICE_COLUMNS {
            if let Some(values) = table.numeric_mut(col) {
                forward_fill(values);
            }
        }
        table
    }
}

/// Fill a null close with the previous row's close; other prices untouched.
///
/// The lookback is a single step over the unfilled column: in a run of two
/// or more null closes only the first one is filled.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrevCloseOhlc;

impl TableStrategy for PrevCloseOhlc {
    fn name(&self) -> &str {
        "prev_close"
    }

    fn apply(&self, mut table: TimeSeriesTable) -> TimeSeriesTable {
        if let Some(close) = table.numeric_mut(CLOSE) {
            let original = close.clone();
            for (i, value) in close.iter_mut().enumerate().skip(1) {
                if value.is_none() {
                    *value = original[i - 1];
                }
            }
        }
        table
    }
}

/// Linear interpolation over row position.
///
/// Only interior gaps (non-null on both sides) are filled. With a `limit`,
/// at most that many nulls at the start of each gap are filled.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpolateOhlc {
    limit: Option<usize>,
}

impl InterpolateOhlc {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    fn interpolate(&self, values: &mut [Option<f64>]) {
        let n = values.len();
        let mut last_valid: Option<usize> = None;
        let mut i = 0;
        while i < n {
            if values[i].is_some() {
                last_valid = Some(i);
                i += 1;
                continue;
            }
            let gap_start = i;
            while i < n && values[i].is_none() {
                i += 1;
            }
            // Gap is gap_start..i; i is the right bound if i < n.
            let Some(left) = last_valid else { continue };
            if i >= n {
                break;
            }
            if let (Some(y0), Some(y1)) = (values[left], values[i]) {
                let span = (i - left) as f64;
                let fill_end = self.limit.map_or(i, |l| (gap_start + l).min(i));
                for (k, slot) in values
                    .iter_mut()
                    .enumerate()
                    .take(fill_end)
                    .skip(gap_start)
                {
                    *slot = Some(y0 + (y1 - y0) * (k - left) as f64 / span);
                }
            }
        }
    }
}

impl TableStrategy for InterpolateOhlc {
    fn name(&self) -> &str {
        "interpolate"
    }

    fn apply(&self, mut table: TimeSeriesTable) -> TimeSeriesTable {
        for col in PRICE_COLUMNS {
            if let Some(values) = table.numeric_mut(col) {
                self.interpolate(values);
            }
        }
        table
    }
}

/// Drop rows where any column of `subset` is null.
///
/// Subset columns missing from the table are ignored.
#[derive(Debug, Clone)]
pub struct DropMissingOhlc {
    subset: Vec<String>,
}

impl DropMissingOhlc {
    pub fn new(subset: Vec<String>) -> Self {
        Self { subset }
    }

    pub fn subset(&self) -> &[String] {
        &self.subset
    }
}

impl Default for DropMissingOhlc {
    fn default() -> Self {
        Self::new(vec![CLOSE.to_string()])
    }
}

impl TableStrategy for DropMissingOhlc {
    fn name(&self) -> &str {
        "drop"
    }

    fn apply(&self, table: TimeSeriesTable) -> TimeSeriesTable {
        let checked: Vec<_> = self
            .subset
            .iter()
            .filter_map(|name| table.column(name))
            .collect();
        if checked.is_empty() {
            return table;
        }
        let keep: Vec<bool> = (0..table.len())
            .map(|row| checked.iter().all(|col| !col.is_null(row)))
            .collect();
        table.retain_rows(&keep)
    }
}
