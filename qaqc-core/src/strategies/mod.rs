//! Table-transform strategies for the fill stages.
//!
//! Every stage of the cleaning pipeline is a `TableStrategy`: a pure
//! `table -> table` transform, configured once at construction. The factory
//! turns a named `ComponentConfig` into a boxed strategy.

pub mod factory;
pub mod ohlc;
pub mod volume;

use crate::table::TimeSeriesTable;

pub use factory::{create_ohlc_strategy, create_volume_strategy};
pub use ohlc::{DropMissingOhlc, ForwardFillOhlc, InterpolateOhlc, PrevCloseOhlc};
pub use volume::{ForwardFillVolume, MeanVolume, ZeroVolume};

/// A pure table transform.
///
/// # Contract
/// Columns a strategy needs but the table lacks are a no-op, never an error.
pub trait TableStrategy: Send + Sync {
    /// Identifier used in configs and logs (e.g. "ffill", "mean").
    fn name(&self) -> &str;

    fn apply(&self, table: TimeSeriesTable) -> TimeSeriesTable;
}

/// Leaves the table untouched (`keep_na`).
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepMissing;

impl TableStrategy for KeepMissing {
    fn name(&self) -> &str {
        "keep_na"
    }

    fn apply(&self, table: TimeSeriesTable) -> TimeSeriesTable {
        table
    }
}

/// Replace each null with the nearest preceding non-null value.
pub(crate) fn forward_fill(values: &mut [Option<f64>]) {
    let mut last = None;
    for v in values.iter_mut() {
        if v.is_some() {
            last = *v;
        } else {
            *v = last;
        }
    }
}
