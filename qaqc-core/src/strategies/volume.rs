//! Volume gap-filling strategies. All are no-ops without a volume column.

use super::{forward_fill, TableStrategy};
use crate::table::{TimeSeriesTable, VOLUME};

/// Null volume becomes 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroVolume;

impl TableStrategy for ZeroVolume {
    fn name(&self) -> &str {
        "zero"
    }

    fn apply(&self, mut table: TimeSeriesTable) -> TimeSeriesTable {
        if let Some(volume) = table.numeric_mut(VOLUME) {
            for v in volume.iter_mut().filter(|v| v.is_none()) {
                *v = Some(0.0);
            }
        }
        table
    }
}

/// Null volume becomes the mean of the non-null volumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanVolume;

impl TableStrategy for MeanVolume {
    fn name(&self) -> &str {
        "mean"
    }

    fn apply(&self, mut table: TimeSeriesTable) -> TimeSeriesTable {
        if let Some(volume) = table.numeric_mut(VOLUME) {
            let (sum, count) = volume
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            // All-null: nothing to fill with.
            if count > 0 {
                let mean = sum / count as f64;
                for v in volume.iter_mut().filter(|v| v.is_none()) {
                    *v = Some(mean);
                }
            }
        }
        table
    }
}

/// Forward-fill volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardFillVolume;

impl TableStrategy for ForwardFillVolume {
    fn name(&self) -> &str {
        "ffill"
    }

    fn apply(&self, mut table: TimeSeriesTable) -> TimeSeriesTable {
        if let Some(volume) = table.numeric_mut(VOLUME) {
            forward_fill(volume);
        }
        table
    }
}
