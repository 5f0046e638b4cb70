//! Price-jump and volume-spike detection.
//!
//! A row is a price anomaly when its close moved more than
//! `price_jump_threshold` (relative) from the previous row's close, and a
//! volume anomaly when its volume exceeds `volume_spike_factor` times the
//! median volume. The detector then flags, clips or drops those rows.

use crate::config::{AnomalyConfig, ConfigError};
use crate::strategies::TableStrategy;
use crate::table::{ColumnValues, TimeSeriesTable, ANOMALY_FLAG, CLOSE, VOLUME};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do with anomalous rows.
///
/// Deserializes through `FromStr`, so a bad mode in a config file reports
/// the same error as a bad mode given anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum AnomalyMode {
    /// Add a boolean `qaqc_anomaly` column; values untouched.
    Flag,
    /// Clamp close into the allowed band and cap spiking volume.
    Clip,
    /// Remove anomalous rows.
    Drop,
}

impl FromStr for AnomalyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flag" => Ok(AnomalyMode::Flag),
            "clip" => Ok(AnomalyMode::Clip),
            "drop" => Ok(AnomalyMode::Drop),
            other => Err(ConfigError::InvalidAnomalyMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for AnomalyMode {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for AnomalyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnomalyMode::Flag => "flag",
            AnomalyMode::Clip => "clip",
            AnomalyMode::Drop => "drop",
        };
        f.write_str(s)
    }
}

/// Per-row detection results for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyScan {
    /// Previous row's close (pre-clip).
    pub prev_close: Vec<Option<f64>>,
    pub price: Vec<bool>,
    pub volume: Vec<bool>,
    /// Median of non-null volumes, when it is positive.
    pub median_volume: Option<f64>,
}

impl AnomalyScan {
    /// Row-wise `price OR volume`.
    pub fn combined(&self) -> Vec<bool> {
        self.price
            .iter()
            .zip(&self.volume)
            .map(|(p, v)| *p || *v)
            .collect()
    }

    pub fn price_count(&self) -> usize {
        self.price.iter().filter(|x| **x).count()
    }

    pub fn volume_count(&self) -> usize {
        self.volume.iter().filter(|x| **x).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyDetector {
    price_jump_threshold: f64,
    volume_spike_factor: f64,
    mode: AnomalyMode,
}

impl AnomalyDetector {
    /// Both thresholds must be finite and strictly positive.
    pub fn new(
        price_jump_threshold: f64,
        volume_spike_factor: f64,
        mode: AnomalyMode,
    ) -> Result<Self, ConfigError> {
        if !(price_jump_threshold.is_finite() && price_jump_threshold > 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "price_jump_threshold",
                value: price_jump_threshold,
                expected: "x > 0",
            });
        }
        if !(volume_spike_factor.is_finite() && volume_spike_factor > 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "volume_spike_factor",
                value: volume_spike_factor,
                expected: "x > 0",
            });
        }
        Ok(Self {
            price_jump_threshold,
            volume_spike_factor,
            mode,
        })
    }

    pub fn from_config(config: &AnomalyConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.price_jump_threshold,
            config.volume_spike_factor,
            config.mode,
        )
    }

    pub fn mode(&self) -> AnomalyMode {
        self.mode
    }

    pub fn price_jump_threshold(&self) -> f64 {
        self.price_jump_threshold
    }

    pub fn volume_spike_factor(&self) -> f64 {
        self.volume_spike_factor
    }

    /// Detect anomalies without modifying the table. `None` without a close column.
    pub fn scan(&self, table: &TimeSeriesTable) -> Option<AnomalyScan> {
        let close = table.numeric(CLOSE)?;

        let prev_close: Vec<Option<f64>> = std::iter::once(None)
            .chain(close.iter().copied())
            .take(close.len())
            .collect();

        let price = close
            .iter()
            .zip(&prev_close)
            .map(|(cur, prev)| match (cur, prev) {
                // Zero or null previous close: change undefined, never flagged.
                (Some(c), Some(p)) if *p != 0.0 => {
                    (c - p).abs() / p.abs() > self.price_jump_threshold
                }
                _ => false,
            })
            .collect();

        let (volume, median_volume) = match table.numeric(VOLUME) {
            Some(vol) => match median(vol).filter(|m| *m > 0.0) {
                Some(m) => {
                    let cap = m * self.volume_spike_factor;
                    let flags: Vec<bool> =
                        vol.iter().map(|v| matches!(v, Some(x) if *x > cap)).collect();
                    (flags, Some(m))
                }
                None => (vec![false; close.len()], None),
            },
            None => (vec![false; close.len()], None),
        };

        Some(AnomalyScan {
            prev_close,
            price,
            volume,
            median_volume,
        })
    }

    /// Run detection and apply the configured mode.
    pub fn process(&self, mut table: TimeSeriesTable) -> TimeSeriesTable {
        let Some(scan) = self.scan(&table) else {
            return table;
        };

        match self.mode {
            AnomalyMode::Flag => {
                let flags = scan.combined().into_iter().map(Some).collect();
                // Length always matches: the scan is built from this table.
                if let Err(e) = table.insert_column(ANOMALY_FLAG, ColumnValues::Flag(flags)) {
                    tracing::warn!(error = %e, "could not add anomaly flag column");
                }
                table
            }
            AnomalyMode::Clip => {
                let t = self.price_jump_threshold;
                if let Some(close) = table.numeric_mut(CLOSE) {
                    for (i, value) in close.iter_mut().enumerate() {
                        if !scan.price[i] {
                            continue;
                        }
                        if let (Some(c), Some(p)) = (*value, scan.prev_close[i]) {
                            let down = p * (1.0 - t);
                            let up = p * (1.0 + t);
                            *value = Some(c.max(down).min(up));
                        }
                    }
                }
                if let Some(m) = scan.median_volume {
                    let cap = m * self.volume_spike_factor;
                    if let Some(volume) = table.numeric_mut(VOLUME) {
                        for (value, spiked) in volume.iter_mut().zip(&scan.volume) {
                            if *spiked {
                                *value = Some(cap);
                            }
                        }
                    }
                }
                table
            }
            AnomalyMode::Drop => {
                let keep: Vec<bool> = scan.combined().iter().map(|a| !a).collect();
                table.retain_rows(&keep)
            }
        }
    }
}

impl TableStrategy for AnomalyDetector {
    fn name(&self) -> &str {
        "anomaly"
    }

    fn apply(&self, table: TimeSeriesTable) -> TimeSeriesTable {
        self.process(table)
    }
}

/// Median of the non-null values; `None` if there are none.
pub(crate) fn median(values: &[Option<f64>]) -> Option<f64> {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(|a, b| a.total_cmp(b));
    let mid = present.len() / 2;
    if present.len() % 2 == 0 {
        Some((present[mid - 1] + present[mid]) / 2.0)
    } else {
        Some(present[mid])
    }
}
