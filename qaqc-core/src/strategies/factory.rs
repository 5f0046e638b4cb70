//! Builds boxed `TableStrategy` values from a `ComponentConfig`.
//!
//! Unknown names are rejected here, at construction time, so a typo in a
//! config fails the run before any instrument is touched.

use crate::config::{ComponentConfig, ConfigError};
use crate::table::CLOSE;

use super::ohlc::{DropMissingOhlc, ForwardFillOhlc, InterpolateOhlc, PrevCloseOhlc};
use super::volume::{ForwardFillVolume, MeanVolume, ZeroVolume};
use super::{KeepMissing, TableStrategy};

// ─── Helpers ─────────────────────────────────────────────────────────

/// Extract an optional positive integer parameter.
fn param_count(config: &ComponentConfig, name: &str) -> Result<Option<usize>, ConfigError> {
    match config.params.get(name) {
        None => Ok(None),
        Some(&v) if v.is_finite() && v >= 1.0 && v.fract() == 0.0 => Ok(Some(v as usize)),
        Some(&v) => Err(ConfigError::InvalidParameter {
            strategy: config.component_type.clone(),
            param: name.to_string(),
            reason: format!("expected a positive integer, got {v}"),
        }),
    }
}

// ─── OHLC factory ────────────────────────────────────────────────────

/// Create a price fill strategy.
///
/// Names: `ffill`, `prev_close`, `interpolate` (alias `interp`), `drop`,
/// `keep_na`.
pub fn create_ohlc_strategy(
    config: &ComponentConfig,
) -> Result<Box<dyn TableStrategy>, ConfigError> {
    match config.component_type.as_str() {
        "ffill" => Ok(Box::new(ForwardFillOhlc)),
        "prev_close" => Ok(Box::new(PrevCloseOhlc)),
        "interpolate" | "interp" => {
            let limit = param_count(config, "limit")?;
            Ok(Box::new(InterpolateOhlc::new(limit)))
        }
        "drop" => {
            let subset = match &config.subset {
                Some(cols) if cols.is_empty() => {
                    return Err(ConfigError::InvalidParameter {
                        strategy: config.component_type.clone(),
                        param: "subset".into(),
                        reason: "must name at least one column".into(),
                    })
                }
                Some(cols) => cols.clone(),
                None => vec![CLOSE.to_string()],
            };
            Ok(Box::new(DropMissingOhlc::new(subset)))
        }
        "keep_na" => Ok(Box::new(KeepMissing)),
        other => Err(ConfigError::UnknownOhlcStrategy(other.to_string())),
    }
}

// ─── Volume factory ──────────────────────────────────────────────────

/// Create a volume fill strategy.
///
/// Names: `zero`, `mean`, `ffill`, `keep_na`.
pub fn create_volume_strategy(
    config: &ComponentConfig,
) -> Result<Box<dyn TableStrategy>, ConfigError> {
    match config.component_type.as_str() {
        "zero" => Ok(Box::new(ZeroVolume)),
        "mean" => Ok(Box::new(MeanVolume)),
        "ffill" => Ok(Box::new(ForwardFillVolume)),
        "keep_na" => Ok(Box::new(KeepMissing)),
        other => Err(ConfigError::UnknownVolumeStrategy(other.to_string())),
    }
}
