//! Serializable cleaner configuration.
//!
//! Loaded from TOML. The settings may sit at the top level or under a
//! `[qclean]` table. Validation happens when a `Cleaner` is built, so a bad
//! config never reaches the first instrument.

use crate::anomaly::AnomalyMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown OHLC strategy: {0}")]
    UnknownOhlcStrategy(String),

    #[error("unknown volume strategy: {0}")]
    UnknownVolumeStrategy(String),

    #[error("invalid anomaly mode '{0}' (expected flag, clip or drop)")]
    InvalidAnomalyMode(String),

    #[error("{name} out of range: {value} ({expected})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("invalid parameter '{param}' for strategy '{strategy}': {reason}")]
    InvalidParameter {
        strategy: String,
        param: String,
        reason: String,
    },

    #[error("read config file: {0}")]
    Read(String),

    #[error("parse config: {0}")]
    Parse(String),

    #[error("serialize config: {0}")]
    Serialize(String),
}

/// A named strategy plus its parameters.
///
/// In TOML either a bare name (`ohlc_strategy = "ffill"`) or a table
/// (`ohlc_strategy = { component_type = "interpolate", params = { limit = 3 } }`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "ComponentConfigRepr")]
pub struct ComponentConfig {
    pub component_type: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, f64>,
    /// Column subset, used by the `drop` OHLC strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subset: Option<Vec<String>>,
}

impl ComponentConfig {
    pub fn named(component_type: impl Into<String>) -> Self {
        Self {
            component_type: component_type.into(),
            params: BTreeMap::new(),
            subset: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn with_subset<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.subset = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ComponentConfigRepr {
    Name(String),
    Full {
        component_type: String,
        #[serde(default)]
        params: BTreeMap<String, f64>,
        #[serde(default)]
        subset: Option<Vec<String>>,
    },
}

impl From<ComponentConfigRepr> for ComponentConfig {
    fn from(repr: ComponentConfigRepr) -> Self {
        match repr {
            ComponentConfigRepr::Name(name) => ComponentConfig::named(name),
            ComponentConfigRepr::Full {
                component_type,
                params,
                subset,
            } => ComponentConfig {
                component_type,
                params,
                subset,
            },
        }
    }
}

/// Anomaly detector settings. Missing keys take the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Relative close-to-close change above which a row is a price anomaly.
    pub price_jump_threshold: f64,
    /// Multiple of the median volume above which a row is a volume anomaly.
    pub volume_spike_factor: f64,
    /// `flag`, `clip` or `drop`; anything else fails at load.
    pub mode: AnomalyMode,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            price_jump_threshold: 0.5,
            volume_spike_factor: 10.0,
            mode: AnomalyMode::Flag,
        }
    }
}

/// Complete cleaner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanerConfig {
    /// Instruments whose missing rate exceeds this are dropped.
    #[serde(default = "default_missing_threshold")]
    pub missing_threshold: f64,

    /// Raw parquet used when the CLI gets no `--input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_parquet: Option<PathBuf>,

    /// Output directory used when the CLI gets no `--output-dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_provider_dir: Option<PathBuf>,

    #[serde(default = "default_ohlc_strategy")]
    pub ohlc_strategy: ComponentConfig,

    #[serde(default = "default_volume_strategy")]
    pub volume_strategy: ComponentConfig,

    /// No anomaly stage when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<AnomalyConfig>,
}

fn default_ohlc_strategy() -> ComponentConfig {
    ComponentConfig::named("ffill")
}

fn default_volume_strategy() -> ComponentConfig {
    ComponentConfig::named("zero")
}

fn default_missing_threshold() -> f64 {
    0.3
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            missing_threshold: default_missing_threshold(),
            ohlc_strategy: default_ohlc_strategy(),
            volume_strategy: default_volume_strategy(),
            anomaly: None,
            input_parquet: None,
            output_provider_dir: None,
        }
    }
}

impl CleanerConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse a config from TOML, accepting a `[qclean]` section or top-level keys.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut root: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let section = match root.remove("qclean") {
            Some(toml::Value::Table(section)) => section,
            Some(other) => {
                return Err(ConfigError::Parse(format!(
                    "[qclean] must be a table, got {}",
                    other.type_str()
                )))
            }
            None => root,
        };
        toml::Value::Table(section)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Check the scalar ranges. Strategy names and anomaly modes are checked
    /// by the factory when the cleaner is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.missing_threshold) {
            return Err(ConfigError::OutOfRange {
                name: "missing_threshold",
                value: self.missing_threshold,
                expected: "0 <= x <= 1",
            });
        }
        Ok(())
    }

    /// BLAKE3 hex digest of the cleaning settings in canonical JSON form.
    ///
    /// Two runs with identical settings share a hash; stamped into reports.
    /// The input and output paths are not cleaning settings and are left out.
    pub fn config_hash(&self) -> String {
        let settings = Self {
            input_parquet: None,
            output_provider_dir: None,
            ..self.clone()
        };
        // BTreeMap params keep key order deterministic.
        let json = serde_json::to_string(&settings).expect("CleanerConfig serialization failed");
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}
