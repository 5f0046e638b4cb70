//! QAQC Core: cleaning and quality control for daily OHLCV tables.
//!
//! Each instrument passes through a fixed pipeline:
//! - Calendar alignment (one row per trading day, gaps become null rows)
//! - Price fill (forward fill, previous close, interpolation, drop, or none)
//! - Volume fill (zero, mean, forward fill, or none)
//! - Optional anomaly handling (flag, clip or drop jumps and spikes)
//! - Quality scoring and a keep/drop decision against a missing-rate threshold
//!
//! Core stages work on an in-memory [`table::TimeSeriesTable`]; the [`io`]
//! module converts to and from Parquet/CSV via polars.

pub mod anomaly;
pub mod calendar;
pub mod cleaner;
pub mod config;
pub mod io;
pub mod quality;
pub mod strategies;
pub mod table;

pub use anomaly::{AnomalyDetector, AnomalyMode, AnomalyScan};
pub use calendar::{CalendarAligner, TradingCalendar};
pub use cleaner::{
    BatchOutcome, CleanOutcome, Cleaner, CleaningInfo, CleaningStage, MISSING_THRESHOLD_EXCEEDED,
};
pub use config::{AnomalyConfig, CleanerConfig, ComponentConfig, ConfigError};
pub use quality::{QualityMetrics, QualityReporter};
pub use strategies::TableStrategy;
pub use table::TimeSeriesTable;
