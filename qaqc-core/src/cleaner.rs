//! Per-instrument cleaning pipeline and the batch driver.
//!
//! Stages run in a fixed order:
//! align → price fill → volume fill → anomaly handling → scoring → keep/drop.
//!
//! An instrument is dropped when its missing rate is strictly above
//! `missing_threshold`; a rate equal to the threshold is kept.

use crate::anomaly::AnomalyDetector;
use crate::calendar::{CalendarAligner, TradingCalendar};
use crate::config::{CleanerConfig, ConfigError};
use crate::quality::{QualityMetrics, QualityReporter};
use crate::strategies::{create_ohlc_strategy, create_volume_strategy, TableStrategy};
use crate::table::TimeSeriesTable;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Drop reason recorded when the missing rate is over the threshold.
pub const MISSING_THRESHOLD_EXCEEDED: &str = "missing_threshold_exceeded";

/// Pipeline states for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleaningStage {
    Aligned,
    PriceFilled,
    VolumeFilled,
    AnomalyHandled,
    Scored,
    Kept,
    Dropped,
}

impl fmt::Display for CleaningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleaningStage::Aligned => "aligned",
            CleaningStage::PriceFilled => "price_filled",
            CleaningStage::VolumeFilled => "volume_filled",
            CleaningStage::AnomalyHandled => "anomaly_handled",
            CleaningStage::Scored => "scored",
            CleaningStage::Kept => "kept",
            CleaningStage::Dropped => "dropped",
        };
        f.write_str(s)
    }
}

/// Per-instrument verdict.
///
/// `dropped` is true exactly when `drop_reason` is set; both are fixed at
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleaningInfo {
    instrument_id: String,
    quality: QualityMetrics,
    dropped: bool,
    drop_reason: Option<String>,
}

impl CleaningInfo {
    pub fn kept(instrument_id: impl Into<String>, quality: QualityMetrics) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            quality,
            dropped: false,
            drop_reason: None,
        }
    }

    pub fn dropped(
        instrument_id: impl Into<String>,
        quality: QualityMetrics,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            quality,
            dropped: true,
            drop_reason: Some(reason.into()),
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn quality(&self) -> &QualityMetrics {
        &self.quality
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn drop_reason(&self) -> Option<&str> {
        self.drop_reason.as_deref()
    }
}

/// Result of cleaning one instrument. `table` is `None` when dropped.
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub table: Option<TimeSeriesTable>,
    pub info: CleaningInfo,
}

/// Result of cleaning many instruments.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Kept instruments only.
    pub cleaned: BTreeMap<String, TimeSeriesTable>,
    /// Every instrument, kept or dropped.
    pub infos: BTreeMap<String, CleaningInfo>,
}

impl BatchOutcome {
    pub fn kept_count(&self) -> usize {
        self.cleaned.len()
    }

    pub fn dropped_count(&self) -> usize {
        self.infos.values().filter(|i| i.is_dropped()).count()
    }
}

/// The cleaning pipeline. Built once per run; shared read-only by workers.
pub struct Cleaner {
    aligner: CalendarAligner,
    ohlc: Box<dyn TableStrategy>,
    volume: Box<dyn TableStrategy>,
    anomaly: Option<AnomalyDetector>,
    reporter: QualityReporter,
    missing_threshold: f64,
    parallel: bool,
}

impl fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleaner")
            .field("calendar_len", &self.aligner.calendar().len())
            .field("ohlc", &self.ohlc.name())
            .field("volume", &self.volume.name())
            .field("anomaly", &self.anomaly)
            .field("missing_threshold", &self.missing_threshold)
            .field("parallel", &self.parallel)
            .finish()
    }
}

impl Cleaner {
    /// Build the pipeline, validating the whole config up front.
    pub fn new(calendar: Arc<TradingCalendar>, config: &CleanerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ohlc = create_ohlc_strategy(&config.ohlc_strategy)?;
        let volume = create_volume_strategy(&config.volume_strategy)?;
        let anomaly = config
            .anomaly
            .as_ref()
            .map(AnomalyDetector::from_config)
            .transpose()?;
        let anomaly_mode = anomaly.as_ref().map(|a| a.mode().to_string());
        debug!(
            ohlc = ohlc.name(),
            volume = volume.name(),
            anomaly = anomaly_mode.as_deref(),
            "cleaner built"
        );

        Ok(Self {
            aligner: CalendarAligner::new(calendar),
            ohlc,
            volume,
            anomaly,
            reporter: QualityReporter,
            missing_threshold: config.missing_threshold,
            parallel: true,
        })
    }

    /// Enables or disables parallel batch execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn calendar(&self) -> &TradingCalendar {
        self.aligner.calendar()
    }

    pub fn missing_threshold(&self) -> f64 {
        self.missing_threshold
    }

    /// Clean a single instrument.
    pub fn clean_one(&self, instrument_id: &str, raw: TimeSeriesTable) -> CleanOutcome {
        let trace = |stage: CleaningStage, table: &TimeSeriesTable| {
            debug!(instrument = instrument_id, %stage, rows = table.len(), "stage complete");
        };

        let table = self.aligner.align(&raw);
        trace(CleaningStage::Aligned, &table);

        let table = self.ohlc.apply(table);
        trace(CleaningStage::PriceFilled, &table);

        let table = self.volume.apply(table);
        trace(CleaningStage::VolumeFilled, &table);

        let table = match &self.anomaly {
            Some(detector) => detector.apply(table),
            None => table,
        };
        trace(CleaningStage::AnomalyHandled, &table);

        let quality = self.reporter.report(&table);
        trace(CleaningStage::Scored, &table);

        if quality.missing_rate > self.missing_threshold {
            info!(
                instrument = instrument_id,
                stage = %CleaningStage::Dropped,
                missing_rate = quality.missing_rate,
                threshold = self.missing_threshold,
                "instrument dropped"
            );
            return CleanOutcome {
                table: None,
                info: CleaningInfo::dropped(instrument_id, quality, MISSING_THRESHOLD_EXCEEDED),
            };
        }

        debug!(
            instrument = instrument_id,
            stage = %CleaningStage::Kept,
            missing_rate = quality.missing_rate,
            "instrument kept"
        );
        CleanOutcome {
            table: Some(table),
            info: CleaningInfo::kept(instrument_id, quality),
        }
    }

    /// Clean every instrument independently.
    ///
    /// Keyed by instrument id, so every id yields exactly one outcome and
    /// `cleaned` only ever holds instruments whose info is kept. Runs on the
    /// rayon pool unless parallelism was disabled; the result is the same
    /// either way.
    pub fn clean_many(&self, tables: BTreeMap<String, TimeSeriesTable>) -> BatchOutcome {
        let items: Vec<(String, TimeSeriesTable)> = tables.into_iter().collect();
        let total = items.len();

        let outcomes: Vec<(String, CleanOutcome)> = if self.parallel {
            items
                .into_par_iter()
                .map(|(id, table)| {
                    let outcome = self.clean_one(&id, table);
                    (id, outcome)
                })
                .collect()
        } else {
            items
                .into_iter()
                .map(|(id, table)| {
                    let outcome = self.clean_one(&id, table);
                    (id, outcome)
                })
                .collect()
        };

        let mut batch = BatchOutcome::default();
        for (id, outcome) in outcomes {
            if let Some(table) = outcome.table {
                batch.cleaned.insert(id.clone(), table);
            }
            batch.infos.insert(id, outcome.info);
        }

        info!(
            total,
            kept = batch.kept_count(),
            dropped = batch.dropped_count(),
            "batch cleaning complete"
        );
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnomalyConfig, ComponentConfig};
    use crate::table::{ANOMALY_FLAG, CLOSE, VOLUME};
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn calendar() -> Arc<TradingCalendar> {
        Arc::new(TradingCalendar::new(vec![d(6), d(7), d(8), d(9)]))
    }

    fn full_table() -> TimeSeriesTable {
        TimeSeriesTable::new(vec![d(6), d(7), d(8), d(9)])
            .with_numeric(CLOSE, vec![Some(10.0), Some(10.5), Some(11.0), Some(11.5)])
            .unwrap()
            .with_numeric(VOLUME, vec![Some(100.0); 4])
            .unwrap()
    }

    #[test]
    fn construction_rejects_unknown_strategy() {
        let cfg = CleanerConfig {
            ohlc_strategy: ComponentConfig::named("bfill"),
            ..CleanerConfig::default()
        };
        assert_eq!(
            Cleaner::new(calendar(), &cfg).err(),
            Some(ConfigError::UnknownOhlcStrategy("bfill".into()))
        );
    }

    #[test]
    fn construction_rejects_invalid_anomaly_threshold() {
        let cfg = CleanerConfig {
            anomaly: Some(AnomalyConfig {
                volume_spike_factor: -1.0,
                ..AnomalyConfig::default()
            }),
            ..CleanerConfig::default()
        };
        assert!(matches!(
            Cleaner::new(calendar(), &cfg).err(),
            Some(ConfigError::OutOfRange {
                name: "volume_spike_factor",
                ..
            })
        ));
    }

    #[test]
    fn complete_instrument_is_kept() {
        let cleaner = Cleaner::new(calendar(), &CleanerConfig::default()).unwrap();
        let outcome = cleaner.clean_one("AAA", full_table());

        assert!(!outcome.info.is_dropped());
        assert_eq!(outcome.info.drop_reason(), None);
        assert_eq!(outcome.info.instrument_id(), "AAA");
        assert_eq!(outcome.table.unwrap().len(), 4);
    }

    #[test]
    fn missing_rate_equal_to_threshold_is_kept() {
        // One of four rows stays null after keep_na fills: rate 0.25.
        let cfg = CleanerConfig {
            ohlc_strategy: ComponentConfig::named("keep_na"),
            volume_strategy: ComponentConfig::named("keep_na"),
            missing_threshold: 0.25,
            ..CleanerConfig::default()
        };
        let raw = full_table().retain_rows(&[false, true, true, true]);
        let outcome = Cleaner::new(calendar(), &cfg).unwrap().clean_one("AAA", raw);

        assert_eq!(outcome.info.quality().missing_rate, 0.25);
        assert!(!outcome.info.is_dropped());
        assert!(outcome.table.is_some());
    }

    #[test]
    fn missing_rate_above_threshold_is_dropped() {
        let cfg = CleanerConfig {
            ohlc_strategy: ComponentConfig::named("keep_na"),
            missing_threshold: 0.2,
            ..CleanerConfig::default()
        };
        let raw = full_table().retain_rows(&[false, true, true, true]);
        let outcome = Cleaner::new(calendar(), &cfg).unwrap().clean_one("AAA", raw);

        assert!(outcome.table.is_none());
        assert!(outcome.info.is_dropped());
        assert_eq!(outcome.info.drop_reason(), Some(MISSING_THRESHOLD_EXCEEDED));
    }

    #[test]
    fn empty_input_is_dropped_not_an_error() {
        let cleaner = Cleaner::new(
            Arc::new(TradingCalendar::default()),
            &CleanerConfig::default(),
        )
        .unwrap();
        let outcome = cleaner.clean_one("EMPTY", full_table());
        assert!(outcome.info.is_dropped());
        assert_eq!(outcome.info.quality().total_rows, 0);
    }

    #[test]
    fn anomaly_stage_runs_when_configured() {
        let cfg = CleanerConfig {
            anomaly: Some(AnomalyConfig::default()),
            ..CleanerConfig::default()
        };
        let outcome = Cleaner::new(calendar(), &cfg).unwrap().clean_one("AAA", full_table());
        let table = outcome.table.unwrap();
        assert!(table.has_column(ANOMALY_FLAG));
        assert_eq!(outcome.info.quality().anomaly_rate, Some(0.0));
    }

    #[test]
    fn clean_many_splits_kept_and_dropped() {
        let cfg = CleanerConfig {
            ohlc_strategy: ComponentConfig::named("keep_na"),
            missing_threshold: 0.1,
            ..CleanerConfig::default()
        };

        let mut input = BTreeMap::new();
        input.insert("FULL".to_string(), full_table());
        input.insert(
            "GAPPY".to_string(),
            full_table().retain_rows(&[true, false, true, true]),
        );

        for parallel in [true, false] {
            let cleaner = Cleaner::new(calendar(), &cfg)
                .unwrap()
                .with_parallelism(parallel);
            let batch = cleaner.clean_many(input.clone());

            assert_eq!(batch.infos.len(), 2);
            assert_eq!(batch.kept_count(), 1);
            assert_eq!(batch.dropped_count(), 1);
            assert!(batch.cleaned.contains_key("FULL"));
            assert!(!batch.cleaned.contains_key("GAPPY"));
            assert!(batch.infos["GAPPY"].is_dropped());
        }
    }

    #[test]
    fn repeated_id_yields_one_consistent_outcome() {
        let cfg = CleanerConfig {
            ohlc_strategy: ComponentConfig::named("keep_na"),
            missing_threshold: 0.0,
            ..CleanerConfig::default()
        };
        // A later row for the same id replaces the earlier one.
        let input: BTreeMap<String, TimeSeriesTable> = vec![
            ("X".to_string(), full_table()),
            ("X".to_string(), full_table().retain_rows(&[true, false, true, true])),
        ]
        .into_iter()
        .collect();

        for parallel in [true, false] {
            let batch = Cleaner::new(calendar(), &cfg)
                .unwrap()
                .with_parallelism(parallel)
                .clean_many(input.clone());

            assert_eq!(batch.infos.len(), 1);
            assert!(batch.infos["X"].is_dropped());
            assert!(!batch.cleaned.contains_key("X"));
            for (id, info) in &batch.infos {
                assert_eq!(batch.cleaned.contains_key(id), !info.is_dropped());
            }
        }
    }

    #[test]
    fn cleaner_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Cleaner>();
        assert_send_sync::<CleaningInfo>();
        assert_send_sync::<BatchOutcome>();
    }
}
