//! Property tests for pipeline invariants.
//!
//! Uses proptest to verify:
//! 1. Alignment: output rows equal the calendar, in calendar order
//! 2. Forward fill idempotence: filling twice equals filling once
//! 3. DropMissing: no null close survives
//! 4. Clip: clipped rows sit inside the band around their previous close,
//!    and re-running detection after clipping finds no price anomaly
//! 5. Quality: completeness is `max(0, 1 - missing_rate)`

use chrono::NaiveDate;
use proptest::prelude::*;
use qaqc_core::strategies::{DropMissingOhlc, ForwardFillOhlc, ForwardFillVolume};
use qaqc_core::table::{CLOSE, OPEN, VOLUME};
use qaqc_core::{
    AnomalyDetector, AnomalyMode, CalendarAligner, QualityReporter, TableStrategy,
    TimeSeriesTable, TradingCalendar,
};
use std::sync::Arc;

// ─── Strategies (proptest) ───────────────────────────────────────────

fn day(offset: u16) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(offset as i64)
}

fn arb_dates(max: usize) -> impl Strategy<Value = Vec<NaiveDate>> {
    prop::collection::btree_set(0u16..400, 0..max)
        .prop_map(|set| set.into_iter().map(day).collect())
}

fn arb_cell() -> impl Strategy<Value = Option<f64>> {
    prop::option::weighted(0.7, 1.0..500.0_f64)
}

/// A sorted table with nullable open/close/volume columns.
fn arb_table(max_rows: usize) -> impl Strategy<Value = TimeSeriesTable> {
    arb_dates(max_rows).prop_flat_map(|dates| {
        let n = dates.len();
        (
            Just(dates),
            prop::collection::vec(arb_cell(), n),
            prop::collection::vec(arb_cell(), n),
            prop::collection::vec(arb_cell(), n),
        )
            .prop_map(|(dates, open, close, volume)| {
                TimeSeriesTable::new(dates)
                    .with_numeric(OPEN, open)
                    .unwrap()
                    .with_numeric(CLOSE, close)
                    .unwrap()
                    .with_numeric(VOLUME, volume)
                    .unwrap()
            })
    })
}

// ─── 1. Alignment ────────────────────────────────────────────────────

proptest! {
    /// The aligned table has exactly the calendar's rows, in its order.
    #[test]
    fn alignment_matches_calendar(
        table in arb_table(40),
        calendar_dates in arb_dates(40),
    ) {
        let calendar = Arc::new(TradingCalendar::new(calendar_dates));
        let aligned = CalendarAligner::new(calendar.clone()).align(&table);

        prop_assert_eq!(aligned.len(), calendar.len());
        prop_assert_eq!(aligned.index(), calendar.dates());

        // Values on shared dates are carried over untouched.
        let close = table.numeric(CLOSE).unwrap();
        let aligned_close = aligned.numeric(CLOSE).unwrap();
        for (i, date) in aligned.index().iter().enumerate() {
            match table.index().iter().position(|d| d == date) {
                Some(src) => prop_assert_eq!(aligned_close[i], close[src]),
                None => prop_assert_eq!(aligned_close[i], None),
            }
        }
    }
}

// ─── 2. Forward fill idempotence ─────────────────────────────────────

proptest! {
    #[test]
    fn ohlc_forward_fill_is_idempotent(table in arb_table(60)) {
        let once = ForwardFillOhlc.apply(table);
        let twice = ForwardFillOhlc.apply(once.clone());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn volume_forward_fill_is_idempotent(table in arb_table(60)) {
        let once = ForwardFillVolume.apply(table);
        let twice = ForwardFillVolume.apply(once.clone());
        prop_assert_eq!(once, twice);
    }
}

// ─── 3. DropMissing ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn drop_missing_leaves_no_null_close(table in arb_table(60)) {
        let before = table.numeric(CLOSE).unwrap().iter().filter(|v| v.is_some()).count();
        let out = DropMissingOhlc::new(vec![CLOSE.to_string()]).apply(table);

        let close = out.numeric(CLOSE).unwrap();
        prop_assert!(close.iter().all(Option::is_some));
        prop_assert_eq!(close.len(), before);
    }
}

// ─── 4. Clip ─────────────────────────────────────────────────────────

proptest! {
    /// Every other close is a fixed base. Bands come from the unclipped
    /// previous close, so each spiked row must land within `threshold` of base.
    #[test]
    fn clip_removes_isolated_price_anomalies(
        spikes in prop::collection::vec(0.01..20.0_f64, 1..20),
        threshold in 0.05..2.0_f64,
    ) {
        let base = 100.0;
        let close: Vec<Option<f64>> = spikes
            .iter()
            .flat_map(|m| [Some(base), Some(base * m)])
            .collect();
        let n = close.len();
        let table = TimeSeriesTable::new((0..n as u16).map(day).collect())
            .with_numeric(CLOSE, close)
            .unwrap();

        let clipper = AnomalyDetector::new(threshold, 10.0, AnomalyMode::Clip).unwrap();
        let clipped = clipper.process(table);
        let out = clipped.numeric(CLOSE).unwrap();

        for i in (1..n).step_by(2) {
            let change = (out[i].unwrap() - base).abs() / base;
            prop_assert!(change <= threshold + 1e-9, "row {} change {}", i, change);
        }
    }

    /// A flat run ending in one spike. Thresholds are exact binary fractions
    /// so the clamped close sits exactly on the band edge.
    #[test]
    fn clip_then_rescan_finds_no_price_anomaly(
        flat in 1usize..30,
        spike in 0.01..20.0_f64,
        threshold in prop::sample::select(vec![0.125, 0.25, 0.5, 0.75, 1.0, 1.5]),
    ) {
        let base = 100.0;
        let mut close = vec![Some(base); flat];
        close.push(Some(base * spike));
        let n = close.len();
        let table = TimeSeriesTable::new((0..n as u16).map(day).collect())
            .with_numeric(CLOSE, close)
            .unwrap();

        let clipper = AnomalyDetector::new(threshold, 10.0, AnomalyMode::Clip).unwrap();
        let clipped = clipper.process(table);

        let rescan = clipper.scan(&clipped).unwrap();
        prop_assert_eq!(rescan.price_count(), 0);
        prop_assert_eq!(&clipped.numeric(CLOSE).unwrap()[..flat], &vec![Some(base); flat][..]);
    }
}

// ─── 5. Quality ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn completeness_complements_missing_rate(table in arb_table(60)) {
        let metrics = QualityReporter.report(&table);

        prop_assert!((0.0..=1.0).contains(&metrics.missing_rate));
        prop_assert!((metrics.completeness - (1.0 - metrics.missing_rate).max(0.0)).abs() < 1e-12);
        prop_assert_eq!(metrics.total_rows, table.len());
        for rate in metrics.per_column_missing_rate.values() {
            prop_assert!(*rate <= metrics.missing_rate + 1e-12);
        }
    }
}
