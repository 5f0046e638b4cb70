//! Trading calendar and calendar alignment.
//!
//! Every instrument is reindexed onto the same calendar. Calendar dates the
//! instrument has no row for become all-null rows; rows dated off-calendar
//! are discarded.

use crate::strategies::TableStrategy;
use crate::table::TimeSeriesTable;
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Ordered, deduplicated set of trading session dates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
}

impl TradingCalendar {
    /// Build a calendar from arbitrary dates. Sorts and deduplicates.
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        let unique: BTreeSet<NaiveDate> = dates.into_iter().collect();
        Self {
            dates: unique.into_iter().collect(),
        }
    }

    /// Weekdays from `start` to `end`, both inclusive.
    pub fn business_days(start: NaiveDate, end: NaiveDate) -> Self {
        let dates = start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .collect();
        Self { dates }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.binary_search(&date).is_ok()
    }
}

/// Reindexes tables onto a shared trading calendar.
#[derive(Debug, Clone)]
pub struct CalendarAligner {
    calendar: Arc<TradingCalendar>,
}

impl CalendarAligner {
    pub fn new(calendar: Arc<TradingCalendar>) -> Self {
        Self { calendar }
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// Produce a table whose index is exactly the calendar.
    ///
    /// If the input repeats a date, its first row is used.
    pub fn align(&self, table: &TimeSeriesTable) -> TimeSeriesTable {
        let mut position_of: HashMap<NaiveDate, usize> = HashMap::with_capacity(table.len());
        for (i, date) in table.index().iter().enumerate() {
            position_of.entry(*date).or_insert(i);
        }

        let positions: Vec<Option<usize>> = self
            .calendar
            .dates()
            .iter()
            .map(|date| position_of.get(date).copied())
            .collect();

        table.gather_rows(self.calendar.dates().to_vec(), &positions)
    }
}

impl TableStrategy for CalendarAligner {
    fn name(&self) -> &str {
        "align_calendar"
    }

    fn apply(&self, table: TimeSeriesTable) -> TimeSeriesTable {
        self.align(&table)
    }
}
