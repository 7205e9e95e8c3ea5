//! # Calculation History
//!
//! Committed calculations, newest first, aged out by a retention window.
//!
//! ## Invariants
//!
//! - Entries are sorted by `timestamp`, descending. New entries are always
//!   prepended and their timestamp is never earlier than the current newest.
//! - Pruning is a pure filter: an entry survives when
//!   `now - timestamp <= retention_days * 86_400_000`. A retention of `0`
//!   means "forever" and pruning does nothing.
//! - Pruning runs after every [`HistoryManager::record`] and every
//!   [`HistoryManager::set_retention`], so no background timer is needed.
//!
//! ```rust
//! use calcmaster::history::{HistoryManager, MILLIS_PER_DAY};
//! use calcmaster::Mode;
//!
//! let mut history = HistoryManager::new(1);
//! history.record("1+1", "2", Mode::Standard, 0);
//! history.record("2*3", "6", Mode::Standard, MILLIS_PER_DAY + 1);
//!
//! // The first entry is older than one day and was pruned by the second record.
//! assert_eq!(history.len(), 1);
//! assert_eq!(history.entries()[0].result, "6");
//! ```

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::calculator::Mode;

pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// Retention used until the user picks another one.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// The retention choices offered in settings: 1 day, 7 days, 30 days, forever.
pub const RETENTION_PRESETS: [u32; 4] = [1, 7, 30, 0];

/// One committed calculation. Immutable once recorded.
///
/// Serializes as `{"expression","result","timestamp","mode"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The buffer as it was before evaluation.
    pub expression: String,
    /// The stringified result.
    pub result: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub mode: Mode,
}

impl HistoryEntry {
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Age in milliseconds relative to `now`. Negative for future timestamps.
    ///
    /// Saturates, so a corrupt stored timestamp reads as very old or very new.
    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.timestamp)
    }
}

/// Entries sharing a calendar date, in history order.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryGroup<'a> {
    pub date: NaiveDate,
    pub entries: Vec<&'a HistoryEntry>,
}

/// Remove every entry older than `retention_days`. Returns how many were removed.
///
/// `retention_days == 0` keeps everything.
pub fn prune_entries(entries: &mut Vec<HistoryEntry>, now: i64, retention_days: u32) -> usize {
    if retention_days == 0 {
        return 0;
    }
    let window = i64::from(retention_days) * MILLIS_PER_DAY;
    let before = entries.len();
    entries.retain(|entry| entry.age_millis(now) <= window);
    before - entries.len()
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryManager {
    entries: Vec<HistoryEntry>,
    retention_days: u32,
}

impl HistoryManager {
    pub fn new(retention_days: u32) -> Self {
        Self {
            entries: Vec::new(),
            retention_days,
        }
    }

    /// Rebuild from stored entries. The list is re-sorted newest first so a
    /// hand-edited or legacy store cannot break the ordering invariant.
    pub fn from_entries(mut entries: Vec<HistoryEntry>, retention_days: u32) -> Self {
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Self {
            entries,
            retention_days,
        }
    }

    /// Prepend a new entry stamped `now`, then prune.
    pub fn record(
        &mut self,
        expression: impl Into<String>,
        result: impl Into<String>,
        mode: Mode,
        now: i64,
    ) {
        let timestamp = match self.entries.first() {
            Some(newest) if newest.timestamp > now => newest.timestamp,
            _ => now,
        };
        self.entries.insert(
            0,
            HistoryEntry {
                expression: expression.into(),
                result: result.into(),
                timestamp,
                mode,
            },
        );
        self.prune(now);
    }

    /// Apply the current retention window relative to `now`.
    pub fn prune(&mut self, now: i64) -> usize {
        let removed = prune_entries(&mut self.entries, now, self.retention_days);
        if removed > 0 {
            log::debug!(
                "Pruned {} history entries older than {} days",
                removed,
                self.retention_days
            );
        }
        removed
    }

    /// Change the retention window and prune immediately.
    pub fn set_retention(&mut self, days: u32, now: i64) -> usize {
        self.retention_days = days;
        self.prune(now)
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Newest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Group entries by calendar date in `tz`, newest date first.
    ///
    /// Derived on demand; nothing about the grouping is stored.
    pub fn group_by_date<Tz: TimeZone>(&self, tz: &Tz) -> Vec<HistoryGroup<'_>> {
        let mut groups: Vec<HistoryGroup<'_>> = Vec::new();
        for entry in &self.entries {
            let date = match tz.timestamp_millis_opt(entry.timestamp).single() {
                Some(moment) => moment.date_naive(),
                None => continue,
            };
            match groups.last_mut() {
                Some(group) if group.date == date => group.entries.push(entry),
                _ => groups.push(HistoryGroup {
                    date,
                    entries: vec![entry],
                }),
            }
        }
        groups
    }

    /// The JSON array stored under the history key.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.entries)
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS)
    }
}
