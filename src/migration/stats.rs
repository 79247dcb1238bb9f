//! Run statistics.
//!
//! Counters are bumped concurrently from leaf tasks, so they live in atomics and
//! a `DashMap` tally of skipped references. `MigrationReport` is the snapshot
//! handed back to the caller at the end of a run.

use crate::models::StateRef;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters for one run.
#[derive(Default)]
pub struct RunStats {
    visited: AtomicU64,
    migrated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    rolled_back_records: AtomicU64,
    chunks_committed: AtomicU64,
    chunks_rolled_back: AtomicU64,
    pages: AtomicU64,
    skip_tally: DashMap<StateRef, u32>,
}

impl RunStats {
    pub fn record_visited(&self) {
        self.visited.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a skip and return how many times this state has skipped in the run.
    pub fn record_skipped(&self, state_ref: &StateRef) -> u32 {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        let mut times = self.skip_tally.entry(state_ref.clone()).or_insert(0);
        *times += 1;
        *times
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A chunk that never reached its transform: every record is visited and
    /// failed.
    pub fn chunk_abandoned(&self, records: usize) {
        self.visited.fetch_add(records as u64, Ordering::Relaxed);
        self.failed.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn chunk_committed(&self, migrated: usize) {
        self.chunks_committed.fetch_add(1, Ordering::Relaxed);
        self.migrated.fetch_add(migrated as u64, Ordering::Relaxed);
    }

    /// The chunk's commit failed, so the work of `lost` records did not persist.
    pub fn chunk_rolled_back(&self, lost: usize) {
        self.chunks_rolled_back.fetch_add(1, Ordering::Relaxed);
        self.rolled_back_records
            .fetch_add(lost as u64, Ordering::Relaxed);
    }

    pub fn page_processed(&self) {
        self.pages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn times_skipped(&self, state_ref: &StateRef) -> u32 {
        self.skip_tally.get(state_ref).map(|times| *times).unwrap_or(0)
    }

    pub fn report(&self, started_at: DateTime<Utc>, elapsed: Duration) -> MigrationReport {
        MigrationReport {
            total_records: self.visited.load(Ordering::Relaxed),
            pages_processed: self.pages.load(Ordering::Relaxed),
            migrated: self.migrated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            distinct_skipped: self.skip_tally.len() as u64,
            failed: self.failed.load(Ordering::Relaxed),
            rolled_back_records: self.rolled_back_records.load(Ordering::Relaxed),
            chunks_committed: self.chunks_committed.load(Ordering::Relaxed),
            chunks_rolled_back: self.chunks_rolled_back.load(Ordering::Relaxed),
            started_at,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Records seen, counting every revisit of a skipped state.
    pub total_records: u64,
    pub pages_processed: u64,
    /// Records whose transform succeeded in a committed chunk.
    pub migrated: u64,
    pub skipped: u64,
    pub distinct_skipped: u64,
    pub failed: u64,
    pub rolled_back_records: u64,
    pub chunks_committed: u64,
    pub chunks_rolled_back: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Vault state migration:")?;
        writeln!(f, "  records seen: {}", self.total_records)?;
        writeln!(f, "  pages processed: {}", self.pages_processed)?;
        writeln!(f, "  migrated: {}", self.migrated)?;
        writeln!(
            f,
            "  skipped: {} ({} distinct states)",
            self.skipped, self.distinct_skipped
        )?;
        writeln!(f, "  failed: {}", self.failed)?;
        writeln!(
            f,
            "  chunks: {} committed, {} rolled back ({} records lost)",
            self.chunks_committed, self.chunks_rolled_back, self.rolled_back_records
        )?;
        writeln!(f, "  elapsed: {}ms", self.elapsed_ms)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_tally_counts_repeats() {
        let stats = RunStats::default();
        let state_ref = StateRef::new("a", 0);
        assert_eq!(stats.record_skipped(&state_ref), 1);
        assert_eq!(stats.record_skipped(&state_ref), 2);
        stats.record_skipped(&StateRef::new("b", 0));

        let report = stats.report(Utc::now(), Duration::from_millis(5));
        assert_eq!(report.skipped, 3);
        assert_eq!(report.distinct_skipped, 2);
        assert_eq!(stats.times_skipped(&state_ref), 2);
    }

    #[test]
    fn test_report_display() {
        let stats = RunStats::default();
        stats.record_visited();
        stats.chunk_committed(1);
        stats.page_processed();

        let display = format!("{}", stats.report(Utc::now(), Duration::ZERO));
        assert!(display.contains("records seen: 1"));
        assert!(display.contains("pages processed: 1"));
        assert!(display.contains("1 committed, 0 rolled back"));
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = RunStats::default().report(Utc::now(), Duration::ZERO);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["totalRecords"], 0);
        assert_eq!(json["pagesProcessed"], 0);
    }
}
