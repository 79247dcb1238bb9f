use super::context::SharedContext;
use super::cursor::StateCursor;
use super::processor::PageProcessor;
use super::stats::{MigrationReport, RunStats};
use super::transform::Transform;
use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::store::Store;
use chrono::Utc;
use std::time::Instant;

/// Runs a migration over every undone vault state in a store.
///
/// Pages are processed strictly one after another; only the records within a
/// page fan out over the worker pool. The pool lives as long as the driver and
/// is reused by every run.
pub struct MigrationDriver<S: Store> {
    store: S,
    config: MigrationConfig,
    pool: rayon::ThreadPool,
}

impl<S: Store> MigrationDriver<S> {
    pub fn new(store: S, config: MigrationConfig) -> Result<Self, MigrationError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|index| format!("vault-migration-{}", index))
            .build()?;

        Ok(Self {
            store,
            config,
            pool,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Walk every undone state once through `transform`.
    ///
    /// Record-level failures are logged and counted in the report. An error is
    /// only returned when the store cannot be counted or paged at all.
    pub fn run<T: Transform>(&self, transform: &T) -> Result<MigrationReport, MigrationError> {
        let started_at = Utc::now();
        let timer = Instant::now();

        log::info!(
            "starting vault state migration (page size {}, split threshold {}, {} workers)",
            self.config.page_size,
            self.config.split_threshold,
            self.pool.current_num_threads()
        );

        let stats = RunStats::default();
        let context = SharedContext::new();
        let processor = PageProcessor::new(
            &self.store,
            transform,
            &context,
            &stats,
            self.config.split_threshold,
        );

        let mut cursor = StateCursor::open(&self.store, self.config.page_size)?;
        let total = cursor.total();

        while let Some(page) = cursor.next_page()? {
            log::info!(
                "processing page {} with {} vault states ({} of {} reached)",
                page.number,
                page.records.len(),
                cursor.cursor_position().logical(),
                total
            );
            self.pool.install(|| processor.process(&page.records));
            stats.page_processed();
        }

        context.release_if_idle();

        let report = stats.report(started_at, timer.elapsed());
        log::info!(
            "vault state migration finished: {} records seen over {} pages, {} migrated, {} skipped, {} failed in {}ms",
            report.total_records,
            report.pages_processed,
            report.migrated,
            report.skipped,
            report.failed,
            report.elapsed_ms
        );
        Ok(report)
    }
}
