use super::context::SharedContext;
use super::scope::{ScopeOutcome, TransactionScope};
use super::stats::RunStats;
use super::transform::Transform;
use crate::error::RecordError;
use crate::models::VaultRecord;
use crate::store::{Store, Transaction};

/// Where to split a chunk of `len` records, or `None` when it is small enough
/// to process directly.
///
/// The left half gets the extra record of an odd split. A threshold of 0 is
/// treated as 1 so recursion always bottoms out.
pub fn split_point(len: usize, threshold: usize) -> Option<usize> {
    if len > threshold.max(1) {
        Some(len.div_ceil(2))
    } else {
        None
    }
}

/// Fork/join processing of one page.
///
/// Must be driven from inside the run's rayon pool (`ThreadPool::install`) so the
/// `rayon::join` forks land on it.
pub struct PageProcessor<'a, S: Store, T: Transform> {
    store: &'a S,
    transform: &'a T,
    context: &'a SharedContext<T::Context>,
    stats: &'a RunStats,
    split_threshold: usize,
}

impl<'a, S: Store, T: Transform> PageProcessor<'a, S, T> {
    pub fn new(
        store: &'a S,
        transform: &'a T,
        context: &'a SharedContext<T::Context>,
        stats: &'a RunStats,
        split_threshold: usize,
    ) -> Self {
        Self {
            store,
            transform,
            context,
            stats,
            split_threshold,
        }
    }

    /// Process `records`, returning once every chunk has finished.
    pub fn process(&self, records: &[VaultRecord]) {
        match split_point(records.len(), self.split_threshold) {
            Some(mid) => {
                let (left, right) = records.split_at(mid);
                rayon::join(|| self.process(left), || self.process(right));
            }
            None => self.process_chunk(records),
        }
    }

    fn process_chunk(&self, chunk: &[VaultRecord]) {
        let Some(first) = chunk.first() else {
            return;
        };
        let label = format!("chunk of {} from {}", chunk.len(), first.state_ref);

        let context = match self
            .context
            .acquire(|| self.transform.establish_context())
        {
            Ok(context) => context,
            Err(err) => {
                log::error!("{}: transform context unavailable: {}", label, err);
                self.stats.chunk_abandoned(chunk.len());
                return;
            }
        };

        let mut scope = match TransactionScope::begin(self.store, label) {
            Ok(scope) => scope,
            Err(err) => {
                log::error!(
                    "chunk of {} from {}: failed to begin transaction: {}",
                    chunk.len(),
                    first.state_ref,
                    err
                );
                self.stats.chunk_abandoned(chunk.len());
                return;
            }
        };

        let mut migrated = 0;
        let mut poisoned = false;
        for record in chunk {
            self.stats.record_visited();
            let tx = scope.transaction();

            // Each record runs under its own savepoint so a failed statement
            // only undoes that record instead of aborting the whole chunk.
            if let Err(err) = tx.savepoint() {
                self.stats.record_failed();
                poisoned = true;
                log::error!(
                    "failed to migrate vault state {}: savepoint: {}",
                    record.state_ref,
                    err
                );
                continue;
            }

            let outcome = match self.transform.apply(&context, &mut *tx, record) {
                Ok(()) => tx.release_savepoint().map_err(|err| {
                    poisoned = true;
                    RecordError::from(err)
                }),
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback_to_savepoint() {
                        poisoned = true;
                        log::error!(
                            "vault state {}: rollback to savepoint failed: {}",
                            record.state_ref,
                            rollback_err
                        );
                    }
                    Err(err)
                }
            };

            match outcome {
                Ok(()) => migrated += 1,
                Err(RecordError::Skip { reason }) => {
                    let times = self.stats.record_skipped(&record.state_ref);
                    log::warn!(
                        "skipping vault state {} (skip #{} this run): {}",
                        record.state_ref,
                        times,
                        reason
                    );
                }
                Err(err) => {
                    self.stats.record_failed();
                    log::error!("failed to migrate vault state {}: {}", record.state_ref, err);
                }
            }
        }

        // A transaction left aborted would report a successful commit while
        // persisting nothing.
        if poisoned {
            log::error!(
                "{}: transaction unusable after a savepoint failure, rolling back",
                scope.label()
            );
            scope.abandon();
            self.stats.chunk_rolled_back(migrated);
            return;
        }

        match scope.complete() {
            ScopeOutcome::Committed => self.stats.chunk_committed(migrated),
            ScopeOutcome::CommitFailed => self.stats.chunk_rolled_back(migrated),
        }
    }
}
