//! In-process vault store.
//!
//! Mirrors the visibility rules the engine relies on in PostgreSQL: writes are
//! staged per transaction, become visible to other transactions only on commit,
//! and a transaction always sees its own staged writes.

use super::{Store, Transaction};
use crate::error::{StoreError, StoreResult};
use crate::models::{PartyLink, RecordFilter, Relevancy, StateRef, VaultRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type CommitFailure = Box<dyn Fn(&[PartyLink]) -> bool + Send + Sync>;
type StatementFailure = Box<dyn Fn(&StateRef) -> bool + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<StateRef, VaultRecord>,
    links: BTreeMap<StateRef, Vec<PartyLink>>,
}

impl MemoryState {
    fn is_done(&self, state_ref: &StateRef) -> bool {
        self.links.contains_key(state_ref)
    }

    fn apply_link(&mut self, link: PartyLink) {
        let links = self.links.entry(link.state_ref.clone()).or_default();
        if !links
            .iter()
            .any(|existing| existing.public_key_hash == link.public_key_hash)
        {
            links.push(link);
        }
    }
}

#[derive(Default)]
struct Counters {
    begun: AtomicUsize,
    open: AtomicUsize,
    page_queries: AtomicUsize,
    commits: AtomicUsize,
    failed_commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

struct Shared {
    state: RwLock<MemoryState>,
    counters: Counters,
    commit_failure: Mutex<Option<CommitFailure>>,
    statement_failure: Mutex<Option<StatementFailure>>,
}

/// Snapshot of the store's activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub transactions_begun: usize,
    pub open_transactions: usize,
    pub page_queries: usize,
    pub commits: usize,
    pub failed_commits: usize,
    pub rollbacks: usize,
}

/// Cheaply cloneable handle to a shared in-memory vault.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(MemoryState::default()),
                counters: Counters::default(),
                commit_failure: Mutex::new(None),
                statement_failure: Mutex::new(None),
            }),
        }
    }

    pub fn with_states(records: impl IntoIterator<Item = VaultRecord>) -> Self {
        let store = Self::new();
        store.insert_states(records);
        store
    }

    pub fn insert_states(&self, records: impl IntoIterator<Item = VaultRecord>) {
        let mut state = self.shared.state.write();
        for record in records {
            state.records.insert(record.state_ref.clone(), record);
        }
    }

    /// Insert a committed link directly, bypassing transactions.
    pub fn insert_link(&self, link: PartyLink) {
        self.shared.state.write().apply_link(link);
    }

    /// Make every commit whose staged links satisfy `predicate` fail. The staged
    /// writes of a failed commit are discarded.
    pub fn fail_commits_when<F>(&self, predicate: F)
    where
        F: Fn(&[PartyLink]) -> bool + Send + Sync + 'static,
    {
        *self.shared.commit_failure.lock() = Some(Box::new(predicate));
    }

    pub fn clear_commit_failures(&self) {
        *self.shared.commit_failure.lock() = None;
    }

    /// Make every done lookup, marker or relevancy update touching a state that
    /// satisfies `predicate` fail. Like PostgreSQL, the failure aborts the
    /// transaction until it rolls back to a savepoint; committing an aborted
    /// transaction silently rolls it back.
    pub fn fail_statements_for<F>(&self, predicate: F)
    where
        F: Fn(&StateRef) -> bool + Send + Sync + 'static,
    {
        *self.shared.statement_failure.lock() = Some(Box::new(predicate));
    }

    pub fn clear_statement_failures(&self) {
        *self.shared.statement_failure.lock() = None;
    }

    pub fn undone_count(&self) -> usize {
        let state = self.shared.state.read();
        state
            .records
            .keys()
            .filter(|state_ref| !state.is_done(state_ref))
            .count()
    }

    pub fn is_done(&self, state_ref: &StateRef) -> bool {
        self.shared.state.read().is_done(state_ref)
    }

    pub fn links_for(&self, state_ref: &StateRef) -> Vec<PartyLink> {
        self.shared
            .state
            .read()
            .links
            .get(state_ref)
            .cloned()
            .unwrap_or_default()
    }

    pub fn record(&self, state_ref: &StateRef) -> Option<VaultRecord> {
        self.shared.state.read().records.get(state_ref).cloned()
    }

    pub fn stats(&self) -> MemoryStoreStats {
        let counters = &self.shared.counters;
        MemoryStoreStats {
            transactions_begun: counters.begun.load(Ordering::SeqCst),
            open_transactions: counters.open.load(Ordering::SeqCst),
            page_queries: counters.page_queries.load(Ordering::SeqCst),
            commits: counters.commits.load(Ordering::SeqCst),
            failed_commits: counters.failed_commits.load(Ordering::SeqCst),
            rollbacks: counters.rollbacks.load(Ordering::SeqCst),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    type Tx = MemoryTransaction;

    fn begin(&self) -> StoreResult<MemoryTransaction> {
        self.shared.counters.begun.fetch_add(1, Ordering::SeqCst);
        self.shared.counters.open.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            staged_links: Vec::new(),
            staged_relevancy: Vec::new(),
            savepoints: Vec::new(),
            aborted: false,
            open: true,
        })
    }
}

pub struct MemoryTransaction {
    shared: Arc<Shared>,
    staged_links: Vec<PartyLink>,
    staged_relevancy: Vec<(StateRef, Relevancy)>,
    /// Staged write counts at each open savepoint.
    savepoints: Vec<(usize, usize)>,
    aborted: bool,
    open: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> StoreResult<()> {
        if !self.open {
            Err(StoreError::Closed)
        } else if self.aborted {
            Err(StoreError::Aborted)
        } else {
            Ok(())
        }
    }

    fn run_statement(&mut self, state_ref: &StateRef) -> StoreResult<()> {
        self.ensure_open()?;
        let rejected = self
            .shared
            .statement_failure
            .lock()
            .as_ref()
            .is_some_and(|predicate| predicate(state_ref));
        if rejected {
            self.aborted = true;
            return Err(StoreError::Statement(format!(
                "injected failure for {}",
                state_ref
            )));
        }
        Ok(())
    }

    fn sees_done(&self, state: &MemoryState, state_ref: &StateRef) -> bool {
        state.is_done(state_ref)
            || self
                .staged_links
                .iter()
                .any(|link| &link.state_ref == state_ref)
    }

    fn matches(&self, state: &MemoryState, state_ref: &StateRef, filter: RecordFilter) -> bool {
        match filter {
            RecordFilter::All => true,
            RecordFilter::Undone => !self.sees_done(state, state_ref),
        }
    }

    fn close(&mut self) {
        self.open = false;
        self.aborted = false;
        self.staged_links.clear();
        self.staged_relevancy.clear();
        self.savepoints.clear();
        self.shared.counters.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transaction for MemoryTransaction {
    fn count_matching(&mut self, filter: RecordFilter) -> StoreResult<u64> {
        self.ensure_open()?;
        let state = self.shared.state.read();
        let count = state
            .records
            .keys()
            .filter(|state_ref| self.matches(&state, state_ref, filter))
            .count();
        Ok(count as u64)
    }

    fn query_page(
        &mut self,
        filter: RecordFilter,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<VaultRecord>> {
        self.ensure_open()?;
        self.shared
            .counters
            .page_queries
            .fetch_add(1, Ordering::SeqCst);

        let state = self.shared.state.read();
        let page = state
            .records
            .values()
            .filter(|record| self.matches(&state, &record.state_ref, filter))
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit)
            .cloned()
            .collect();
        Ok(page)
    }

    fn is_done(&mut self, state_ref: &StateRef) -> StoreResult<bool> {
        self.run_statement(state_ref)?;
        let state = self.shared.state.read();
        Ok(self.sees_done(&state, state_ref))
    }

    fn mark_done(&mut self, link: &PartyLink) -> StoreResult<()> {
        self.run_statement(&link.state_ref)?;
        self.staged_links.push(link.clone());
        Ok(())
    }

    fn set_relevancy(&mut self, state_ref: &StateRef, relevancy: Relevancy) -> StoreResult<()> {
        self.run_statement(state_ref)?;
        self.staged_relevancy.push((state_ref.clone(), relevancy));
        Ok(())
    }

    fn savepoint(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.savepoints
            .push((self.staged_links.len(), self.staged_relevancy.len()));
        Ok(())
    }

    fn release_savepoint(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.savepoints.pop().ok_or(StoreError::NoSavepoint)?;
        Ok(())
    }

    fn rollback_to_savepoint(&mut self) -> StoreResult<()> {
        if !self.open {
            return Err(StoreError::Closed);
        }
        let (links, relevancy) = self.savepoints.pop().ok_or(StoreError::NoSavepoint)?;
        self.staged_links.truncate(links);
        self.staged_relevancy.truncate(relevancy);
        self.aborted = false;
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        if !self.open {
            return Err(StoreError::Closed);
        }

        if self.aborted {
            log::debug!("commit of an aborted transaction, rolling back");
            self.shared.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
            self.close();
            return Ok(());
        }

        let rejected = self
            .shared
            .commit_failure
            .lock()
            .as_ref()
            .is_some_and(|predicate| predicate(self.staged_links.as_slice()));

        if rejected {
            self.shared
                .counters
                .failed_commits
                .fetch_add(1, Ordering::SeqCst);
            let staged = self.staged_links.len();
            self.close();
            return Err(StoreError::CommitFailed(format!(
                "injected failure with {} staged links",
                staged
            )));
        }

        {
            let mut state = self.shared.state.write();
            for link in self.staged_links.drain(..) {
                state.apply_link(link);
            }
            for (state_ref, relevancy) in self.staged_relevancy.drain(..) {
                if let Some(record) = state.records.get_mut(&state_ref) {
                    record.relevancy_status = relevancy;
                }
            }
        }

        self.shared.counters.commits.fetch_add(1, Ordering::SeqCst);
        self.close();
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        if !self.open {
            return Ok(());
        }
        self.shared.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.close();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.open {
            let _ = self.rollback();
        }
    }
}
