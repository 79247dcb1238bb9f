//! Storage bindings for the migration engine.
//!
//! The engine only needs a generic unit-of-work interface: open a transaction,
//! count and page through vault states by predicate, and commit or roll back.
//! The done lookup and marker are used by transforms, never by the engine.
//!
//! - **`postgres`**: `sqlx`-backed store over the `vault_states` / `state_party`
//!   schema shipped in `migrations/`.
//! - **`memory`**: in-process store with the same visibility rules, used by tests
//!   and dry runs.
//!
//! Closing a transaction is dropping it. A transaction dropped without a commit
//! is rolled back.

pub mod memory;
pub mod postgres;

use crate::error::StoreResult;
use crate::models::{PartyLink, RecordFilter, Relevancy, StateRef, VaultRecord};

pub use memory::MemoryStore;
pub use postgres::{PgStore, run_schema_migrations};

/// A connection factory shared by every worker of a run.
pub trait Store: Sync {
    type Tx: Transaction;

    fn begin(&self) -> StoreResult<Self::Tx>;
}

/// One unit of work. Never shared between concurrent tasks.
pub trait Transaction {
    fn count_matching(&mut self, filter: RecordFilter) -> StoreResult<u64>;

    /// Records matching `filter`, ordered by state reference.
    fn query_page(
        &mut self,
        filter: RecordFilter,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<VaultRecord>>;

    fn is_done(&mut self, state_ref: &StateRef) -> StoreResult<bool>;

    /// Insert a `state_party` row. Inserting an existing link is a no-op.
    fn mark_done(&mut self, link: &PartyLink) -> StoreResult<()>;

    fn set_relevancy(&mut self, state_ref: &StateRef, relevancy: Relevancy) -> StoreResult<()>;

    /// Open a savepoint around one record's writes. Every savepoint is closed
    /// by exactly one of `release_savepoint` or `rollback_to_savepoint`.
    fn savepoint(&mut self) -> StoreResult<()>;

    fn release_savepoint(&mut self) -> StoreResult<()>;

    /// Undo the writes made since the last savepoint and discard it. A failed
    /// statement leaves the transaction aborted until this is called.
    fn rollback_to_savepoint(&mut self) -> StoreResult<()>;

    fn commit(&mut self) -> StoreResult<()>;

    fn rollback(&mut self) -> StoreResult<()>;
}
