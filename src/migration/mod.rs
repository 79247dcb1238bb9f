//! Self-consuming paginated migration engine.
//!
//! Walks every vault state that has no `state_party` link yet, hands each one to a
//! [`Transform`], and relies on the transform linking the state so that it drops
//! out of the next page query.
//!
//! # Architecture Overview
//!
//! - **`source`**: the two queries the engine issues: a one-time count of undone
//!   states and a repeatable "first page of undone states" fetch.
//! - **`scope`**: transaction guard that commits, rolls back and closes on every
//!   exit path. A failed commit is logged and rolled back, never propagated.
//! - **`cursor`**: owns one transaction per page fetch and the position counter
//!   that decides when iteration stops.
//! - **`processor`**: splits a page in halves with `rayon::join` until a chunk is
//!   small enough, then runs the transform over the chunk inside one transaction.
//! - **`context`**: lease-counted holder for the transform's decoding context,
//!   established once and shared by every leaf task.
//! - **`driver`**: fetch page → process page on the worker pool → wait → repeat.
//!
//! # Shrinking Result Sets
//!
//! Every page query uses offset 0: states linked by earlier pages no longer match
//! the undone predicate, so the next page naturally starts at unseen states. The
//! stopping condition is computed from the total counted before the first fetch:
//! `within_page_index + (page_number - 1) * page_size == total`. It is never
//! re-counted, because a live count shrinks as pages complete.
//!
//! States whose transform skips stay undone and come back in a later page of the
//! same run. They count as visits again, which is why a run over N states makes
//! exactly N visits but may link fewer than N states.

pub mod context;
pub mod cursor;
pub mod driver;
pub mod processor;
pub mod scope;
pub mod source;
pub mod stats;
pub mod transform;

pub use context::{ContextLease, SharedContext};
pub use cursor::{CursorPosition, CursorState, Page, StateCursor};
pub use driver::MigrationDriver;
pub use processor::{PageProcessor, split_point};
pub use scope::{ScopeOutcome, TransactionScope};
pub use stats::{MigrationReport, RunStats};
pub use transform::{FnTransform, Transform, from_fn};
