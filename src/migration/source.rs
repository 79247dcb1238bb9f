//! Queries behind the cursor.
//!
//! Both queries use the undone predicate: a state is undone while it has no
//! `state_party` row. Page fetches always start at offset 0 because everything
//! the previous pages linked has already left the result set.

use super::scope::TransactionScope;
use crate::error::StoreResult;
use crate::models::{RecordFilter, VaultRecord};
use crate::store::{Store, Transaction};

/// Count undone states inside a transaction of its own.
///
/// Runs once per migration; the result is frozen for the whole run.
pub fn count_undone<S: Store>(store: &S) -> StoreResult<u64> {
    let mut scope = TransactionScope::begin(store, "count undone states")?;
    let count = scope.transaction().count_matching(RecordFilter::Undone)?;
    scope.complete();
    Ok(count)
}

/// Fetch the next page of undone states inside the caller's transaction.
///
/// States a previous page failed to link come back here, ahead of unseen ones
/// when they sort first.
pub fn fetch_next_page<T>(tx: &mut T, limit: usize) -> StoreResult<Vec<VaultRecord>>
where
    T: Transaction + ?Sized,
{
    tx.query_page(RecordFilter::Undone, 0, limit)
}
