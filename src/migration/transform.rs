use crate::error::RecordError;
use crate::models::VaultRecord;
use crate::store::Transaction;

/// Per-record work supplied by the outer migration job.
///
/// `apply` runs inside the chunk's transaction and is expected to link the
/// state (`Transaction::mark_done`) when it succeeds; otherwise the state comes
/// back in a later page. It may run concurrently with other chunks of the same
/// page and in any order.
pub trait Transform: Sync {
    /// Side data shared by every task of a run, e.g. a payload decoder.
    type Context: Send + Sync;

    fn establish_context(&self) -> Result<Self::Context, RecordError>;

    fn apply(
        &self,
        context: &Self::Context,
        tx: &mut dyn Transaction,
        record: &VaultRecord,
    ) -> Result<(), RecordError>;
}

/// Closure adapter with no context. See [`from_fn`].
pub struct FnTransform<F> {
    f: F,
}

pub fn from_fn<F>(f: F) -> FnTransform<F>
where
    F: Fn(&mut dyn Transaction, &VaultRecord) -> Result<(), RecordError> + Sync,
{
    FnTransform { f }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(&mut dyn Transaction, &VaultRecord) -> Result<(), RecordError> + Sync,
{
    type Context = ();

    fn establish_context(&self) -> Result<(), RecordError> {
        Ok(())
    }

    fn apply(
        &self,
        _context: &(),
        tx: &mut dyn Transaction,
        record: &VaultRecord,
    ) -> Result<(), RecordError> {
        (self.f)(tx, record)
    }
}
