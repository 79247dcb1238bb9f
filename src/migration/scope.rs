use crate::error::StoreResult;
use crate::store::{Store, Transaction};

/// How a scope ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOutcome {
    Committed,
    /// The commit failed and a rollback was attempted. Logged, not propagated.
    CommitFailed,
}

/// Exclusive owner of one transaction.
///
/// `complete` commits; any other exit path, including unwinding, rolls the
/// transaction back. Either way the transaction is closed when the scope is
/// dropped.
pub struct TransactionScope<T: Transaction> {
    tx: T,
    label: String,
    finished: bool,
}

impl<T: Transaction> TransactionScope<T> {
    pub fn begin<S>(store: &S, label: impl Into<String>) -> StoreResult<Self>
    where
        S: Store<Tx = T>,
    {
        let label = label.into();
        let tx = store.begin()?;
        log::trace!("{}: transaction opened", label);
        Ok(Self {
            tx,
            label,
            finished: false,
        })
    }

    pub fn transaction(&mut self) -> &mut T {
        &mut self.tx
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Commit and close. The data may already be durable when a client-side
    /// commit error is reported, so a failure only gets logged.
    pub fn complete(mut self) -> ScopeOutcome {
        self.finished = true;
        match self.tx.commit() {
            Ok(()) => {
                log::debug!("{}: committed", self.label);
                ScopeOutcome::Committed
            }
            Err(err) => {
                log::error!("{}: commit failed: {}", self.label, err);
                if let Err(rollback_err) = self.tx.rollback() {
                    log::error!(
                        "{}: rollback after failed commit also failed: {}",
                        self.label,
                        rollback_err
                    );
                }
                ScopeOutcome::CommitFailed
            }
        }
    }

    /// Roll back and close.
    pub fn abandon(mut self) {
        self.finished = true;
        if let Err(err) = self.tx.rollback() {
            log::error!("{}: rollback failed: {}", self.label, err);
        }
    }
}

impl<T: Transaction> Drop for TransactionScope<T> {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!("{}: closed without commit, rolling back", self.label);
            if let Err(err) = self.tx.rollback() {
                log::error!("{}: rollback failed: {}", self.label, err);
            }
        }
    }
}
