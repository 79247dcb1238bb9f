use crate::models::StateRef;
use thiserror::Error;

/// Errors raised by a storage binding.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("schema migration error: {0}")]
    Schema(#[from] sqlx::migrate::MigrateError),
    #[error("commit failed: {0}")]
    CommitFailed(String),
    #[error("transaction already closed")]
    Closed,
    #[error("statement failed: {0}")]
    Statement(String),
    #[error("current transaction is aborted, commands ignored until rollback to savepoint")]
    Aborted,
    #[error("no savepoint to release or roll back to")]
    NoSavepoint,
    #[error("corrupt row for {state_ref}: {detail}")]
    CorruptRow { state_ref: StateRef, detail: String },
}

/// Outcome of a transform that did not complete for one record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record cannot be handled right now. It stays undone and is picked up
    /// again by a later page fetch.
    #[error("skipped: {reason}")]
    Skip { reason: String },
    /// The transform cannot even build its side data for the record.
    #[error("unrecoverable: {reason}")]
    Unrecoverable { reason: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RecordError {
    pub fn skip(reason: impl Into<String>) -> Self {
        RecordError::Skip {
            reason: reason.into(),
        }
    }

    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        RecordError::Unrecoverable {
            reason: reason.into(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, RecordError::Skip { .. })
    }
}

/// Failures that stop iteration itself. Record-level problems never end up here.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to count undone states: {0}")]
    Count(#[source] StoreError),
    #[error("failed to begin transaction for page {page}: {source}")]
    BeginPage { page: u64, source: StoreError },
    #[error("failed to fetch page {page}: {source}")]
    FetchPage { page: u64, source: StoreError },
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::migrate::MigrateError;

    #[test]
    fn test_schema_failure_converts_to_store_error() {
        let err: StoreError = MigrateError::VersionMissing(20240601000000).into();
        assert!(matches!(err, StoreError::Schema(_)));
        assert!(err.to_string().starts_with("schema migration error"));
    }

    #[test]
    fn test_store_error_in_transform_is_not_a_skip() {
        let err: RecordError = StoreError::Aborted.into();
        assert!(!err.is_skip());
        assert!(RecordError::skip("later").is_skip());
    }
}
