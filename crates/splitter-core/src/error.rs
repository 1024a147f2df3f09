//! Error types for stores, entropy sources, and the split orchestrator.

use thiserror::Error;

/// Failure of an [`OperationStore`](crate::store::OperationStore) call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The supplied lock did not match the stored one. The caller's copy of the
    /// operation has been overwritten with the stored record.
    #[error("optimistic locking failed for operation {id}")]
    LockConflict { id: String },

    /// A conditional update targeted a record that does not exist.
    #[error("operation {id} does not exist")]
    NotFound { id: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded into an operation.
    #[error("corrupt operation record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, StoreError::LockConflict { .. })
    }
}

/// Failure of an [`EntropySource`](crate::source::EntropySource).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{provider}: http error: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider}: http error: {status}")]
    Status {
        provider: String,
        status: reqwest::StatusCode,
    },

    #[error("{provider}: invalid configuration: {reason}")]
    InvalidConfig { provider: String, reason: String },

    #[error("{provider}: unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("no entropy sources configured")]
    NoSources,

    /// A source task ended without reporting an outcome (panic or abort).
    #[error("entropy task failed: {0}")]
    TaskFailed(String),

    #[error("entropy request cancelled")]
    Cancelled,
}

/// Returned by [`Clock::sleep`](crate::clock::Clock::sleep) when the
/// cancellation token fires first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Failure of a split request.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("idempotency id must not be empty")]
    EmptyId,

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("random source error: {0}")]
    Source(SourceError),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<SourceError> for SplitError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Cancelled => SplitError::Cancelled,
            other => SplitError::Source(other),
        }
    }
}

impl From<Cancelled> for SplitError {
    fn from(_: Cancelled) -> Self {
        SplitError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_conflict_is_distinguishable() {
        let conflict = StoreError::LockConflict { id: "a".into() };
        let missing = StoreError::NotFound { id: "a".into() };
        assert!(conflict.is_lock_conflict());
        assert!(!missing.is_lock_conflict());
    }

    #[test]
    fn source_cancellation_maps_to_split_cancellation() {
        assert!(matches!(
            SplitError::from(SourceError::Cancelled),
            SplitError::Cancelled
        ));
        assert!(matches!(
            SplitError::from(SourceError::NoSources),
            SplitError::Source(SourceError::NoSources)
        ));
    }

    #[test]
    fn split_error_messages_carry_cause() {
        let err = SplitError::from(StoreError::NotFound { id: "op-1".into() });
        assert_eq!(err.to_string(), "storage error: operation op-1 does not exist");
    }
}
