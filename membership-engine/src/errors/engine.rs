//! Error types of the membership engine.
//! Store failures are mapped onto the shared [`ErrorKind`] taxonomy here, so
//! callers and the optimistic controller only ever deal with one vocabulary.
use std::time::Duration;

use membership_repository::StoreError;
use membership_shared::ViolationKind;
use membership_shared::types::{ErrorKind, SubjectId};
use thiserror::Error;

/// Represents errors returned by the commutative updater, the guarded
/// transactor and the membership service.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Transform failed: {0}")]
    TransformFailed(String),

    #[error("Aggregate closed: {0}")]
    AggregateClosed(SubjectId),

    #[error("Capacity reached: {0}")]
    CapacityReached(SubjectId),

    #[error("Actor already participated in {0}")]
    AlreadyParticipated(SubjectId),

    #[error("Contention exceeded on {subject_id} after {attempts} attempts")]
    ContentionExceeded { subject_id: SubjectId, attempts: usize },

    #[error("Subject gone: {0}")]
    SubjectGone(SubjectId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Aggregate already exists: {0}")]
    AlreadyExists(SubjectId),

    #[error("Invariant violation on {subject_id}: {kind}")]
    Invariant {
        subject_id: SubjectId,
        kind: ViolationKind,
    },

    #[error("Deadline of {0:?} exceeded, outcome unknown")]
    DeadlineExceeded(Duration),
}

impl EngineError {
    /// Create a transform failure.
    pub fn transform_failed(msg: impl Into<String>) -> Self {
        Self::TransformFailed(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// The outcome kind reported to callers.
    ///
    /// Invariant violations never reach the store, so the write is reported
    /// as a failed transform.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::TransformFailed(_) | EngineError::Invariant { .. } => {
                ErrorKind::TransformFailed
            }
            EngineError::AggregateClosed(_) => ErrorKind::AggregateClosed,
            EngineError::CapacityReached(_) => ErrorKind::CapacityReached,
            EngineError::AlreadyParticipated(_) => ErrorKind::AlreadyParticipated,
            EngineError::ContentionExceeded { .. } => ErrorKind::ContentionExceeded,
            EngineError::SubjectGone(_) => ErrorKind::SubjectGone,
            EngineError::InvalidRequest(_) | EngineError::AlreadyExists(_) => {
                ErrorKind::InvalidRequest
            }
            EngineError::DeadlineExceeded(_) => ErrorKind::OutcomeUnknown,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(subject_id) => EngineError::SubjectGone(subject_id),
            StoreError::Closed(subject_id) => EngineError::AggregateClosed(subject_id),
            StoreError::CapacityReached(subject_id) => EngineError::CapacityReached(subject_id),
            StoreError::UnsupportedTransform(msg) => EngineError::InvalidRequest(msg),
            StoreError::AlreadyExists(subject_id) => EngineError::AlreadyExists(subject_id),
            StoreError::InvariantViolation { subject_id, kind } => {
                EngineError::Invariant { subject_id, kind }
            }
            other @ (StoreError::DatabaseError(_)
            | StoreError::MigrationError(_)
            | StoreError::VersionConflict { .. }
            | StoreError::Backend(_)) => EngineError::TransformFailed(other.to_string()),
        }
    }
}
