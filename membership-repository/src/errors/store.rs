//! Aggregate store error types.
use membership_shared::ViolationKind;
use membership_shared::types::SubjectId;
use thiserror::Error;

/// Represents errors that can occur within the aggregate store.
///
/// Precondition failures of the atomic primitives (`Closed`, `CapacityReached`,
/// `VersionConflict`) are reported separately from backend failures so the
/// engine can tell business outcomes from transient faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Aggregate not found: {0}")]
    NotFound(SubjectId),

    #[error("Aggregate already exists: {0}")]
    AlreadyExists(SubjectId),

    #[error("Version conflict on {subject_id}: expected {expected}, found {actual}")]
    VersionConflict {
        subject_id: SubjectId,
        expected: u64,
        actual: u64,
    },

    #[error("Aggregate closed: {0}")]
    Closed(SubjectId),

    #[error("Capacity reached: {0}")]
    CapacityReached(SubjectId),

    #[error("Unsupported transform: {0}")]
    UnsupportedTransform(String),

    #[error("Invariant violation on {subject_id}: {kind}")]
    InvariantViolation {
        subject_id: SubjectId,
        kind: ViolationKind,
    },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an unsupported transform error.
    pub fn unsupported_transform(msg: impl Into<String>) -> Self {
        Self::UnsupportedTransform(msg.into())
    }

    /// Create an invariant violation error.
    pub fn invariant(subject_id: &SubjectId, kind: ViolationKind) -> Self {
        Self::InvariantViolation {
            subject_id: subject_id.clone(),
            kind,
        }
    }

    /// True when a conditioned commit lost against a concurrent writer.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
