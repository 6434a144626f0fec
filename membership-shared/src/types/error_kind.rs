use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome taxonomy shared by the server components and the optimistic
/// controller.
///
/// Some kinds are business outcomes rendered as explanatory state; the rest
/// are faults that trigger a rollback on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum ErrorKind {
    /// The underlying store write failed. Safe to retry the whole user action.
    #[error("transform failed")]
    TransformFailed,
    /// The actor already contributed to this aggregate.
    #[error("already participated")]
    AlreadyParticipated,
    /// The aggregate is closed and no longer accepts mutations.
    #[error("aggregate closed")]
    AggregateClosed,
    /// The aggregate reached its participant capacity.
    #[error("capacity reached")]
    CapacityReached,
    /// Conditioned commits kept conflicting until the retry budget ran out.
    #[error("contention exceeded")]
    ContentionExceeded,
    /// The subject was deleted, or closed while an action was in flight.
    #[error("subject gone")]
    SubjectGone,
    /// The request does not fit the aggregate, e.g. a selector that
    /// addresses no slot of it.
    #[error("invalid request")]
    InvalidRequest,
    /// The request outlived its deadline; the committed state is unknown.
    #[error("outcome unknown")]
    OutcomeUnknown,
}

impl ErrorKind {
    /// Business outcomes are rendered as state, not as error toasts.
    pub fn is_business_outcome(&self) -> bool {
        matches!(
            self,
            ErrorKind::AlreadyParticipated | ErrorKind::CapacityReached
        )
    }

    /// Kinds that should offer the user a retry affordance.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransformFailed | ErrorKind::ContentionExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_outcomes() {
        assert!(ErrorKind::AlreadyParticipated.is_business_outcome());
        assert!(ErrorKind::CapacityReached.is_business_outcome());

        // A closed subject is rolled back, not rendered as state.
        assert!(!ErrorKind::AggregateClosed.is_business_outcome());
        assert!(!ErrorKind::SubjectGone.is_business_outcome());
        assert!(!ErrorKind::TransformFailed.is_business_outcome());
        assert!(!ErrorKind::OutcomeUnknown.is_business_outcome());
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::TransformFailed.is_retryable());
        assert!(ErrorKind::ContentionExceeded.is_retryable());

        assert!(!ErrorKind::AlreadyParticipated.is_retryable());
        assert!(!ErrorKind::InvalidRequest.is_retryable());
        assert!(!ErrorKind::SubjectGone.is_retryable());
    }
}
