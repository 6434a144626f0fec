//! Commutative membership updates.
//!
//! Likes, follows and uncapped joins are pure set-add/remove operations whose
//! outcome does not depend on prior state. They are issued as one atomic store
//! transform without a preceding read and are never retried here; a failed
//! transform surfaces to the caller, who may re-issue the whole action.
use std::sync::Arc;

use membership_repository::AggregateStore;
use membership_shared::check_invariants;
use membership_shared::types::{ActorId, Direction, SubjectId, ToggleReceipt};
use tracing::{debug, instrument, warn};

use crate::errors::EngineError;

/// Applies set-union/remove of an actor paired with a matching counter delta.
pub struct CommutativeUpdater {
    store: Arc<dyn AggregateStore>,
}

impl CommutativeUpdater {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Adds or removes `actor_id` and moves the counter by the same amount.
    ///
    /// The direction comes from the caller's previous local prediction; the
    /// current server state is never read first.
    ///
    /// # Returns
    ///
    /// * `Ok(ToggleReceipt)` - Participant count and membership after the transform
    /// * `Err(EngineError::SubjectGone)` - The aggregate does not exist
    /// * `Err(EngineError::AggregateClosed)` - The aggregate is closed
    /// * `Err(EngineError::CapacityReached)` - An add would exceed the capacity
    /// * `Err(EngineError::InvalidRequest)` - The aggregate is a multi-option poll
    /// * `Err(EngineError::TransformFailed)` - The store write failed
    #[instrument(skip_all, fields(subject_id = %subject_id, actor_id = %actor_id, ?direction))]
    pub async fn apply(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Direction,
    ) -> Result<ToggleReceipt, EngineError> {
        let updated = self
            .store
            .apply_transform(subject_id, actor_id, direction)
            .await
            .map_err(|e| {
                warn!(error = %e, "Commutative transform failed");
                EngineError::from(e)
            })?;

        if let Err(kind) = check_invariants(&updated.value) {
            return Err(EngineError::Invariant {
                subject_id: subject_id.clone(),
                kind,
            });
        }

        debug!(version = updated.version, "Commutative transform applied");
        Ok(ToggleReceipt {
            participants: updated.value.participant_count(),
            joined: updated.value.has_participant(actor_id),
        })
    }
}
