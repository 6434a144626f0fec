use std::time::Duration;

use async_trait::async_trait;
use membership_shared::types::{
    ActorId, AggregateView, ContributionReceipt, Direction, Selector, SubjectId, ToggleReceipt,
};

use crate::errors::EngineError;

/// The server side as seen by the optimistic controller.
///
/// Every call is bounded by `deadline`; an expired deadline is reported as
/// [`EngineError::DeadlineExceeded`].
#[async_trait]
pub trait MembershipBackend: Send + Sync {
    async fn toggle(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Direction,
        deadline: Duration,
    ) -> Result<ToggleReceipt, EngineError>;

    async fn contribute(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        selector: Selector,
        deadline: Duration,
    ) -> Result<ContributionReceipt, EngineError>;

    /// Authoritative snapshot used to seed and re-fetch views.
    async fn fetch(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        deadline: Duration,
    ) -> Result<AggregateView, EngineError>;
}
