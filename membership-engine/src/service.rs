//! The external interface of the membership engine.
//!
//! [`MembershipService`] routes each request to the component of its
//! operation class and bounds it with a deadline. It also exposes the
//! aggregate lifecycle used by the owning collaborators: create alongside a
//! new subject, close a poll or event, delete with the subject.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use membership_repository::AggregateStore;
use membership_shared::types::{
    ActorId, AggregateRecord, AggregateView, ContributionReceipt, Direction, Selector, SubjectId,
    ToggleReceipt,
};
use tracing::{info, instrument, warn};

use crate::commutative::CommutativeUpdater;
use crate::config::EngineConfig;
use crate::controller::MembershipBackend;
use crate::errors::EngineError;
use crate::guarded::GuardedTransactor;

/// Entry point for commutative toggles, guarded contributions and the
/// aggregate lifecycle.
pub struct MembershipService {
    store: Arc<dyn AggregateStore>,
    commutative: CommutativeUpdater,
    guarded: GuardedTransactor,
    config: EngineConfig,
}

impl MembershipService {
    pub fn new(store: Arc<dyn AggregateStore>, config: EngineConfig) -> Self {
        Self {
            commutative: CommutativeUpdater::new(store.clone()),
            guarded: GuardedTransactor::new(store.clone(), config.retry.clone()),
            store,
            config,
        }
    }

    /// Adds or removes `actor_id` using the engine's default deadline.
    pub async fn commutative_toggle(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Direction,
    ) -> Result<ToggleReceipt, EngineError> {
        self.commutative_toggle_within(subject_id, actor_id, direction, self.config.request_deadline)
            .await
    }

    /// Adds or removes `actor_id`, giving up after `deadline`.
    ///
    /// An expired deadline does not cancel a transform already accepted by the
    /// store; the caller must treat the outcome as unknown.
    pub async fn commutative_toggle_within(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Direction,
        deadline: Duration,
    ) -> Result<ToggleReceipt, EngineError> {
        within(deadline, self.commutative.apply(subject_id, actor_id, direction)).await
    }

    /// Records a guarded contribution using the engine's default deadline.
    pub async fn guarded_contribute(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        selector: Selector,
    ) -> Result<ContributionReceipt, EngineError> {
        self.guarded_contribute_within(subject_id, actor_id, selector, self.config.request_deadline)
            .await
    }

    /// Records a guarded contribution, giving up after `deadline`.
    pub async fn guarded_contribute_within(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        selector: Selector,
        deadline: Duration,
    ) -> Result<ContributionReceipt, EngineError> {
        within(deadline, self.guarded.apply(subject_id, actor_id, selector)).await
    }

    /// Creates the aggregate of a new subject.
    ///
    /// The record must start empty: no participants, a zero tally and open.
    /// Capacity and poll options are taken as given.
    #[instrument(skip_all, fields(subject_id = %record.subject_id))]
    pub async fn create_aggregate(
        &self,
        record: AggregateRecord,
    ) -> Result<AggregateView, EngineError> {
        if !record.participants.is_empty() || record.tally.total() != 0 {
            return Err(EngineError::invalid_request(format!(
                "{} must be created without participants",
                record.subject_id
            )));
        }
        if record.closed {
            return Err(EngineError::invalid_request(format!(
                "{} cannot be created closed",
                record.subject_id
            )));
        }

        let created = self.store.create(&record).await?;
        info!(version = created.version, "Aggregate created");
        Ok(AggregateView {
            tally: created.value.tally.counts(),
            participants: 0,
            joined: false,
            closed: false,
        })
    }

    /// Closes an aggregate; participants and tally are frozen from now on.
    #[instrument(skip_all, fields(subject_id = %subject_id))]
    pub async fn close_aggregate(&self, subject_id: &SubjectId) -> Result<(), EngineError> {
        let closed = self.store.close(subject_id).await?;
        info!(version = closed.version, "Aggregate closed");
        Ok(())
    }

    /// Deletes an aggregate together with its subject.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The aggregate existed and was removed
    /// * `Ok(false)` - There was no aggregate for the subject
    #[instrument(skip_all, fields(subject_id = %subject_id))]
    pub async fn delete_aggregate(&self, subject_id: &SubjectId) -> Result<bool, EngineError> {
        let deleted = self.store.delete(subject_id).await?;
        info!(deleted, "Aggregate delete processed");
        Ok(deleted)
    }

    /// Authoritative snapshot of an aggregate as seen by `actor_id`.
    pub async fn fetch(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
    ) -> Result<AggregateView, EngineError> {
        let current = self.store.read(subject_id).await?;
        Ok(current.value.view_for(actor_id))
    }
}

async fn within<T>(
    deadline: Duration,
    request: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    match tokio::time::timeout(deadline, request).await {
        Ok(result) => result,
        Err(_) => {
            warn!(?deadline, "Request deadline exceeded");
            Err(EngineError::DeadlineExceeded(deadline))
        }
    }
}

#[async_trait]
impl MembershipBackend for MembershipService {
    async fn toggle(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Direction,
        deadline: Duration,
    ) -> Result<ToggleReceipt, EngineError> {
        self.commutative_toggle_within(subject_id, actor_id, direction, deadline)
            .await
    }

    async fn contribute(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        selector: Selector,
        deadline: Duration,
    ) -> Result<ContributionReceipt, EngineError> {
        self.guarded_contribute_within(subject_id, actor_id, selector, deadline)
            .await
    }

    async fn fetch(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        deadline: Duration,
    ) -> Result<AggregateView, EngineError> {
        within(deadline, MembershipService::fetch(self, subject_id, actor_id)).await
    }
}
