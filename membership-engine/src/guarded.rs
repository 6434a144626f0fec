//! Guarded contributions.
//!
//! Votes and capped registrations depend on the current aggregate state, so
//! they run as a read-check-write cycle: read with version, check the
//! preconditions, compute the new record and commit it only if the version is
//! unchanged. A lost race restarts the whole cycle after a jittered,
//! exponentially growing pause, up to the configured attempt bound.
use std::sync::Arc;

use membership_repository::{AggregateStore, StoreError};
use membership_shared::check_transition;
use membership_shared::types::{
    ActorId, AggregateRecord, ContributionReceipt, ErrorKind, Selector, SubjectId, Tally,
};
use tokio_retry::RetryIf;
use tracing::{debug, info, instrument, warn};

use crate::config::RetryConfig;
use crate::errors::EngineError;

/// Outcome of a single read-check-write cycle that did not commit.
#[derive(Debug)]
enum AttemptError {
    /// Another writer committed between our read and our commit.
    Conflict,
    Fatal(EngineError),
}

impl From<StoreError> for AttemptError {
    fn from(error: StoreError) -> Self {
        if error.is_conflict() {
            AttemptError::Conflict
        } else {
            AttemptError::Fatal(error.into())
        }
    }
}

/// Applies at-most-once contributions with a conditioned commit.
pub struct GuardedTransactor {
    store: Arc<dyn AggregateStore>,
    retry: RetryConfig,
}

impl GuardedTransactor {
    pub fn new(store: Arc<dyn AggregateStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Records `actor_id`'s contribution to the slot addressed by `selector`.
    ///
    /// Business outcomes are not errors: a closed aggregate, a repeated
    /// contribution and a full aggregate come back as a receipt with
    /// `accepted == false`, the reason and the current authoritative tally.
    ///
    /// # Returns
    ///
    /// * `Ok(ContributionReceipt)` - Accepted, or rejected as a business outcome
    /// * `Err(EngineError::InvalidRequest)` - The selector addresses no slot
    /// * `Err(EngineError::SubjectGone)` - The aggregate does not exist
    /// * `Err(EngineError::ContentionExceeded)` - Every attempt lost a race
    /// * `Err(EngineError::TransformFailed)` - The store failed
    #[instrument(skip_all, fields(subject_id = %subject_id, actor_id = %actor_id, ?selector))]
    pub async fn apply(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        selector: Selector,
    ) -> Result<ContributionReceipt, EngineError> {
        let mut attempts = 0usize;
        let result = RetryIf::spawn(
            self.retry.strategy(),
            || {
                attempts += 1;
                self.attempt(subject_id, actor_id, selector)
            },
            |error: &AttemptError| matches!(error, AttemptError::Conflict),
        )
        .await;

        match result {
            Ok(receipt) => Ok(receipt),
            Err(AttemptError::Conflict) => {
                warn!(attempts, "Guarded contribution gave up under contention");
                Err(EngineError::ContentionExceeded {
                    subject_id: subject_id.clone(),
                    attempts,
                })
            }
            Err(AttemptError::Fatal(error)) => Err(error),
        }
    }

    async fn attempt(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        selector: Selector,
    ) -> Result<ContributionReceipt, AttemptError> {
        let current = self.store.read(subject_id).await?;
        let record = &current.value;

        if record.closed {
            return Ok(rejected(record, ErrorKind::AggregateClosed));
        }
        if record.has_participant(actor_id) {
            return Ok(rejected(record, ErrorKind::AlreadyParticipated));
        }
        if record.is_full() {
            return Ok(rejected(record, ErrorKind::CapacityReached));
        }

        let next = credited(record, actor_id, selector).map_err(AttemptError::Fatal)?;
        check_transition(record, &next).map_err(|kind| {
            AttemptError::Fatal(EngineError::Invariant {
                subject_id: subject_id.clone(),
                kind,
            })
        })?;

        match self.store.commit_if_unchanged(current.version, &next).await {
            Ok(committed) => {
                info!(version = committed.version, "Guarded contribution committed");
                Ok(accepted(&committed.value))
            }
            Err(error) if error.is_conflict() => {
                debug!(expected = current.version, "Conditioned commit lost a race");
                Err(AttemptError::Conflict)
            }
            Err(error) => Err(error.into()),
        }
    }
}

/// The record after crediting `actor_id` to the selected slot.
fn credited(
    record: &AggregateRecord,
    actor_id: &ActorId,
    selector: Selector,
) -> Result<AggregateRecord, EngineError> {
    let mut next = record.clone();
    match (&mut next.tally, selector) {
        (Tally::Single { count }, Selector::Counter) => *count += 1,
        (Tally::Options { counts, .. }, Selector::Choice(index)) => {
            let slot = counts.get_mut(index).ok_or_else(|| {
                EngineError::invalid_request(format!(
                    "choice {index} is out of range for {}",
                    record.subject_id
                ))
            })?;
            *slot += 1;
        }
        (Tally::Single { .. }, Selector::Choice(index)) => {
            return Err(EngineError::invalid_request(format!(
                "{} has a single counter, got choice {index}",
                record.subject_id
            )));
        }
        (Tally::Options { .. }, Selector::Counter) => {
            return Err(EngineError::invalid_request(format!(
                "{} is a poll, a choice is required",
                record.subject_id
            )));
        }
    }
    next.participants.insert(actor_id.clone());
    Ok(next)
}

fn accepted(record: &AggregateRecord) -> ContributionReceipt {
    ContributionReceipt {
        tally: record.tally.counts(),
        participants: record.participant_count(),
        accepted: true,
        reason: None,
    }
}

fn rejected(record: &AggregateRecord, reason: ErrorKind) -> ContributionReceipt {
    debug!(%reason, "Guarded contribution rejected");
    ContributionReceipt {
        tally: record.tally.counts(),
        participants: record.participant_count(),
        accepted: false,
        reason: Some(reason),
    }
}
