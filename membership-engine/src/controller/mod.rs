//! Client-side optimistic controller.
//!
//! For every `(subject, actor)` pair the controller keeps the rendered view
//! and a small state machine:
//!
//! ```text
//! Idle ──action──▶ Predicted ──success──▶ Confirmed
//!                      │
//!                      └──fault──▶ RolledBack
//! ```
//!
//! An action renders its prediction synchronously, caches the view it
//! replaced and dispatches to a [`MembershipBackend`]. The server's answer
//! replaces the prediction; a fault restores the cached view exactly. A
//! request that outlives its deadline has an unknown outcome: the subject is
//! marked stale and re-fetched, and no prediction is made on a stale view
//! until a re-fetch succeeds.
mod backend;
mod prediction;

pub use backend::MembershipBackend;
pub use prediction::{predict_contribution, predict_toggle};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use membership_shared::types::{
    ActorId, AggregateView, ContributionReceipt, Direction, ErrorKind, Selector, SubjectId,
    ToggleReceipt,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::EngineError;

type Key = (SubjectId, ActorId);

/// Where an actor's latest action on a subject stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionState {
    #[default]
    Idle,
    /// A prediction is rendered and the request is in flight.
    Predicted,
    Confirmed,
    RolledBack(ErrorKind),
}

/// What an action ended up rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Another action for the same pair was still in flight.
    Ignored,
    /// The authoritative state replaced the prediction. `reason` carries a
    /// business outcome such as `AlreadyParticipated`.
    Confirmed {
        view: AggregateView,
        reason: Option<ErrorKind>,
    },
    /// The pre-prediction view was restored.
    RolledBack {
        view: AggregateView,
        reason: ErrorKind,
    },
    /// The request timed out. `refreshed` tells whether the re-fetch
    /// succeeded and `view` is authoritative.
    Unknown {
        view: AggregateView,
        refreshed: bool,
    },
}

#[derive(Debug, Default)]
struct Entry {
    view: Option<AggregateView>,
    snapshot: Option<AggregateView>,
    state: ActionState,
    stale: bool,
}

impl Entry {
    fn restore(&mut self) -> Option<AggregateView> {
        if let Some(snapshot) = self.snapshot.take() {
            self.view = Some(snapshot);
        }
        self.view.clone()
    }
}

enum Reservation {
    Busy,
    Ready(AggregateView),
    NeedsFetch(ActionState),
}

/// Server answer reduced to what the controller renders.
struct Authoritative {
    tally: Vec<u64>,
    participants: u64,
    joined: bool,
    reason: Option<ErrorKind>,
}

impl From<ToggleReceipt> for Authoritative {
    fn from(receipt: ToggleReceipt) -> Self {
        Self {
            tally: vec![receipt.participants],
            participants: receipt.participants,
            joined: receipt.joined,
            reason: None,
        }
    }
}

/// Renders predictions for one client and reconciles them with the server.
pub struct OptimisticController {
    backend: Arc<dyn MembershipBackend>,
    deadline: Duration,
    entries: Mutex<HashMap<Key, Entry>>,
}

impl OptimisticController {
    pub fn new(backend: Arc<dyn MembershipBackend>, deadline: Duration) -> Self {
        Self {
            backend,
            deadline,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Flips the actor's membership as currently rendered.
    pub async fn toggle(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
    ) -> Result<Resolution, EngineError> {
        self.dispatch_toggle(subject_id, actor_id, None).await
    }

    /// Joins or leaves regardless of the rendered membership.
    pub async fn set_membership(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Direction,
    ) -> Result<Resolution, EngineError> {
        self.dispatch_toggle(subject_id, actor_id, Some(direction))
            .await
    }

    /// Votes for a poll option or registers for a capped event.
    ///
    /// # Returns
    ///
    /// * `Ok(Resolution)` - What the action rendered
    /// * `Err(EngineError)` - The view could not be seeded; nothing was dispatched
    pub async fn contribute(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        selector: Selector,
    ) -> Result<Resolution, EngineError> {
        let key = (subject_id.clone(), actor_id.clone());
        let Some(()) = self
            .predict(&key, |view| (predict_contribution(view, selector), ()))
            .await?
        else {
            return Ok(Resolution::Ignored);
        };

        let outcome = self
            .backend
            .contribute(subject_id, actor_id, selector, self.deadline)
            .await
            .and_then(|receipt| authoritative_contribution(subject_id, receipt));
        Ok(self.settle(&key, outcome).await)
    }

    /// Seeds or overwrites the rendered view from an external snapshot.
    ///
    /// Ignored while a prediction is in flight.
    pub async fn observe(&self, subject_id: &SubjectId, actor_id: &ActorId, view: AggregateView) {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry((subject_id.clone(), actor_id.clone()))
            .or_default();
        if entry.state != ActionState::Predicted {
            entry.view = Some(view);
            entry.stale = false;
        }
    }

    /// Re-fetches the authoritative view and renders it.
    pub async fn refresh(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
    ) -> Result<AggregateView, EngineError> {
        let view = self
            .backend
            .fetch(subject_id, actor_id, self.deadline)
            .await?;
        self.observe(subject_id, actor_id, view.clone()).await;
        Ok(view)
    }

    /// The currently rendered view, if one was seeded.
    pub async fn view(&self, subject_id: &SubjectId, actor_id: &ActorId) -> Option<AggregateView> {
        self.entries
            .lock()
            .await
            .get(&(subject_id.clone(), actor_id.clone()))
            .and_then(|entry| entry.view.clone())
    }

    pub async fn state(&self, subject_id: &SubjectId, actor_id: &ActorId) -> ActionState {
        self.entries
            .lock()
            .await
            .get(&(subject_id.clone(), actor_id.clone()))
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// True when the subject's view must be re-fetched before predicting.
    pub async fn is_stale(&self, subject_id: &SubjectId, actor_id: &ActorId) -> bool {
        self.entries
            .lock()
            .await
            .get(&(subject_id.clone(), actor_id.clone()))
            .is_some_and(|entry| entry.stale)
    }

    async fn dispatch_toggle(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Option<Direction>,
    ) -> Result<Resolution, EngineError> {
        let key = (subject_id.clone(), actor_id.clone());
        let Some(direction) = self
            .predict(&key, |view| {
                let direction = direction.unwrap_or(if view.joined {
                    Direction::Remove
                } else {
                    Direction::Add
                });
                (predict_toggle(view, direction), direction)
            })
            .await?
        else {
            return Ok(Resolution::Ignored);
        };

        let outcome = self
            .backend
            .toggle(subject_id, actor_id, direction, self.deadline)
            .await
            .map(Authoritative::from);
        Ok(self.settle(&key, outcome).await)
    }

    /// Moves the pair into `Predicted` and renders the prediction.
    ///
    /// Returns `None` when an action for the pair is already in flight.
    async fn predict<T>(
        &self,
        key: &Key,
        plan: impl FnOnce(&AggregateView) -> (AggregateView, T),
    ) -> Result<Option<T>, EngineError> {
        let current = match self.reserve(key).await {
            Reservation::Busy => {
                debug!(subject_id = %key.0, actor_id = %key.1, "Duplicate action ignored");
                return Ok(None);
            }
            Reservation::Ready(view) => view,
            Reservation::NeedsFetch(previous) => {
                match self.backend.fetch(&key.0, &key.1, self.deadline).await {
                    Ok(view) => view,
                    Err(e) => {
                        warn!(subject_id = %key.0, error = %e, "Could not seed view, action refused");
                        let mut entries = self.entries.lock().await;
                        if let Some(entry) = entries.get_mut(key) {
                            entry.state = previous;
                        }
                        return Err(e);
                    }
                }
            }
        };

        let (predicted, output) = plan(&current);
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.clone()).or_default();
        entry.snapshot = Some(current);
        entry.view = Some(predicted);
        entry.stale = false;
        Ok(Some(output))
    }

    async fn reserve(&self, key: &Key) -> Reservation {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.clone()).or_default();
        if entry.state == ActionState::Predicted {
            return Reservation::Busy;
        }
        let previous = std::mem::replace(&mut entry.state, ActionState::Predicted);
        match (&entry.view, entry.stale) {
            (Some(view), false) => Reservation::Ready(view.clone()),
            _ => Reservation::NeedsFetch(previous),
        }
    }

    async fn settle(
        &self,
        key: &Key,
        outcome: Result<Authoritative, EngineError>,
    ) -> Resolution {
        let error = match outcome {
            Ok(answer) => return self.confirm(key, answer).await,
            Err(error) => error,
        };

        match error.kind() {
            ErrorKind::AggregateClosed | ErrorKind::SubjectGone => {
                self.roll_back(key, ErrorKind::SubjectGone).await
            }
            ErrorKind::OutcomeUnknown => self.recover_unknown(key).await,
            kind if kind.is_business_outcome() => {
                match self.backend.fetch(&key.0, &key.1, self.deadline).await {
                    Ok(view) => self.reconcile(key, view, kind).await,
                    Err(_) => self.roll_back(key, kind).await,
                }
            }
            kind => {
                warn!(
                    subject_id = %key.0,
                    error = %error,
                    retryable = kind.is_retryable(),
                    "Action failed, rolling back"
                );
                self.roll_back(key, kind).await
            }
        }
    }

    async fn confirm(&self, key: &Key, answer: Authoritative) -> Resolution {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.clone()).or_default();
        let closed = entry.snapshot.take().is_some_and(|snapshot| snapshot.closed);
        let view = AggregateView {
            tally: answer.tally,
            participants: answer.participants,
            joined: answer.joined,
            closed,
        };
        entry.view = Some(view.clone());
        entry.state = ActionState::Confirmed;
        Resolution::Confirmed {
            view,
            reason: answer.reason,
        }
    }

    async fn reconcile(&self, key: &Key, view: AggregateView, reason: ErrorKind) -> Resolution {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.clone()).or_default();
        entry.snapshot = None;
        entry.view = Some(view.clone());
        entry.state = ActionState::Confirmed;
        Resolution::Confirmed {
            view,
            reason: Some(reason),
        }
    }

    async fn roll_back(&self, key: &Key, reason: ErrorKind) -> Resolution {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.clone()).or_default();
        let view = entry.restore();
        entry.state = ActionState::RolledBack(reason);
        match view {
            Some(view) => Resolution::RolledBack { view, reason },
            None => Resolution::Ignored,
        }
    }

    async fn recover_unknown(&self, key: &Key) -> Resolution {
        {
            let mut entries = self.entries.lock().await;
            for ((subject_id, _), entry) in entries.iter_mut() {
                if *subject_id == key.0 {
                    entry.stale = true;
                }
            }
        }
        info!(subject_id = %key.0, "Outcome unknown, re-fetching subject");

        let fetched = self.backend.fetch(&key.0, &key.1, self.deadline).await;
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.clone()).or_default();
        match fetched {
            Ok(view) => {
                entry.snapshot = None;
                entry.view = Some(view.clone());
                entry.stale = false;
                entry.state = ActionState::Confirmed;
                Resolution::Unknown {
                    view,
                    refreshed: true,
                }
            }
            Err(e) if e.kind() == ErrorKind::SubjectGone => {
                info!(subject_id = %key.0, "Subject deleted while outcome was unknown");
                let view = entry.restore();
                entry.stale = false;
                entry.state = ActionState::RolledBack(ErrorKind::SubjectGone);
                match view {
                    Some(view) => Resolution::RolledBack {
                        view,
                        reason: ErrorKind::SubjectGone,
                    },
                    None => Resolution::Ignored,
                }
            }
            Err(e) => {
                warn!(subject_id = %key.0, error = %e, "Re-fetch failed, subject stays stale");
                let view = entry.restore();
                entry.state = ActionState::RolledBack(ErrorKind::OutcomeUnknown);
                match view {
                    Some(view) => Resolution::Unknown {
                        view,
                        refreshed: false,
                    },
                    None => Resolution::Ignored,
                }
            }
        }
    }
}

/// Maps a contribution receipt onto what the controller renders.
///
/// A closed aggregate is reported as an error so the prediction is rolled
/// back; other rejections are business outcomes rendered as state.
fn authoritative_contribution(
    subject_id: &SubjectId,
    receipt: ContributionReceipt,
) -> Result<Authoritative, EngineError> {
    let joined = match receipt.reason {
        None => true,
        Some(ErrorKind::AggregateClosed) => {
            return Err(EngineError::AggregateClosed(subject_id.clone()));
        }
        Some(ErrorKind::AlreadyParticipated) => true,
        Some(_) => false,
    };
    Ok(Authoritative {
        tally: receipt.tally,
        participants: receipt.participants,
        joined,
        reason: receipt.reason,
    })
}
