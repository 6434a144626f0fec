//! Tests for the optimistic controller against a fault-injecting backend.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use membership_engine::controller::{
    ActionState, MembershipBackend, OptimisticController, Resolution,
};
use membership_engine::{EngineConfig, EngineError, MembershipService};
use membership_repository::MemoryAggregateStore;
use membership_shared::types::{
    ActorId, AggregateRecord, AggregateView, ContributionReceipt, Direction, ErrorKind, Selector,
    SubjectId, ToggleReceipt,
};
use tokio::sync::Notify;

const DEADLINE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Fail without touching the store.
    TransformFailed,
    /// Apply the request but answer after the deadline.
    LateAnswer,
    /// Answer after the deadline, by which time the subject was deleted.
    DeletedWhileLate,
}

/// Backend wrapping a real service with injectable faults.
struct FlakyBackend {
    service: MembershipService,
    fault: Mutex<Option<Fault>>,
    fetch_fails: AtomicBool,
    hold: AtomicBool,
    gate: Notify,
}

impl FlakyBackend {
    fn new() -> Self {
        Self {
            service: MembershipService::new(
                Arc::new(MemoryAggregateStore::new()),
                EngineConfig::default(),
            ),
            fault: Mutex::new(None),
            fetch_fails: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            gate: Notify::new(),
        }
    }

    fn inject(&self, fault: Fault) {
        *self.fault.lock().unwrap() = Some(fault);
    }

    async fn before_call(&self) -> Option<Fault> {
        if self.hold.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        self.fault.lock().unwrap().take()
    }
}

async fn answer<T>(
    fault: Option<Fault>,
    deadline: Duration,
    call: impl std::future::Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    match fault {
        None => call.await,
        Some(Fault::TransformFailed) => Err(EngineError::transform_failed("injected")),
        Some(Fault::LateAnswer | Fault::DeletedWhileLate) => {
            let _applied = call.await;
            tokio::time::sleep(deadline * 4).await;
            Err(EngineError::DeadlineExceeded(deadline))
        }
    }
}

#[async_trait]
impl MembershipBackend for FlakyBackend {
    async fn toggle(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Direction,
        deadline: Duration,
    ) -> Result<ToggleReceipt, EngineError> {
        let fault = self.before_call().await;
        let result = answer(
            fault,
            deadline,
            self.service.commutative_toggle(subject_id, actor_id, direction),
        )
        .await;
        if matches!(fault, Some(Fault::DeletedWhileLate)) {
            self.service.delete_aggregate(subject_id).await?;
        }
        result
    }

    async fn contribute(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        selector: Selector,
        deadline: Duration,
    ) -> Result<ContributionReceipt, EngineError> {
        let fault = self.before_call().await;
        answer(
            fault,
            deadline,
            self.service.guarded_contribute(subject_id, actor_id, selector),
        )
        .await
    }

    async fn fetch(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        _deadline: Duration,
    ) -> Result<AggregateView, EngineError> {
        if self.fetch_fails.load(Ordering::SeqCst) {
            return Err(EngineError::transform_failed("fetch unavailable"));
        }
        self.service.fetch(subject_id, actor_id).await
    }
}

async fn setup(record: AggregateRecord) -> (Arc<FlakyBackend>, OptimisticController) {
    let backend = Arc::new(FlakyBackend::new());
    backend.service.create_aggregate(record).await.unwrap();
    let controller = OptimisticController::new(backend.clone(), DEADLINE);
    (backend, controller)
}

fn post() -> SubjectId {
    SubjectId::new("post-1")
}

fn actor() -> ActorId {
    ActorId::new("a")
}

// ============================================================================
// Confirmation Tests
// ============================================================================

#[tokio::test]
async fn test_toggle_seeds_and_confirms() {
    let (_backend, controller) = setup(AggregateRecord::new_counter(post())).await;

    let resolution = controller.toggle(&post(), &actor()).await.unwrap();
    let expected = AggregateView {
        tally: vec![1],
        participants: 1,
        joined: true,
        closed: false,
    };
    assert_eq!(
        resolution,
        Resolution::Confirmed {
            view: expected.clone(),
            reason: None
        }
    );
    assert_eq!(controller.state(&post(), &actor()).await, ActionState::Confirmed);

    // The next toggle derives the opposite direction from the rendered view.
    let resolution = controller.toggle(&post(), &actor()).await.unwrap();
    match resolution {
        Resolution::Confirmed { view, .. } => {
            assert!(!view.joined);
            assert_eq!(view.participants, 0);
        }
        other => panic!("expected confirmation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_vote_confirms_authoritative_tally() {
    let poll = SubjectId::new("poll-1");
    let (backend, controller) =
        setup(AggregateRecord::new_poll(poll.clone(), ["BMW", "Toyota"])).await;
    controller.refresh(&poll, &actor()).await.unwrap();
    backend
        .service
        .guarded_contribute(&poll, &ActorId::new("b"), Selector::Choice(1))
        .await
        .unwrap();

    let resolution = controller
        .contribute(&poll, &actor(), Selector::Choice(0))
        .await
        .unwrap();

    let Resolution::Confirmed { view, reason } = resolution else {
        panic!("expected confirmation, got {resolution:?}");
    };
    assert_eq!(reason, None);
    assert_eq!(view.tally, vec![1, 1]);
    assert_eq!(view.percentages(), vec![50.0, 50.0]);
    assert!(view.joined);
}

#[tokio::test]
async fn test_repeated_vote_reconciles_as_already_participated() {
    let poll = SubjectId::new("poll-1");
    let (backend, controller) =
        setup(AggregateRecord::new_poll(poll.clone(), ["BMW", "Toyota"])).await;
    // The rendered view is out of date and still offers the vote.
    controller.refresh(&poll, &actor()).await.unwrap();
    backend
        .service
        .guarded_contribute(&poll, &actor(), Selector::Choice(0))
        .await
        .unwrap();

    let resolution = controller
        .contribute(&poll, &actor(), Selector::Choice(1))
        .await
        .unwrap();

    assert_eq!(
        resolution,
        Resolution::Confirmed {
            view: AggregateView {
                tally: vec![1, 0],
                participants: 1,
                joined: true,
                closed: false,
            },
            reason: Some(ErrorKind::AlreadyParticipated),
        }
    );
}

#[tokio::test]
async fn test_full_event_reconciles_as_capacity_reached() {
    let event = SubjectId::new("event-1");
    let (backend, controller) =
        setup(AggregateRecord::new_counter(event.clone()).with_capacity(1)).await;
    let y = ActorId::new("y");
    controller.refresh(&event, &y).await.unwrap();
    backend
        .service
        .guarded_contribute(&event, &ActorId::new("x"), Selector::Counter)
        .await
        .unwrap();

    let resolution = controller
        .contribute(&event, &y, Selector::Counter)
        .await
        .unwrap();

    let Resolution::Confirmed { view, reason } = resolution else {
        panic!("expected reconciliation, got {resolution:?}");
    };
    assert_eq!(reason, Some(ErrorKind::CapacityReached));
    assert_eq!(view.participants, 1);
    assert!(!view.joined);
}

#[tokio::test]
async fn test_capped_toggle_reconciles_with_fetched_state() {
    let community = SubjectId::new("community-1");
    let (backend, controller) =
        setup(AggregateRecord::new_counter(community.clone()).with_capacity(1)).await;
    controller.refresh(&community, &actor()).await.unwrap();
    backend
        .service
        .commutative_toggle(&community, &ActorId::new("b"), Direction::Add)
        .await
        .unwrap();

    let resolution = controller.toggle(&community, &actor()).await.unwrap();

    let Resolution::Confirmed { view, reason } = resolution else {
        panic!("expected reconciliation, got {resolution:?}");
    };
    assert_eq!(reason, Some(ErrorKind::CapacityReached));
    assert_eq!(view.participants, 1);
    assert!(!view.joined);
}

// ============================================================================
// Rollback Tests
// ============================================================================

#[tokio::test]
async fn test_fault_restores_snapshot_exactly() {
    let (backend, controller) = setup(AggregateRecord::new_counter(post())).await;
    let rendered = AggregateView {
        tally: vec![7],
        participants: 7,
        joined: false,
        closed: false,
    };
    controller.observe(&post(), &actor(), rendered.clone()).await;
    backend.inject(Fault::TransformFailed);

    let resolution = controller.toggle(&post(), &actor()).await.unwrap();

    assert_eq!(
        resolution,
        Resolution::RolledBack {
            view: rendered.clone(),
            reason: ErrorKind::TransformFailed,
        }
    );
    assert_eq!(controller.view(&post(), &actor()).await, Some(rendered));
    assert_eq!(
        controller.state(&post(), &actor()).await,
        ActionState::RolledBack(ErrorKind::TransformFailed)
    );
}

#[tokio::test]
async fn test_deleted_subject_rolls_back_as_gone() {
    let (backend, controller) = setup(AggregateRecord::new_counter(post())).await;
    let before = controller.refresh(&post(), &actor()).await.unwrap();
    backend.service.delete_aggregate(&post()).await.unwrap();

    let resolution = controller.toggle(&post(), &actor()).await.unwrap();

    assert_eq!(
        resolution,
        Resolution::RolledBack {
            view: before,
            reason: ErrorKind::SubjectGone,
        }
    );
}

#[tokio::test]
async fn test_closed_poll_rolls_back_as_gone() {
    let poll = SubjectId::new("poll-1");
    let (backend, controller) =
        setup(AggregateRecord::new_poll(poll.clone(), ["BMW", "Toyota"])).await;
    let before = controller.refresh(&poll, &actor()).await.unwrap();
    backend.service.close_aggregate(&poll).await.unwrap();

    let resolution = controller
        .contribute(&poll, &actor(), Selector::Choice(0))
        .await
        .unwrap();

    assert_eq!(
        resolution,
        Resolution::RolledBack {
            view: before,
            reason: ErrorKind::SubjectGone,
        }
    );
}

// ============================================================================
// In-flight and Timeout Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_action_while_predicted_is_ignored() {
    let (backend, controller) = setup(AggregateRecord::new_counter(post())).await;
    let controller = Arc::new(controller);
    controller.refresh(&post(), &actor()).await.unwrap();
    backend.hold.store(true, Ordering::SeqCst);

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.toggle(&post(), &actor()).await })
    };
    let predicted = loop {
        let view = controller.view(&post(), &actor()).await;
        if let Some(view) = view.filter(|view| view.joined) {
            break view;
        }
        tokio::task::yield_now().await;
    };
    assert_eq!(predicted.participants, 1);
    assert_eq!(controller.state(&post(), &actor()).await, ActionState::Predicted);

    let duplicate = controller.toggle(&post(), &actor()).await.unwrap();
    assert_eq!(duplicate, Resolution::Ignored);

    backend.hold.store(false, Ordering::SeqCst);
    backend.gate.notify_one();
    let resolution = first.await.unwrap().unwrap();
    assert!(matches!(resolution, Resolution::Confirmed { .. }));

    let stored = backend.service.fetch(&post(), &actor()).await.unwrap();
    assert_eq!(stored.participants, 1);
}

#[tokio::test]
async fn test_timeout_refetches_authoritative_view() {
    let (backend, controller) = setup(AggregateRecord::new_counter(post())).await;
    controller.refresh(&post(), &actor()).await.unwrap();
    backend.inject(Fault::LateAnswer);

    let resolution = controller.toggle(&post(), &actor()).await.unwrap();

    assert_eq!(
        resolution,
        Resolution::Unknown {
            view: AggregateView {
                tally: vec![1],
                participants: 1,
                joined: true,
                closed: false,
            },
            refreshed: true,
        }
    );
    assert!(!controller.is_stale(&post(), &actor()).await);
}

#[tokio::test]
async fn test_stale_subject_refuses_prediction_until_refetch() {
    let (backend, controller) = setup(AggregateRecord::new_counter(post())).await;
    let before = controller.refresh(&post(), &actor()).await.unwrap();
    backend.inject(Fault::LateAnswer);
    backend.fetch_fails.store(true, Ordering::SeqCst);

    let resolution = controller.toggle(&post(), &actor()).await.unwrap();
    assert_eq!(
        resolution,
        Resolution::Unknown {
            view: before.clone(),
            refreshed: false,
        }
    );
    assert!(controller.is_stale(&post(), &actor()).await);

    let refused = controller.toggle(&post(), &actor()).await;
    assert!(refused.is_err());
    assert_eq!(controller.view(&post(), &actor()).await, Some(before));

    // The late answer did commit; once the view is re-fetched the toggle
    // derives a leave from the authoritative membership.
    backend.fetch_fails.store(false, Ordering::SeqCst);
    let resolution = controller.toggle(&post(), &actor()).await.unwrap();
    let Resolution::Confirmed { view, .. } = resolution else {
        panic!("expected confirmation, got {resolution:?}");
    };
    assert!(!view.joined);
    assert_eq!(view.participants, 0);
    assert!(!controller.is_stale(&post(), &actor()).await);
}

#[tokio::test]
async fn test_subject_deleted_during_timeout_rolls_back_as_gone() {
    let (backend, controller) = setup(AggregateRecord::new_counter(post())).await;
    let rendered = AggregateView {
        tally: vec![3],
        participants: 3,
        joined: false,
        closed: false,
    };
    controller.observe(&post(), &actor(), rendered.clone()).await;
    backend.inject(Fault::DeletedWhileLate);

    let resolution = controller.toggle(&post(), &actor()).await.unwrap();

    assert_eq!(
        resolution,
        Resolution::RolledBack {
            view: rendered.clone(),
            reason: ErrorKind::SubjectGone,
        }
    );
    assert_eq!(
        controller.state(&post(), &actor()).await,
        ActionState::RolledBack(ErrorKind::SubjectGone)
    );
    assert!(!controller.is_stale(&post(), &actor()).await);
    assert_eq!(controller.view(&post(), &actor()).await, Some(rendered));
}

#[tokio::test]
async fn test_unseeded_view_with_failing_fetch_is_refused() {
    let (backend, controller) = setup(AggregateRecord::new_counter(post())).await;
    backend.fetch_fails.store(true, Ordering::SeqCst);

    let result = controller.toggle(&post(), &actor()).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::TransformFailed);
    assert_eq!(controller.state(&post(), &actor()).await, ActionState::Idle);
    assert_eq!(controller.view(&post(), &actor()).await, None);
}
