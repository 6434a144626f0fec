//! Invariant auditor.
//!
//! Walks every stored aggregate and checks it against the consistency
//! invariants. Stored rows that cannot even be decoded (negative tallies,
//! duplicate participants) are reported alongside records that decode but
//! break an invariant.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use membership_repository::{AggregateStore, StoreError};
use membership_shared::types::SubjectId;
use membership_shared::{ViolationKind, check_invariants};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument};

use crate::errors::AuditorError;

/// One aggregate that failed the audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub subject_id: SubjectId,
    pub kind: ViolationKind,
}

/// Result of one audit pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Aggregates read and checked.
    pub checked: usize,
    /// Aggregates deleted between listing and reading.
    pub vanished: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Checks stored aggregates against the consistency invariants.
pub struct InvariantAuditor {
    store: Arc<dyn AggregateStore>,
}

impl InvariantAuditor {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Audits every aggregate once.
    ///
    /// # Returns
    ///
    /// * `Ok(AuditReport)` - Number of checked aggregates and all violations
    /// * `Err(AuditorError)` - The store could not be listed or read
    #[instrument(skip_all)]
    pub async fn run_once(&self) -> Result<AuditReport, AuditorError> {
        let mut report = AuditReport::default();

        for subject_id in self.store.list_subjects().await? {
            match self.store.read(&subject_id).await {
                Ok(current) => {
                    report.checked += 1;
                    if let Err(kind) = check_invariants(&current.value) {
                        report.violations.push(Violation { subject_id, kind });
                    }
                }
                Err(StoreError::InvariantViolation { subject_id, kind }) => {
                    report.checked += 1;
                    report.violations.push(Violation { subject_id, kind });
                }
                Err(StoreError::NotFound(subject_id)) => {
                    debug!(subject_id = %subject_id, "Aggregate deleted during audit");
                    report.vanished += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        for violation in &report.violations {
            error!(
                subject_id = %violation.subject_id,
                violation = %violation.kind,
                "Aggregate violates consistency invariants"
            );
        }
        info!(
            checked = report.checked,
            vanished = report.vanished,
            violations = report.violations.len(),
            "Audit pass finished"
        );
        Ok(report)
    }

    /// Audits on `period` until `shutdown` resolves.
    ///
    /// A failed pass is logged and the next one runs on schedule.
    ///
    /// # Returns
    ///
    /// The number of completed passes.
    pub async fn watch(&self, period: Duration, shutdown: impl Future<Output = ()>) -> usize {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut passes = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(passes, "Received shutdown signal");
                    return passes;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(_) => passes += 1,
                        Err(e) => error!(error = %e, "Audit pass failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use membership_repository::MemoryAggregateStore;
    use membership_shared::types::{ActorId, AggregateRecord, Direction, Tally, Versioned};

    /// Store serving fixed reads, including rows that fail to decode.
    struct FixtureStore {
        subjects: Vec<SubjectId>,
    }

    fn inconsistent(subject_id: &SubjectId) -> AggregateRecord {
        let mut record = AggregateRecord::new_counter(subject_id.clone());
        record.participants.insert(ActorId::new("a"));
        record.tally = Tally::Single { count: 2 };
        record
    }

    #[async_trait]
    impl AggregateStore for FixtureStore {
        async fn create(
            &self,
            _record: &AggregateRecord,
        ) -> Result<Versioned<AggregateRecord>, StoreError> {
            Err(StoreError::backend("read-only fixture"))
        }

        async fn read(
            &self,
            subject_id: &SubjectId,
        ) -> Result<Versioned<AggregateRecord>, StoreError> {
            match subject_id.as_str() {
                "ok" => Ok(Versioned::new(
                    1,
                    AggregateRecord::new_counter(subject_id.clone()),
                )),
                "mismatch" => Ok(Versioned::new(2, inconsistent(subject_id))),
                "negative" => Err(StoreError::invariant(
                    subject_id,
                    ViolationKind::NegativeTally,
                )),
                _ => Err(StoreError::NotFound(subject_id.clone())),
            }
        }

        async fn apply_transform(
            &self,
            _subject_id: &SubjectId,
            _actor_id: &ActorId,
            _direction: Direction,
        ) -> Result<Versioned<AggregateRecord>, StoreError> {
            Err(StoreError::backend("read-only fixture"))
        }

        async fn commit_if_unchanged(
            &self,
            _expected_version: u64,
            _record: &AggregateRecord,
        ) -> Result<Versioned<AggregateRecord>, StoreError> {
            Err(StoreError::backend("read-only fixture"))
        }

        async fn close(
            &self,
            _subject_id: &SubjectId,
        ) -> Result<Versioned<AggregateRecord>, StoreError> {
            Err(StoreError::backend("read-only fixture"))
        }

        async fn delete(&self, _subject_id: &SubjectId) -> Result<bool, StoreError> {
            Err(StoreError::backend("read-only fixture"))
        }

        async fn list_subjects(&self) -> Result<Vec<SubjectId>, StoreError> {
            Ok(self.subjects.clone())
        }
    }

    #[tokio::test]
    async fn test_clean_store_passes() {
        let store = Arc::new(MemoryAggregateStore::new());
        store
            .create(&AggregateRecord::new_poll(SubjectId::new("poll-1"), ["BMW", "Toyota"]))
            .await
            .unwrap();
        store
            .create(&AggregateRecord::new_counter(SubjectId::new("post-1")))
            .await
            .unwrap();
        store
            .apply_transform(&SubjectId::new("post-1"), &ActorId::new("a"), Direction::Add)
            .await
            .unwrap();

        let report = InvariantAuditor::new(store).run_once().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.checked, 2);
    }

    #[tokio::test]
    async fn test_violations_are_reported() {
        let store = Arc::new(FixtureStore {
            subjects: ["ok", "mismatch", "negative", "gone"]
                .into_iter()
                .map(SubjectId::new)
                .collect(),
        });

        let report = InvariantAuditor::new(store).run_once().await.unwrap();

        assert_eq!(report.checked, 3);
        assert_eq!(report.vanished, 1);
        assert_eq!(
            report.violations,
            vec![
                Violation {
                    subject_id: SubjectId::new("mismatch"),
                    kind: ViolationKind::CountMismatch,
                },
                Violation {
                    subject_id: SubjectId::new("negative"),
                    kind: ViolationKind::NegativeTally,
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_stops_on_shutdown() {
        let store = Arc::new(MemoryAggregateStore::new());
        let auditor = InvariantAuditor::new(store);

        let passes = auditor
            .watch(
                Duration::from_secs(10),
                tokio::time::sleep(Duration::from_secs(25)),
            )
            .await;

        // Ticks at 0s, 10s and 20s complete before the 25s shutdown.
        assert_eq!(passes, 3);
    }
}
