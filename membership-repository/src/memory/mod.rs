//! In-memory implementation of the aggregate store.
//!
//! Each primitive runs under a single write lock, which makes it atomic with
//! respect to every other primitive. Used in tests and when the service runs
//! without a database.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use membership_shared::types::{
    ActorId, AggregateRecord, Direction, SubjectId, Tally, Versioned,
};
use membership_shared::{ViolationKind, check_invariants, check_transition};
use tokio::sync::RwLock;
use tracing::debug;

use crate::transform::transformed;
use crate::{AggregateStore, StoreError};

/// Aggregate store backed by a `HashMap` behind a `tokio` read-write lock.
pub struct MemoryAggregateStore {
    records: RwLock<HashMap<SubjectId, Versioned<AggregateRecord>>>,
    last_version: AtomicU64,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            last_version: AtomicU64::new(0),
        }
    }

    fn next_version(&self) -> u64 {
        self.last_version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for MemoryAggregateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn create(
        &self,
        record: &AggregateRecord,
    ) -> Result<Versioned<AggregateRecord>, StoreError> {
        check_invariants(record).map_err(|kind| StoreError::invariant(&record.subject_id, kind))?;

        let mut records = self.records.write().await;
        if records.contains_key(&record.subject_id) {
            return Err(StoreError::AlreadyExists(record.subject_id.clone()));
        }
        let stored = Versioned::new(self.next_version(), record.clone());
        records.insert(record.subject_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn read(&self, subject_id: &SubjectId) -> Result<Versioned<AggregateRecord>, StoreError> {
        self.records
            .read()
            .await
            .get(subject_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(subject_id.clone()))
    }

    async fn apply_transform(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Direction,
    ) -> Result<Versioned<AggregateRecord>, StoreError> {
        let mut records = self.records.write().await;
        let current = records
            .get(subject_id)
            .ok_or_else(|| StoreError::NotFound(subject_id.clone()))?;

        let Some(next) = transformed(&current.value, actor_id, direction)? else {
            debug!(subject_id = %subject_id, actor_id = %actor_id, ?direction, "Transform is a no-op");
            return Ok(current.clone());
        };
        check_transition(&current.value, &next)
            .map_err(|kind| StoreError::invariant(subject_id, kind))?;

        let stored = Versioned::new(self.next_version(), next);
        records.insert(subject_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn commit_if_unchanged(
        &self,
        expected_version: u64,
        record: &AggregateRecord,
    ) -> Result<Versioned<AggregateRecord>, StoreError> {
        let subject_id = &record.subject_id;
        let mut records = self.records.write().await;
        let current = records
            .get(subject_id)
            .ok_or_else(|| StoreError::NotFound(subject_id.clone()))?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                subject_id: subject_id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }

        // Only counts are committed; option labels stay as created.
        let tally = match (&current.value.tally, &record.tally) {
            (Tally::Single { .. }, Tally::Single { count }) => Tally::Single { count: *count },
            (Tally::Options { options, .. }, Tally::Options { counts, .. }) => Tally::Options {
                options: options.clone(),
                counts: counts.clone(),
            },
            _ => return Err(StoreError::invariant(subject_id, ViolationKind::CountMismatch)),
        };

        let mut next = current.value.clone();
        next.participants = record.participants.clone();
        next.tally = tally;
        next.closed = record.closed;
        check_transition(&current.value, &next)
            .map_err(|kind| StoreError::invariant(subject_id, kind))?;

        let stored = Versioned::new(self.next_version(), next);
        records.insert(subject_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn close(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Versioned<AggregateRecord>, StoreError> {
        let mut records = self.records.write().await;
        let current = records
            .get(subject_id)
            .ok_or_else(|| StoreError::NotFound(subject_id.clone()))?;
        if current.value.closed {
            return Ok(current.clone());
        }

        let mut next = current.value.clone();
        next.closed = true;
        let stored = Versioned::new(self.next_version(), next);
        records.insert(subject_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, subject_id: &SubjectId) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(subject_id).is_some())
    }

    async fn list_subjects(&self) -> Result<Vec<SubjectId>, StoreError> {
        let mut subjects: Vec<SubjectId> = self.records.read().await.keys().cloned().collect();
        subjects.sort();
        Ok(subjects)
    }
}
