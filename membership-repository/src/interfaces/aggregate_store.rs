//! This module defines the `AggregateStore` trait, the storage collaborator of
//! the membership engine. It offers two kinds of write primitive: an atomic
//! multi-field transform that needs no prior read, and a versioned read paired
//! with a conditioned commit for read-check-write cycles.
use async_trait::async_trait;
use membership_shared::types::{ActorId, AggregateRecord, Direction, SubjectId, Versioned};

use crate::errors::StoreError;

/// A trait that defines the interface for persisting aggregate records.
///
/// Every successful mutation produces a new, strictly greater version. No
/// version is ever reused, not even after a subject is deleted and a record
/// with the same identifier is created again.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Inserts a new aggregate.
    ///
    /// # Returns
    ///
    /// * `Ok(Versioned<AggregateRecord>)` - The stored record and its first version
    /// * `Err(StoreError::AlreadyExists)` - A record with the same subject id exists
    /// * `Err(StoreError::InvariantViolation)` - The record is inconsistent
    async fn create(
        &self,
        record: &AggregateRecord,
    ) -> Result<Versioned<AggregateRecord>, StoreError>;

    /// Reads an aggregate together with its current version.
    ///
    /// # Returns
    ///
    /// * `Ok(Versioned<AggregateRecord>)` - The current record
    /// * `Err(StoreError::NotFound)` - No record exists for the subject
    async fn read(&self, subject_id: &SubjectId) -> Result<Versioned<AggregateRecord>, StoreError>;

    /// Atomically applies a set-union/set-remove of `actor_id` paired with a
    /// matching `+1`/`-1` delta on the single counter.
    ///
    /// Both fields change together or neither does. The delta is only applied
    /// when the set membership actually changes, so repeating a direction is a
    /// no-op that returns the current record unchanged.
    ///
    /// # Returns
    ///
    /// * `Ok(Versioned<AggregateRecord>)` - The record after the transform
    /// * `Err(StoreError::NotFound)` - No record exists for the subject
    /// * `Err(StoreError::Closed)` - The aggregate is closed
    /// * `Err(StoreError::CapacityReached)` - An add would exceed the capacity
    /// * `Err(StoreError::UnsupportedTransform)` - The aggregate is a multi-option poll
    async fn apply_transform(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Direction,
    ) -> Result<Versioned<AggregateRecord>, StoreError>;

    /// Replaces participants, tally and closed flag of a record, provided its
    /// version still equals `expected_version`.
    ///
    /// Capacity and option labels are immutable and are not written.
    ///
    /// # Returns
    ///
    /// * `Ok(Versioned<AggregateRecord>)` - The committed record and its new version
    /// * `Err(StoreError::VersionConflict)` - Another writer committed first
    /// * `Err(StoreError::NotFound)` - The record was deleted
    /// * `Err(StoreError::InvariantViolation)` - The proposed record is inconsistent
    async fn commit_if_unchanged(
        &self,
        expected_version: u64,
        record: &AggregateRecord,
    ) -> Result<Versioned<AggregateRecord>, StoreError>;

    /// Marks an aggregate closed. Closing a closed aggregate is a no-op.
    async fn close(&self, subject_id: &SubjectId)
    -> Result<Versioned<AggregateRecord>, StoreError>;

    /// Removes an aggregate as a whole.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The record existed and was removed
    /// * `Ok(false)` - There was nothing to remove
    async fn delete(&self, subject_id: &SubjectId) -> Result<bool, StoreError>;

    /// Lists the subject ids of all stored aggregates in ascending order.
    async fn list_subjects(&self) -> Result<Vec<SubjectId>, StoreError>;
}
