//! PostgreSQL implementation of the aggregate store.
//!
//! Provides a PostgreSQL backend for the `AggregateStore` trait.
//!
//! ## Key Features
//!
//! - Connection pooling with `sqlx::PgPool`
//! - Commutative transforms as single conditional `UPDATE` statements
//!   (`array_append`/`array_remove` paired with the counter delta)
//! - Compare-and-set commits on the `version` column
//! - Versions drawn from a sequence so they are never reused
//!
//! ## Database Tables
//!
//! - `aggregates`: one row per subject with participants, counts, options,
//!   capacity, closed flag and version
use async_trait::async_trait;
use membership_shared::check_invariants;
use membership_shared::types::{
    ActorId, AggregateRecord, Direction, RawAggregate, SubjectId, Versioned,
};
use membership_shared::ViolationKind;
use tracing::{debug, info, instrument};

use crate::transform::transformed;
use crate::{AggregateStore, StoreError};

/// Number of times a transform is re-issued when its conditional update
/// matched nothing but the re-read state shows no reason to refuse it.
const TRANSFORM_ATTEMPTS: usize = 3;

const SELECT_SQL: &str = r#"
    SELECT subject_id, participants, counts, options, capacity, closed, version
    FROM aggregates
    WHERE subject_id = $1
"#;

const INSERT_SQL: &str = r#"
    INSERT INTO aggregates (subject_id, participants, counts, options, capacity, closed, version)
    VALUES ($1, $2, $3, $4, $5, $6, nextval('aggregate_version_seq'))
    ON CONFLICT (subject_id) DO NOTHING
    RETURNING subject_id, participants, counts, options, capacity, closed, version
"#;

const ADD_SQL: &str = r#"
    UPDATE aggregates
    SET participants = array_append(participants, $2),
        counts = ARRAY[counts[1] + 1],
        version = nextval('aggregate_version_seq')
    WHERE subject_id = $1
      AND NOT closed
      AND options IS NULL
      AND NOT ($2 = ANY(participants))
      AND (capacity IS NULL OR cardinality(participants) < capacity)
    RETURNING subject_id, participants, counts, options, capacity, closed, version
"#;

const REMOVE_SQL: &str = r#"
    UPDATE aggregates
    SET participants = array_remove(participants, $2),
        counts = ARRAY[counts[1] - 1],
        version = nextval('aggregate_version_seq')
    WHERE subject_id = $1
      AND NOT closed
      AND options IS NULL
      AND $2 = ANY(participants)
    RETURNING subject_id, participants, counts, options, capacity, closed, version
"#;

const COMMIT_SQL: &str = r#"
    UPDATE aggregates
    SET participants = $2,
        counts = $3,
        closed = $4,
        version = nextval('aggregate_version_seq')
    WHERE subject_id = $1
      AND version = $5
      AND (capacity IS NULL OR cardinality($2::text[]) <= capacity)
      AND (NOT closed OR (participants = $2 AND counts = $3 AND $4))
    RETURNING subject_id, participants, counts, options, capacity, closed, version
"#;

const CLOSE_SQL: &str = r#"
    UPDATE aggregates
    SET closed = TRUE,
        version = nextval('aggregate_version_seq')
    WHERE subject_id = $1 AND NOT closed
    RETURNING subject_id, participants, counts, options, capacity, closed, version
"#;

/// One row of the `aggregates` table.
#[derive(Debug, sqlx::FromRow)]
struct AggregateRow {
    subject_id: String,
    participants: Vec<String>,
    counts: Vec<i64>,
    options: Option<Vec<String>>,
    capacity: Option<i64>,
    closed: bool,
    version: i64,
}

impl AggregateRow {
    /// Decodes the row, validating it through [`RawAggregate::into_record`].
    fn into_versioned(self) -> Result<Versioned<AggregateRecord>, StoreError> {
        let subject_id = SubjectId::new(self.subject_id.clone());
        let raw = RawAggregate {
            subject_id: self.subject_id,
            participants: self.participants,
            counts: self.counts,
            options: self.options,
            capacity: self.capacity,
            closed: self.closed,
        };
        let record = raw
            .into_record()
            .map_err(|kind| StoreError::invariant(&subject_id, kind))?;
        Ok(Versioned::new(self.version as u64, record))
    }
}

/// PostgreSQL implementation of the aggregate store.
///
/// All primitives are single statements, so each one is atomic on its own and
/// no explicit transaction is held across round trips.
pub struct PostgresAggregateStore {
    pool: sqlx::PgPool,
}

impl PostgresAggregateStore {
    /// Creates a store over an existing connection pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - PostgreSQL connection pool; the schema is created by [`Self::migrate`]
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = sqlx::PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("src/postgres/migrations")
            .run(&self.pool)
            .await?;
        info!("Aggregate schema is up to date");
        Ok(())
    }

    async fn fetch_row(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<Versioned<AggregateRecord>>, StoreError> {
        sqlx::query_as::<_, AggregateRow>(SELECT_SQL)
            .bind(subject_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(AggregateRow::into_versioned)
            .transpose()
    }
}

#[async_trait]
impl AggregateStore for PostgresAggregateStore {
    #[instrument(skip_all, fields(subject_id = %record.subject_id))]
    async fn create(
        &self,
        record: &AggregateRecord,
    ) -> Result<Versioned<AggregateRecord>, StoreError> {
        check_invariants(record).map_err(|kind| StoreError::invariant(&record.subject_id, kind))?;

        let raw = RawAggregate::from(record);
        sqlx::query_as::<_, AggregateRow>(INSERT_SQL)
            .bind(&raw.subject_id)
            .bind(&raw.participants)
            .bind(&raw.counts)
            .bind(&raw.options)
            .bind(raw.capacity)
            .bind(raw.closed)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::AlreadyExists(record.subject_id.clone()))?
            .into_versioned()
    }

    async fn read(&self, subject_id: &SubjectId) -> Result<Versioned<AggregateRecord>, StoreError> {
        self.fetch_row(subject_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(subject_id.clone()))
    }

    #[instrument(skip_all, fields(subject_id = %subject_id, actor_id = %actor_id))]
    async fn apply_transform(
        &self,
        subject_id: &SubjectId,
        actor_id: &ActorId,
        direction: Direction,
    ) -> Result<Versioned<AggregateRecord>, StoreError> {
        let sql = match direction {
            Direction::Add => ADD_SQL,
            Direction::Remove => REMOVE_SQL,
        };

        for _ in 0..TRANSFORM_ATTEMPTS {
            let updated = sqlx::query_as::<_, AggregateRow>(sql)
                .bind(subject_id.as_str())
                .bind(actor_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = updated {
                return row.into_versioned();
            }

            // The conditional update matched nothing: find out which guard refused it.
            let current = self.read(subject_id).await?;
            if transformed(&current.value, actor_id, direction)?.is_none() {
                return Ok(current);
            }
            debug!("Transform guard changed concurrently, re-issuing");
        }

        Err(StoreError::backend(format!(
            "transform on {subject_id} kept racing with concurrent writers"
        )))
    }

    #[instrument(skip_all, fields(subject_id = %record.subject_id))]
    async fn commit_if_unchanged(
        &self,
        expected_version: u64,
        record: &AggregateRecord,
    ) -> Result<Versioned<AggregateRecord>, StoreError> {
        let subject_id = &record.subject_id;
        check_invariants(record).map_err(|kind| StoreError::invariant(subject_id, kind))?;

        let raw = RawAggregate::from(record);
        let committed = sqlx::query_as::<_, AggregateRow>(COMMIT_SQL)
            .bind(&raw.subject_id)
            .bind(&raw.participants)
            .bind(&raw.counts)
            .bind(raw.closed)
            .bind(expected_version as i64)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = committed {
            return row.into_versioned();
        }

        let current = self.read(subject_id).await?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                subject_id: subject_id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }
        let kind = if current.value.closed {
            ViolationKind::MutationAfterClose
        } else {
            ViolationKind::CapacityExceeded
        };
        Err(StoreError::invariant(subject_id, kind))
    }

    #[instrument(skip_all, fields(subject_id = %subject_id))]
    async fn close(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Versioned<AggregateRecord>, StoreError> {
        let closed = sqlx::query_as::<_, AggregateRow>(CLOSE_SQL)
            .bind(subject_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match closed {
            Some(row) => row.into_versioned(),
            None => self.read(subject_id).await,
        }
    }

    #[instrument(skip_all, fields(subject_id = %subject_id))]
    async fn delete(&self, subject_id: &SubjectId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM aggregates WHERE subject_id = $1")
            .bind(subject_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_subjects(&self) -> Result<Vec<SubjectId>, StoreError> {
        let subjects: Vec<String> =
            sqlx::query_scalar("SELECT subject_id FROM aggregates ORDER BY subject_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(subjects.into_iter().map(SubjectId::from).collect())
    }
}
