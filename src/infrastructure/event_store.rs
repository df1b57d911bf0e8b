use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::events::{AccountEvent, EventDecodeError};
use crate::infrastructure::outbox::{OutboxMessage, OutboxRepositoryTrait, PgOutboxRepository};

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error(
        "Optimistic concurrency conflict for aggregate {aggregate_id}: \
         expected version {expected}, but found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },
    #[error("Event store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("Stored event could not be decoded: {0}")]
    Decode(#[from] EventDecodeError),
    #[error("Event payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted envelope, one row per event in the `events` table. The UNIQUE
/// constraint on `(aggregate_id, version)` is what makes the optimistic
/// concurrency check hold under concurrent writers.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub data: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub version: i64,
    pub correlation_id: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStoreTrait: Send + Sync {
    /// Appends `event` at `expected_version + 1`. Fails with
    /// `ConcurrencyConflict` when the stream has moved past
    /// `expected_version`; the caller must reload and retry, never resubmit
    /// blindly.
    async fn append(
        &self,
        aggregate_id: Uuid,
        event: &AccountEvent,
        expected_version: i64,
        correlation_id: &str,
    ) -> Result<(), EventStoreError>;

    /// Full history for the aggregate, oldest first. Empty when the
    /// aggregate is unknown.
    async fn get_events(&self, aggregate_id: Uuid) -> Result<Vec<AccountEvent>, EventStoreError>;

    /// Highest stored version, 0 when the aggregate has no events yet.
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError>;
}

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
    outbox: PgOutboxRepository,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        let outbox = PgOutboxRepository::new(pool.clone());
        Self { pool, outbox }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

#[async_trait]
impl EventStoreTrait for PgEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        event: &AccountEvent,
        expected_version: i64,
        correlation_id: &str,
    ) -> Result<(), EventStoreError> {
        let data = event.payload()?;

        let mut tx = self.pool.begin().await?;

        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&mut *tx)
        .await?;

        if current != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }

        let version = expected_version + 1;
        let occurred_at = Utc::now();

        let inserted = sqlx::query(
            "INSERT INTO events (id, aggregate_id, event_type, data, occurred_at, version, correlation_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(aggregate_id)
        .bind(event.event_type())
        .bind(&data)
        .bind(occurred_at)
        .bind(version)
        .bind(correlation_id)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                // A racing writer slipped between our version read and the
                // insert; the constraint, not the read, is the real guard.
                drop(tx);
                let actual = self.current_version(aggregate_id).await.unwrap_or(version);
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: expected_version,
                    actual,
                });
            }
            return Err(err.into());
        }

        // Publication intent commits atomically with the event; the outbox
        // relay performs the actual bus write.
        self.outbox
            .add_pending(
                &mut tx,
                OutboxMessage {
                    id: Uuid::new_v4(),
                    aggregate_id,
                    event_type: event.event_type().to_string(),
                    payload: data,
                    correlation_id: correlation_id.to_string(),
                },
            )
            .await?;

        tx.commit().await?;

        debug!(
            aggregate_id = %aggregate_id,
            event_type = event.event_type(),
            version,
            correlation_id,
            "event appended"
        );
        Ok(())
    }

    async fn get_events(&self, aggregate_id: Uuid) -> Result<Vec<AccountEvent>, EventStoreError> {
        let rows: Vec<StoredEvent> = sqlx::query_as(
            "SELECT id, aggregate_id, event_type, data, occurred_at, version, correlation_id \
             FROM events WHERE aggregate_id = $1 ORDER BY version ASC",
        )
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| AccountEvent::from_parts(&row.event_type, &row.data).map_err(Into::into))
            .collect()
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }
}
