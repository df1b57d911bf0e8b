use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::infrastructure::config::OutboxRelayConfig;
use crate::infrastructure::event_publisher::EventPublisherTrait;

/// Publication intent recorded in the same transaction as the stored event.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: String,
}

/// Row retrieved by the relay, with delivery bookkeeping.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PersistedOutboxMessage {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
}

#[async_trait]
pub trait OutboxRepositoryTrait: Send + Sync {
    /// Inserts a PENDING row inside the caller's transaction, so the intent
    /// to publish commits atomically with the event append.
    async fn add_pending(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: OutboxMessage,
    ) -> Result<(), sqlx::Error>;

    /// Claims up to `limit` pending rows for this relay instance. Claimed
    /// rows move to PROCESSING so concurrent relays skip them.
    async fn fetch_and_lock_pending(
        &self,
        limit: i64,
    ) -> Result<Vec<PersistedOutboxMessage>, sqlx::Error>;

    async fn mark_processed(&self, id: Uuid) -> Result<(), sqlx::Error>;

    /// Records a delivery failure; the row returns to PENDING until
    /// `max_retries` is exhausted, then parks as FAILED.
    async fn record_failed_attempt(
        &self,
        id: Uuid,
        max_retries: i32,
        error: &str,
    ) -> Result<(), sqlx::Error>;
}

#[derive(Clone)]
pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepositoryTrait for PgOutboxRepository {
    async fn add_pending(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: OutboxMessage,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO event_outbox \
                 (id, aggregate_id, event_type, payload, correlation_id, status, created_at, retry_count) \
             VALUES ($1, $2, $3, $4, $5, 'PENDING', NOW(), 0)",
        )
        .bind(message.id)
        .bind(message.aggregate_id)
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(&message.correlation_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_and_lock_pending(
        &self,
        limit: i64,
    ) -> Result<Vec<PersistedOutboxMessage>, sqlx::Error> {
        sqlx::query_as(
            "UPDATE event_outbox SET status = 'PROCESSING', last_attempt_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM event_outbox WHERE status = 'PENDING' \
                 ORDER BY created_at ASC LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, aggregate_id, event_type, payload, correlation_id, status, \
                       created_at, last_attempt_at, retry_count",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM event_outbox WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_failed_attempt(
        &self,
        id: Uuid,
        max_retries: i32,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE event_outbox SET \
                 retry_count = retry_count + 1, \
                 last_attempt_at = NOW(), \
                 error_details = $3, \
                 status = CASE WHEN retry_count + 1 >= $2 THEN 'FAILED' ELSE 'PENDING' END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(max_retries)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Background relay that drains the outbox to the bus. Delivery is retried
/// until acknowledged, decoupling the event commit from bus availability.
pub struct OutboxRelay {
    repository: Arc<dyn OutboxRepositoryTrait>,
    publisher: Arc<dyn EventPublisherTrait>,
    config: OutboxRelayConfig,
    shutdown: CancellationToken,
}

impl OutboxRelay {
    pub fn new(
        repository: Arc<dyn OutboxRepositoryTrait>,
        publisher: Arc<dyn EventPublisherTrait>,
        config: OutboxRelayConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            repository,
            publisher,
            config,
            shutdown,
        }
    }

    pub async fn run(&self) {
        info!(config = ?self.config, "outbox relay started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(self.config.poll_interval) => {}
            }

            if let Err(e) = self.drain_pending().await {
                error!(error = %e, "outbox poll failed");
            }
        }

        info!("outbox relay stopped");
    }

    /// One poll cycle: claim a batch and attempt delivery of each row.
    pub async fn drain_pending(&self) -> Result<usize, sqlx::Error> {
        let messages = self
            .repository
            .fetch_and_lock_pending(self.config.batch_size)
            .await?;

        let claimed = messages.len();
        for message in messages {
            self.deliver(message).await;
        }
        Ok(claimed)
    }

    async fn deliver(&self, message: PersistedOutboxMessage) {
        let key = message.aggregate_id.to_string();
        match self
            .publisher
            .publish(
                &message.payload,
                &message.event_type,
                &message.correlation_id,
                &key,
            )
            .await
        {
            Ok(()) => {
                if let Err(e) = self.repository.mark_processed(message.id).await {
                    // The publish went out; on restart the row is re-sent and
                    // consumers absorb the duplicate (at-least-once).
                    error!(outbox_id = %message.id, error = %e, "failed to mark outbox row processed");
                }
            }
            Err(e) => {
                warn!(
                    outbox_id = %message.id,
                    subject = %message.event_type,
                    retry_count = message.retry_count,
                    error = %e,
                    "outbox delivery failed"
                );
                if let Err(e) = self
                    .repository
                    .record_failed_attempt(message.id, self.config.max_retries, &e.to_string())
                    .await
                {
                    error!(outbox_id = %message.id, error = %e, "failed to record outbox attempt");
                }
            }
        }
    }
}
