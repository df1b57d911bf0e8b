use futures::StreamExt;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Headers, Message, OwnedMessage};
use rdkafka::types::RDKafkaErrorCode;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::events::{AccountCreated, AccountDeleted, UserAuthenticated};
use crate::infrastructure::config::KafkaConfig;
use crate::infrastructure::read_model::{AccountRecord, ReadModelError, ReadModelStoreTrait};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Read model error: {0}")]
    ReadModel(#[from] ReadModelError),
    #[error("Malformed message payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Message carried no payload")]
    EmptyPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Starting,
    Processing,
    Stopping,
}

/// Outcome of applying one message to the read model. The `bool` reports
/// whether a row actually changed; a redelivered event reports `false` and
/// is still acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projected {
    Created(bool),
    Deleted(bool),
    LoginRecorded,
    Skipped,
}

struct RebalanceLoggingContext;

impl ClientContext for RebalanceLoggingContext {}

impl ConsumerContext for RebalanceLoggingContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        info!("pre-rebalance: {:?}", rebalance);
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        info!("post-rebalance: {:?}", rebalance);
    }
}

type LoggingConsumer = StreamConsumer<RebalanceLoggingContext>;

/// Subscribes to the account event topic and keeps the read model in step
/// with the stream. Messages are acknowledged (offset stored) only after the
/// handler succeeds, so a crash or handler failure leads to transport-level
/// redelivery and the idempotent handlers absorb the duplicates.
pub struct ProjectionWorker {
    consumer: Arc<LoggingConsumer>,
    read_model: Arc<dyn ReadModelStoreTrait>,
    config: KafkaConfig,
    state: Arc<RwLock<WorkerState>>,
    limiter: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl ProjectionWorker {
    pub fn new(
        config: KafkaConfig,
        read_model: Arc<dyn ReadModelStoreTrait>,
        shutdown: CancellationToken,
    ) -> Result<Self, ConsumerError> {
        let consumer: LoggingConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.partition.eof", "false")
            .set("allow.auto.create.topics", "true")
            .set("queued.min.messages", config.prefetch_count.to_string())
            .set(
                "max.poll.interval.ms",
                config.consumer_max_poll_interval_ms.to_string(),
            )
            .set(
                "session.timeout.ms",
                config.consumer_session_timeout_ms.to_string(),
            )
            .set("heartbeat.interval.ms", "3000")
            .create_with_context(RebalanceLoggingContext)?;

        let limiter = Arc::new(Semaphore::new(config.max_concurrent_handlers));

        Ok(Self {
            consumer: Arc::new(consumer),
            read_model,
            config,
            state: Arc::new(RwLock::new(WorkerState::Stopped)),
            limiter,
            shutdown,
        })
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, state: WorkerState) {
        info!(?state, "projection worker state change");
        *self.state.write().unwrap() = state;
    }

    pub async fn run(&self) -> Result<(), ConsumerError> {
        self.set_state(WorkerState::Starting);
        self.consumer
            .subscribe(&[self.config.users_topic.as_str()])?;
        info!(
            topic = %self.config.users_topic,
            group = %self.config.group_id,
            max_in_flight = self.config.max_concurrent_handlers,
            prefetch = self.config.prefetch_count,
            "projection worker subscribed"
        );
        self.set_state(WorkerState::Processing);

        {
            let mut stream = self.consumer.stream();
            let mut commit_tick =
                tokio::time::interval(Duration::from_millis(self.config.commit_interval_ms));
            commit_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = commit_tick.tick() => self.commit_stored_offsets(CommitMode::Async),
                    next = stream.next() => match next {
                        Some(Ok(message)) => self.dispatch(message.detach()).await,
                        Some(Err(e)) => {
                            // Transport-level failure: log and keep polling,
                            // the worker loop itself must not crash.
                            error!(error = %e, "consumer transport error");
                        }
                        None => break,
                    }
                }
            }
        }

        self.set_state(WorkerState::Stopping);
        // Wait for in-flight handlers before the final offset commit.
        let _ = self
            .limiter
            .acquire_many(self.config.max_concurrent_handlers as u32)
            .await;
        self.commit_stored_offsets(CommitMode::Sync);
        self.set_state(WorkerState::Stopped);
        Ok(())
    }

    /// Hands the message to a bounded pool of handler tasks. The permit caps
    /// how many messages are processed concurrently.
    async fn dispatch(&self, message: OwnedMessage) {
        let permit = match self.limiter.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let consumer = self.consumer.clone();
        let read_model = self.read_model.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let subject = header_value(&message, "subject").unwrap_or_default();
            let correlation_id = header_value(&message, "correlation-id").unwrap_or_default();
            info!(subject = %subject, correlation_id = %correlation_id, "message received");

            match handle_message(read_model.as_ref(), &subject, message.payload()).await {
                Ok(outcome) => {
                    if let Projected::Created(false) | Projected::Deleted(false) = outcome {
                        info!(subject = %subject, correlation_id = %correlation_id, "already applied, no-op");
                    }
                    if let Err(e) =
                        consumer.store_offset(message.topic(), message.partition(), message.offset())
                    {
                        error!(error = %e, "failed to store offset");
                    }
                }
                Err(e) => {
                    error!(
                        subject = %subject,
                        correlation_id = %correlation_id,
                        error = %e,
                        "handler failed, message left unacknowledged for redelivery"
                    );
                }
            }
        });
    }

    fn commit_stored_offsets(&self, mode: CommitMode) {
        if let Err(e) = self.consumer.commit_consumer_state(mode) {
            match e {
                KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset) => {}
                other => warn!(error = %other, "offset commit failed"),
            }
        }
    }
}

fn header_value(message: &OwnedMessage, key: &str) -> Option<String> {
    message.headers().and_then(|headers| {
        headers
            .iter()
            .find(|header| header.key == key)
            .and_then(|header| header.value)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    })
}

/// Routes one message by subject and applies it to the read model. Unknown
/// subjects are dropped (logged and acknowledged); every error return leaves
/// the message unacknowledged at the call site.
pub async fn handle_message(
    read_model: &dyn ReadModelStoreTrait,
    subject: &str,
    payload: Option<&[u8]>,
) -> Result<Projected, ConsumerError> {
    let body = payload.ok_or(ConsumerError::EmptyPayload)?;

    match subject {
        "UserCreated" => {
            let event: AccountCreated = serde_json::from_slice(body)?;
            let inserted = read_model
                .insert_if_absent(AccountRecord::from_created(
                    event.aggregate_id,
                    event.name,
                    event.password_hash,
                    event.email,
                    event.profile.to_string(),
                    event.active,
                ))
                .await?;
            Ok(Projected::Created(inserted))
        }
        "UserDeleted" => {
            let event: AccountDeleted = serde_json::from_slice(body)?;
            let removed = read_model.delete(event.aggregate_id).await?;
            Ok(Projected::Deleted(removed))
        }
        "UserLogin" => {
            let event: UserAuthenticated = serde_json::from_slice(body)?;
            read_model.record_login(event.aggregate_id).await?;
            Ok(Projected::LoginRecorded)
        }
        other => {
            warn!(subject = other, "unknown event subject, dropping message");
            Ok(Projected::Skipped)
        }
    }
}
