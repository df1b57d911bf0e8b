use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::infrastructure::config::KafkaConfig;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Producer creation failed: {0}")]
    Connection(String),
    #[error("Producer error: {0}")]
    Producer(String),
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rdkafka::error::KafkaError> for PublishError {
    fn from(error: rdkafka::error::KafkaError) -> Self {
        match error {
            rdkafka::error::KafkaError::ClientCreation(e) => PublishError::Connection(e),
            other => PublishError::Producer(other.to_string()),
        }
    }
}

/// Fire-and-forget publication contract: the send is awaited only for
/// transport-level confirmation, and the bus guarantees at-least-once
/// delivery downstream, never exactly-once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisherTrait: Send + Sync {
    async fn publish(
        &self,
        payload: &serde_json::Value,
        subject: &str,
        correlation_id: &str,
        key: &str,
    ) -> Result<(), PublishError>;
}

#[derive(Clone)]
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaEventPublisher {
    pub fn new(config: KafkaConfig) -> Result<Self, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("acks", config.producer_acks.to_string())
            .set("retries", config.producer_retries.to_string())
            .create()?;

        Ok(Self { producer, config })
    }
}

#[async_trait]
impl EventPublisherTrait for KafkaEventPublisher {
    async fn publish(
        &self,
        payload: &serde_json::Value,
        subject: &str,
        correlation_id: &str,
        key: &str,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(payload)?;
        let occurred_at = Utc::now().to_rfc3339();

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "subject",
                value: Some(subject),
            })
            .insert(Header {
                key: "correlation-id",
                value: Some(correlation_id),
            })
            .insert(Header {
                key: "occurred-at",
                value: Some(&occurred_at),
            });

        self.producer
            .send(
                FutureRecord::to(&self.config.users_topic)
                    .key(key)
                    .payload(&body)
                    .headers(headers),
                Timeout::After(Duration::from_secs(self.config.send_timeout_secs)),
            )
            .await
            .map_err(|(e, _)| PublishError::Producer(e.to_string()))?;

        debug!(subject, correlation_id, key, "event published");
        Ok(())
    }
}
