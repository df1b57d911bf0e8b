pub mod auth;
pub mod config;
pub mod consumer;
pub mod event_publisher;
pub mod event_store;
pub mod logging;
pub mod outbox;
pub mod read_model;

pub use auth::{JwtTokenService, TokenIssuer};
pub use config::{AppConfig, AuthConfig, DatabaseConfig, KafkaConfig, OutboxRelayConfig};
pub use consumer::{ProjectionWorker, WorkerState};
pub use event_publisher::{EventPublisherTrait, KafkaEventPublisher, PublishError};
pub use event_store::{EventStoreError, EventStoreTrait, PgEventStore, StoredEvent};
pub use outbox::{OutboxRelay, OutboxRepositoryTrait, PgOutboxRepository};
pub use read_model::{AccountRecord, PgReadModelStore, ReadModelError, ReadModelStoreTrait};
