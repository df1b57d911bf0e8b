pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod web;

// Re-export commonly used types
pub use application::{AccountService, ServiceError};
pub use domain::{Account, AccountError, AccountEvent};
pub use infrastructure::{
    EventStoreError, EventStoreTrait, PgEventStore, PgReadModelStore, ProjectionWorker,
    ReadModelStoreTrait,
};
