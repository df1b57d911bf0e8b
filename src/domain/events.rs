use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::account::ProfileKind;

/// Payload of the `UserCreated` message. Carries everything the projection
/// needs to materialize a read-model row; the credential travels only in its
/// hashed form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountCreated {
    pub aggregate_id: Uuid,
    pub name: String,
    pub password_hash: String,
    pub email: String,
    pub profile: ProfileKind,
    pub active: bool,
}

/// Audit record of a successful login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAuthenticated {
    pub aggregate_id: Uuid,
    pub name: String,
    pub ip: String,
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountDeleted {
    pub aggregate_id: Uuid,
    pub email: String,
}

/// Closed set of domain events for the account aggregate. The event store and
/// the projection worker both match on this exhaustively, so adding a variant
/// forces every dispatch site to handle it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AccountEvent {
    AccountCreated(AccountCreated),
    UserAuthenticated(UserAuthenticated),
    AccountDeleted(AccountDeleted),
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("unknown event type '{0}'")]
    UnknownType(String),
    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl AccountEvent {
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            AccountEvent::AccountCreated(e) => e.aggregate_id,
            AccountEvent::UserAuthenticated(e) => e.aggregate_id,
            AccountEvent::AccountDeleted(e) => e.aggregate_id,
        }
    }

    /// Stable type tag. Stored in the event envelope and used as the bus
    /// subject, so it must never change for already-persisted events.
    pub fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountCreated(_) => "UserCreated",
            AccountEvent::UserAuthenticated(_) => "UserLogin",
            AccountEvent::AccountDeleted(_) => "UserDeleted",
        }
    }

    /// Serializes the variant payload only; the type tag travels separately
    /// in the envelope (or as the message subject).
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            AccountEvent::AccountCreated(e) => serde_json::to_value(e),
            AccountEvent::UserAuthenticated(e) => serde_json::to_value(e),
            AccountEvent::AccountDeleted(e) => serde_json::to_value(e),
        }
    }

    /// Rebuilds a domain event from a stored (or received) type tag and
    /// payload.
    pub fn from_parts(
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<Self, EventDecodeError> {
        match event_type {
            "UserCreated" => Ok(AccountEvent::AccountCreated(serde_json::from_value(
                payload.clone(),
            )?)),
            "UserLogin" => Ok(AccountEvent::UserAuthenticated(serde_json::from_value(
                payload.clone(),
            )?)),
            "UserDeleted" => Ok(AccountEvent::AccountDeleted(serde_json::from_value(
                payload.clone(),
            )?)),
            other => Err(EventDecodeError::UnknownType(other.to_string())),
        }
    }
}
