use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::domain::account::{Account, AccountError, Password, ProfileKind};
use crate::domain::events::{AccountDeleted, AccountEvent, UserAuthenticated};
use crate::infrastructure::auth::{TokenError, TokenIssuer};
use crate::infrastructure::event_store::{EventStoreError, EventStoreTrait};
use crate::infrastructure::read_model::{AccountRecord, ReadModelError, ReadModelStoreTrait};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub name: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[validate(email(message = "malformed email"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AuthRequest {
    #[validate(email(message = "malformed email"))]
    pub email: String,
    #[validate(length(min = 1, message = "password must not be empty"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub profile: String,
    pub active: bool,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id(),
            name: account.name().to_string(),
            email: account.email().to_string(),
            profile: account.profile().to_string(),
            active: account.active(),
        }
    }
}

impl From<&AccountRecord> for AccountResponse {
    fn from(record: &AccountRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            email: record.email.clone(),
            profile: record.profile.clone(),
            active: record.active,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("An account with this email is already registered")]
    EmailAlreadyExists,
    #[error("Account not found")]
    NotFound,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account is inactive")]
    InactiveAccount,
    #[error(
        "Concurrent modification of aggregate {aggregate_id}: \
         expected version {expected}, found {actual}"
    )]
    Conflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },
    #[error("Event store error: {0}")]
    Store(EventStoreError),
    #[error("Read model error: {0}")]
    ReadModel(#[from] ReadModelError),
    #[error("Token issuance failed: {0}")]
    Token(#[from] TokenError),
}

impl From<EventStoreError> for ServiceError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => ServiceError::Conflict {
                aggregate_id,
                expected,
                actual,
            },
            other => ServiceError::Store(other),
        }
    }
}

impl From<AccountError> for ServiceError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Validation(msg) => ServiceError::Validation(msg),
        }
    }
}

/// Command handler for the account aggregate. Writes go to the event store
/// (which enqueues publication atomically); reads come from the eventually
/// consistent read model.
pub struct AccountService {
    event_store: Arc<dyn EventStoreTrait>,
    read_model: Arc<dyn ReadModelStoreTrait>,
    tokens: Arc<dyn TokenIssuer>,
}

impl AccountService {
    pub fn new(
        event_store: Arc<dyn EventStoreTrait>,
        read_model: Arc<dyn ReadModelStoreTrait>,
        tokens: Arc<dyn TokenIssuer>,
    ) -> Self {
        Self {
            event_store,
            read_model,
            tokens,
        }
    }

    pub async fn create_account(
        &self,
        request: CreateAccountRequest,
        correlation_id: &str,
    ) -> Result<AccountResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        // Best-effort pre-check against the eventually consistent read model;
        // the projection's unique email constraint absorbs the race window.
        if self.read_model.email_exists(&request.email).await? {
            return Err(ServiceError::EmailAlreadyExists);
        }

        let account = Account::create(
            &request.name,
            &request.password,
            &request.email,
            ProfileKind::Common,
        )?;

        self.event_store
            .append(account.id(), &account.created_event(), 0, correlation_id)
            .await?;

        info!(account_id = %account.id(), correlation_id, "account created");
        Ok(AccountResponse::from(&account))
    }

    pub async fn authenticate(
        &self,
        request: AuthRequest,
        ip: &str,
        device: &str,
        correlation_id: &str,
    ) -> Result<AuthResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let record = self
            .read_model
            .get_by_email(&request.email)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        if !Password::from_hash(record.password_hash.clone()).verify(&request.password) {
            return Err(ServiceError::InvalidCredentials);
        }

        if !record.active {
            return Err(ServiceError::InactiveAccount);
        }

        let token = self.tokens.create_token(&record)?;

        let event = AccountEvent::UserAuthenticated(UserAuthenticated {
            aggregate_id: record.id,
            name: record.name.clone(),
            ip: ip.to_string(),
            device: device.to_string(),
        });

        // Version is read immediately before the append, never from a cached
        // copy, so the optimistic check stays meaningful.
        let version = self.event_store.current_version(record.id).await?;
        self.event_store
            .append(record.id, &event, version, correlation_id)
            .await?;

        info!(account_id = %record.id, correlation_id, "user authenticated");
        Ok(AuthResponse {
            token: token.token,
            expires_at: token.expires_at,
        })
    }

    pub async fn remove_account(
        &self,
        id: Uuid,
        correlation_id: &str,
    ) -> Result<(), ServiceError> {
        let record = self
            .read_model
            .get_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        let event = AccountEvent::AccountDeleted(AccountDeleted {
            aggregate_id: record.id,
            email: record.email.clone(),
        });

        let version = self.event_store.current_version(record.id).await?;
        self.event_store
            .append(record.id, &event, version, correlation_id)
            .await?;

        info!(account_id = %record.id, correlation_id, "account deletion recorded");
        Ok(())
    }

    pub async fn get_account(&self, id: Uuid) -> Result<AccountResponse, ServiceError> {
        let record = self
            .read_model
            .get_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        Ok(AccountResponse::from(&record))
    }

    pub async fn list_accounts(&self) -> Result<Vec<AccountResponse>, ServiceError> {
        let records = self.read_model.list().await?;
        Ok(records.iter().map(AccountResponse::from).collect())
    }
}
