use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::events::{AccountCreated, AccountDeleted, AccountEvent, UserAuthenticated};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AccountError {
    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
pub enum ProfileKind {
    #[default]
    Common,
    Admin,
}

/// Opaque verifiable credential. Holds an argon2id PHC string; the raw secret
/// is consumed at hashing time and never retained.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Password(String);

impl Password {
    pub fn hash(raw: &str) -> Result<Self, AccountError> {
        if raw.is_empty() {
            return Err(AccountError::Validation(
                "password must not be empty".to_string(),
            ));
        }
        let salt = SaltString::generate(&mut OsRng);
        let hashed = Argon2::default()
            .hash_password(raw.as_bytes(), &salt)
            .map_err(|e| AccountError::Validation("password hashing failed: ".to_string() + &e.to_string()))?;
        Ok(Self(hashed.to_string()))
    }

    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn verify(&self, candidate: &str) -> bool {
        PasswordHash::new(&self.0)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(candidate.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Account aggregate root. Pure value/behavior object: no persistence
/// knowledge, all I/O lives in the infrastructure layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    id: Uuid,
    name: String,
    password: Password,
    email: String,
    profile: ProfileKind,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn create(
        name: &str,
        raw_password: &str,
        email: &str,
        profile: ProfileKind,
    ) -> Result<Self, AccountError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AccountError::Validation(
                "name must not be empty".to_string(),
            ));
        }
        if !validator::validate_email(email) {
            return Err(AccountError::Validation(
                "malformed email: ".to_string() + email,
            ));
        }
        let password = Password::hash(raw_password)?;

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            password,
            email: email.to_string(),
            profile,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        })
    }

    pub fn verify_password(&self, candidate: &str) -> bool {
        self.password.verify(candidate)
    }

    /// The creation event for a freshly constructed aggregate, appended at
    /// expected version 0.
    pub fn created_event(&self) -> AccountEvent {
        AccountEvent::AccountCreated(AccountCreated {
            aggregate_id: self.id,
            name: self.name.clone(),
            password_hash: self.password.as_str().to_string(),
            email: self.email.clone(),
            profile: self.profile,
            active: self.active,
        })
    }

    /// Folds an ordered event history back into aggregate state. Returns
    /// `None` for an empty stream or when the history ends in deletion.
    /// Timestamps are envelope metadata, not event payload, so a replayed
    /// aggregate carries the replay time as its creation time.
    pub fn replay<'a, I>(events: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a AccountEvent>,
    {
        let mut account: Option<Self> = None;
        for event in events {
            match event {
                AccountEvent::AccountCreated(e) => {
                    account = Some(Self {
                        id: e.aggregate_id,
                        name: e.name.clone(),
                        password: Password::from_hash(e.password_hash.clone()),
                        email: e.email.clone(),
                        profile: e.profile,
                        active: e.active,
                        created_at: Utc::now(),
                        updated_at: None,
                    });
                }
                AccountEvent::UserAuthenticated(_) => {
                    if let Some(acc) = account.as_mut() {
                        acc.updated_at = Some(Utc::now());
                    }
                }
                AccountEvent::AccountDeleted(_) => {
                    account = None;
                }
            }
        }
        account
    }

    pub fn authenticated_event(&self, ip: &str, device: &str) -> AccountEvent {
        AccountEvent::UserAuthenticated(UserAuthenticated {
            aggregate_id: self.id,
            name: self.name.clone(),
            ip: ip.to_string(),
            device: device.to_string(),
        })
    }

    pub fn deleted_event(&self) -> AccountEvent {
        AccountEvent::AccountDeleted(AccountDeleted {
            aggregate_id: self.id,
            email: self.email.clone(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password(&self) -> &Password {
        &self.password
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn profile(&self) -> ProfileKind {
        self.profile
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}
