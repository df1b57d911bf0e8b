use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReadModelError {
    #[error("Read model unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// Denormalized projection of an account, materialized by the projection
/// worker. The command side only reads this table; every write flows through
/// observed events.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRecord {
    pub id: Uuid,
    pub name: String,
    pub password_hash: String,
    pub email: String,
    pub profile: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadModelStoreTrait: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>, ReadModelError>;
    async fn get_by_email(&self, email: &str) -> Result<Option<AccountRecord>, ReadModelError>;
    async fn email_exists(&self, email: &str) -> Result<bool, ReadModelError>;
    async fn list(&self) -> Result<Vec<AccountRecord>, ReadModelError>;

    /// Inserts the record unless one with the same id or email already
    /// exists; returns whether a row was written. Redelivered creation
    /// events land here as no-ops.
    async fn insert_if_absent(&self, record: AccountRecord) -> Result<bool, ReadModelError>;

    /// Removes the record; absent ids are a no-op. Returns whether a row
    /// was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, ReadModelError>;

    /// Stamps the last observed login; unknown ids are a no-op.
    async fn record_login(&self, id: Uuid) -> Result<(), ReadModelError>;
}

#[derive(Clone)]
pub struct PgReadModelStore {
    pool: PgPool,
}

impl PgReadModelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RECORD_COLUMNS: &str =
    "id, name, password_hash, email, profile, active, created_at, updated_at, last_login_at";

#[async_trait]
impl ReadModelStoreTrait for PgReadModelStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>, ReadModelError> {
        let record = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM account_read_model WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<AccountRecord>, ReadModelError> {
        let record = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM account_read_model WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, ReadModelError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM account_read_model WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn list(&self) -> Result<Vec<AccountRecord>, ReadModelError> {
        let records = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM account_read_model ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn insert_if_absent(&self, record: AccountRecord) -> Result<bool, ReadModelError> {
        let result = sqlx::query(
            "INSERT INTO account_read_model \
                 (id, name, password_hash, email, profile, active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW()) \
             ON CONFLICT DO NOTHING",
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(&record.password_hash)
        .bind(&record.email)
        .bind(&record.profile)
        .bind(record.active)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, ReadModelError> {
        let result = sqlx::query("DELETE FROM account_read_model WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_login(&self, id: Uuid) -> Result<(), ReadModelError> {
        sqlx::query(
            "UPDATE account_read_model SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl AccountRecord {
    /// Builder used by the projection handler for `UserCreated` payloads.
    /// Timestamps are overwritten by the database on insert.
    pub fn from_created(
        id: Uuid,
        name: String,
        password_hash: String,
        email: String,
        profile: String,
        active: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            password_hash,
            email,
            profile,
            active,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }
}
