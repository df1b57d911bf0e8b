//! End-to-end flow over in-memory collaborators: command handler appends,
//! the outbox carries the published copy, and the projection handler keeps
//! the read model in step — including redelivery.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use accounts_es::application::account_service::{
    AccountService, AuthRequest, CreateAccountRequest, ServiceError,
};
use accounts_es::domain::events::AccountEvent;
use accounts_es::infrastructure::auth::{TokenError, TokenInfo, TokenIssuer};
use accounts_es::infrastructure::consumer::{handle_message, Projected};
use accounts_es::infrastructure::event_store::{EventStoreError, EventStoreTrait};
use accounts_es::infrastructure::read_model::{AccountRecord, ReadModelError, ReadModelStoreTrait};

/// A published copy of an event, as it would travel over the bus.
#[derive(Debug, Clone)]
struct BusMessage {
    subject: String,
    correlation_id: String,
    body: Vec<u8>,
}

/// Event store fake that mirrors the production semantics: optimistic
/// concurrency on append, and the publication enqueued atomically with it.
#[derive(Default)]
struct InMemoryEventStore {
    streams: Mutex<HashMap<Uuid, Vec<(i64, AccountEvent)>>>,
    outbox: Mutex<Vec<BusMessage>>,
}

impl InMemoryEventStore {
    fn drain_outbox(&self) -> Vec<BusMessage> {
        self.outbox.lock().unwrap().drain(..).collect()
    }

    fn versions(&self, aggregate_id: Uuid) -> Vec<i64> {
        self.streams
            .lock()
            .unwrap()
            .get(&aggregate_id)
            .map(|stream| stream.iter().map(|(v, _)| *v).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventStoreTrait for InMemoryEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        event: &AccountEvent,
        expected_version: i64,
        correlation_id: &str,
    ) -> Result<(), EventStoreError> {
        let mut streams = self.streams.lock().unwrap();
        let stream = streams.entry(aggregate_id).or_default();
        let current = stream.last().map(|(v, _)| *v).unwrap_or(0);
        if current != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }
        stream.push((expected_version + 1, event.clone()));
        self.outbox.lock().unwrap().push(BusMessage {
            subject: event.event_type().to_string(),
            correlation_id: correlation_id.to_string(),
            body: serde_json::to_vec(&event.payload().unwrap()).unwrap(),
        });
        Ok(())
    }

    async fn get_events(&self, aggregate_id: Uuid) -> Result<Vec<AccountEvent>, EventStoreError> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .get(&aggregate_id)
            .map(|stream| stream.iter().map(|(_, e)| e.clone()).collect())
            .unwrap_or_default())
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .get(&aggregate_id)
            .and_then(|stream| stream.last().map(|(v, _)| *v))
            .unwrap_or(0))
    }
}

#[derive(Default)]
struct InMemoryReadModel {
    rows: Mutex<HashMap<Uuid, AccountRecord>>,
}

#[async_trait]
impl ReadModelStoreTrait for InMemoryReadModel {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>, ReadModelError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<AccountRecord>, ReadModelError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|r| r.email == email)
            .cloned())
    }

    async fn email_exists(&self, email: &str) -> Result<bool, ReadModelError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .any(|r| r.email == email))
    }

    async fn list(&self) -> Result<Vec<AccountRecord>, ReadModelError> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn insert_if_absent(&self, record: AccountRecord) -> Result<bool, ReadModelError> {
        let mut rows = self.rows.lock().unwrap();
        let duplicate =
            rows.contains_key(&record.id) || rows.values().any(|r| r.email == record.email);
        if duplicate {
            return Ok(false);
        }
        rows.insert(record.id, record);
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, ReadModelError> {
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }

    async fn record_login(&self, id: Uuid) -> Result<(), ReadModelError> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.last_login_at = Some(Utc::now());
        }
        Ok(())
    }
}

struct StaticTokens;

impl TokenIssuer for StaticTokens {
    fn create_token(&self, _account: &AccountRecord) -> Result<TokenInfo, TokenError> {
        Ok(TokenInfo {
            token: "signed-jwt".to_string(),
            expires_at: Utc::now(),
        })
    }
}

struct Pipeline {
    service: AccountService,
    event_store: Arc<InMemoryEventStore>,
    read_model: Arc<InMemoryReadModel>,
}

fn pipeline() -> Pipeline {
    let event_store = Arc::new(InMemoryEventStore::default());
    let read_model = Arc::new(InMemoryReadModel::default());
    let service = AccountService::new(
        event_store.clone(),
        read_model.clone(),
        Arc::new(StaticTokens),
    );
    Pipeline {
        service,
        event_store,
        read_model,
    }
}

/// Delivers every outbox message to the projection handler, simulating the
/// bus leg of the pipeline.
async fn project_outbox(p: &Pipeline) -> Vec<(BusMessage, Projected)> {
    let mut applied = Vec::new();
    for message in p.event_store.drain_outbox() {
        let outcome = handle_message(
            p.read_model.as_ref(),
            &message.subject,
            Some(message.body.as_slice()),
        )
        .await
        .unwrap();
        applied.push((message, outcome));
    }
    applied
}

fn ana_request() -> CreateAccountRequest {
    CreateAccountRequest {
        name: "Ana".to_string(),
        password: "s3cretpass".to_string(),
        email: "ana@x.com".to_string(),
    }
}

#[tokio::test]
async fn create_flows_from_command_to_read_model() {
    let p = pipeline();

    let user = p.service.create_account(ana_request(), "corr-1").await.unwrap();

    assert_eq!(p.event_store.versions(user.id), vec![1]);
    let applied = project_outbox(&p).await;
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0.subject, "UserCreated");
    assert_eq!(applied[0].0.correlation_id, "corr-1");
    assert_eq!(applied[0].1, Projected::Created(true));

    let row = p.read_model.get_by_email("ana@x.com").await.unwrap().unwrap();
    assert_eq!(row.id, user.id);
    assert_eq!(row.name, "Ana");
    assert!(row.active);
}

#[tokio::test]
async fn duplicate_delivery_of_created_keeps_one_row() {
    let p = pipeline();
    p.service.create_account(ana_request(), "corr-1").await.unwrap();

    let messages = p.event_store.drain_outbox();
    for _ in 0..2 {
        // The transport may deliver the same message more than once.
        for message in &messages {
            handle_message(
                p.read_model.as_ref(),
                &message.subject,
                Some(message.body.as_slice()),
            )
            .await
            .unwrap();
        }
    }

    assert_eq!(p.read_model.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn second_create_with_same_email_conflicts_after_projection() {
    let p = pipeline();
    p.service.create_account(ana_request(), "corr-1").await.unwrap();
    project_outbox(&p).await;

    let err = p.service.create_account(ana_request(), "corr-2").await.unwrap_err();
    assert!(matches!(err, ServiceError::EmailAlreadyExists));
}

#[tokio::test]
async fn authenticate_appends_audit_event_after_projection() {
    let p = pipeline();
    let user = p.service.create_account(ana_request(), "corr-1").await.unwrap();
    project_outbox(&p).await;

    let auth = p
        .service
        .authenticate(
            AuthRequest {
                email: "ana@x.com".to_string(),
                password: "s3cretpass".to_string(),
            },
            "10.0.0.1",
            "cli",
            "corr-2",
        )
        .await
        .unwrap();
    assert_eq!(auth.token, "signed-jwt");
    assert_eq!(p.event_store.versions(user.id), vec![1, 2]);

    let applied = project_outbox(&p).await;
    assert_eq!(applied[0].0.subject, "UserLogin");
    let row = p.read_model.get_by_id(user.id).await.unwrap().unwrap();
    assert!(row.last_login_at.is_some());
}

#[tokio::test]
async fn delete_flows_through_and_redelivery_is_a_noop() {
    let p = pipeline();
    let user = p.service.create_account(ana_request(), "corr-1").await.unwrap();
    project_outbox(&p).await;

    p.service.remove_account(user.id, "corr-2").await.unwrap();
    assert_eq!(p.event_store.versions(user.id), vec![1, 2]);

    let messages = p.event_store.drain_outbox();
    assert_eq!(messages[0].subject, "UserDeleted");

    let first = handle_message(
        p.read_model.as_ref(),
        &messages[0].subject,
        Some(messages[0].body.as_slice()),
    )
    .await
    .unwrap();
    assert_eq!(first, Projected::Deleted(true));
    assert!(p.read_model.list().await.unwrap().is_empty());

    let again = handle_message(
        p.read_model.as_ref(),
        &messages[0].subject,
        Some(messages[0].body.as_slice()),
    )
    .await
    .unwrap();
    assert_eq!(again, Projected::Deleted(false));
}

#[tokio::test]
async fn replayed_history_matches_projected_state() {
    let p = pipeline();
    let user = p.service.create_account(ana_request(), "corr-1").await.unwrap();
    project_outbox(&p).await;
    p.service.remove_account(user.id, "corr-2").await.unwrap();

    let history = p.event_store.get_events(user.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(accounts_es::domain::account::Account::replay(history.iter()).is_none());
}
