use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use accounts_es::application::AccountService;
use accounts_es::infrastructure::auth::JwtTokenService;
use accounts_es::infrastructure::config::{
    AppConfig, AuthConfig, DatabaseConfig, KafkaConfig, OutboxRelayConfig,
};
use accounts_es::infrastructure::event_publisher::KafkaEventPublisher;
use accounts_es::infrastructure::event_store::PgEventStore;
use accounts_es::infrastructure::logging::{init_logging, LoggingConfig};
use accounts_es::infrastructure::outbox::{OutboxRelay, PgOutboxRepository};
use accounts_es::infrastructure::read_model::PgReadModelStore;
use accounts_es::web::handlers::AppState;
use accounts_es::web::routes::create_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = init_logging(&LoggingConfig::from_env())?;

    info!("starting accounts-es command API");

    let app_config = AppConfig::from_env();
    let database_config = DatabaseConfig::from_env();
    let kafka_config = KafkaConfig::from_env();
    let relay_config = OutboxRelayConfig::from_env();
    let auth_config = AuthConfig::from_env();

    let pool = database_config.connect_pool().await?;

    let event_store = Arc::new(PgEventStore::new(pool.clone()));
    let read_model = Arc::new(PgReadModelStore::new(pool.clone()));
    let tokens = Arc::new(JwtTokenService::new(auth_config));

    let shutdown = CancellationToken::new();

    // The relay owns all bus writes; the request path only appends.
    let publisher = Arc::new(KafkaEventPublisher::new(kafka_config)?);
    let outbox = Arc::new(PgOutboxRepository::new(pool));
    let relay = OutboxRelay::new(outbox, publisher, relay_config, shutdown.clone());
    let relay_handle = tokio::spawn(async move { relay.run().await });

    let service = Arc::new(AccountService::new(event_store, read_model, tokens.clone()));
    let app = create_router(AppState { service, tokens });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    let addr = format!("{}:{}", app_config.host, app_config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    relay_handle.await?;

    info!("accounts-es command API stopped");
    Ok(())
}
