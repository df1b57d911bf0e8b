use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use accounts_es::infrastructure::config::{DatabaseConfig, KafkaConfig};
use accounts_es::infrastructure::consumer::ProjectionWorker;
use accounts_es::infrastructure::logging::{init_logging, LoggingConfig};
use accounts_es::infrastructure::read_model::PgReadModelStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = init_logging(&LoggingConfig::from_env())?;

    info!("starting accounts-es projection worker");

    let pool = DatabaseConfig::from_env().connect_pool().await?;
    let read_model = Arc::new(PgReadModelStore::new(pool));

    let shutdown = CancellationToken::new();
    let worker = ProjectionWorker::new(KafkaConfig::from_env(), read_model, shutdown.clone())?;

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    worker.run().await?;

    info!("accounts-es projection worker stopped");
    Ok(())
}
