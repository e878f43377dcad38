use std::sync::Arc;

use anyhow::{Context, Result};
use shell_remote_exec::RusshExecutor;
use shell_store::PostgresJobStoreGateway;
use shell_worker::{Config, FilesystemBlobStore, Worker};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shell_worker=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load worker configuration")?;
    tracing::info!(concurrency = config.concurrency, broker = %config.broker_addr, "worker starting");

    let store = PostgresJobStoreGateway::connect(&config.database_url)
        .await
        .context("failed to connect to job store")?;
    let executor = RusshExecutor::new();
    let blob_store = FilesystemBlobStore::new(config.blob_store_dir.clone());

    let worker = Worker::new(
        config.broker_addr,
        Arc::new(store),
        Arc::new(executor),
        Arc::new(blob_store),
        config.concurrency,
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    worker.run(shutdown).await;
    Ok(())
}
