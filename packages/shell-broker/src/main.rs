use std::sync::Arc;

use anyhow::{Context, Result};
use shell_broker::{connection, BrokerState, Config};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shell_broker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load broker configuration")?;
    let state = Arc::new(BrokerState::new());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind broker to {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "broker listening");

    loop {
        let (socket, peer) = listener.accept().await.context("accept failed")?;
        let state = Arc::clone(&state);
        tracing::debug!(%peer, "accepted connection");
        tokio::spawn(async move {
            connection::handle_connection(socket, peer, state).await;
        });
    }
}
