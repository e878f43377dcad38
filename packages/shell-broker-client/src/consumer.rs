//! Generic `StartConsumer` loop (§4.2): POP → handle → ACK, with a fixed
//! backoff on an empty queue and capped exponential backoff on I/O errors.
//!
//! Callers that need to gate POP on external backpressure (the worker
//! runtime gates on a concurrency semaphore, §4.3 step 1) should not use
//! this helper — it always pops as fast as the handler drains — and should
//! instead call [`BrokerClient::pop`]/[`BrokerClient::ack`] directly from
//! their own loop, as `shell-worker` does.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::BrokerClient;
use shell_broker_proto::PopResult;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How long to wait after an empty POP before retrying (§4.2: "1 s").
    pub empty_backoff: Duration,
    pub min_reconnect_backoff: Duration,
    pub max_reconnect_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            empty_backoff: Duration::from_secs(1),
            min_reconnect_backoff: Duration::from_millis(200),
            max_reconnect_backoff: Duration::from_secs(30),
        }
    }
}

/// Run the POP → handle → ACK loop until `cancel` fires. The in-flight
/// handler always runs to completion before the next cancellation check,
/// per §4.2: "draining the current in-flight handler first".
pub async fn start_consumer<F, Fut>(
    client: &BrokerClient,
    cancel: CancellationToken,
    config: ConsumerConfig,
    mut handler: F,
) where
    F: FnMut(PopResult) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut reconnect_backoff = config.min_reconnect_backoff;

    while !cancel.is_cancelled() {
        match client.pop().await {
            Ok(Some(popped)) => {
                reconnect_backoff = config.min_reconnect_backoff;
                let id = popped.id.clone();
                handler(popped).await;
                if let Err(err) = client.ack(&id).await {
                    warn!(%id, error = %err, "ack failed after handler completed");
                }
            }
            Ok(None) => {
                wait_or_cancel(config.empty_backoff, &cancel).await;
            }
            Err(err) => {
                warn!(error = %err, backoff_ms = reconnect_backoff.as_millis() as u64, "broker i/o error; backing off");
                wait_or_cancel(reconnect_backoff, &cancel).await;
                reconnect_backoff = (reconnect_backoff * 2).min(config.max_reconnect_backoff);
            }
        }
    }
}

async fn wait_or_cancel(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = sleep(duration) => {},
        _ = cancel.cancelled() => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shell_broker::{connection, BrokerState};
    use shell_broker_proto::Envelope;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn spawn_test_broker() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(BrokerState::new());
        tokio::spawn(async move {
            loop {
                let (socket, peer) = listener.accept().await.unwrap();
                let state = Arc::clone(&state);
                tokio::spawn(connection::handle_connection(socket, peer, state));
            }
        });
        addr
    }

    #[tokio::test]
    async fn consumer_handles_each_pushed_envelope_exactly_once() {
        let addr = spawn_test_broker().await;
        let client = BrokerClient::new(addr);
        client.push(Envelope { id: "a".into(), priority: 1, payload: json!(null) }).await.unwrap();
        client.push(Envelope { id: "b".into(), priority: 1, payload: json!(null) }).await.unwrap();

        let handled = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let handled_clone = Arc::clone(&handled);

        let task = tokio::spawn(async move {
            start_consumer(&client, cancel_clone, ConsumerConfig::default(), |_popped| {
                let handled = Arc::clone(&handled_clone);
                async move {
                    handled.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 2);
    }
}
