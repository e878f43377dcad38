//! Top-level worker orchestration (§4.3): a semaphore-gated consumer loop
//! over the broker, dispatching each popped envelope to a [`JobRunner`].
//!
//! This deliberately does not reuse `shell_broker_client::start_consumer`:
//! that helper's own doc comment warns callers needing external
//! backpressure (gating POP on a concurrency semaphore) to drive
//! POP/ACK themselves, which is exactly what this loop does.

use std::sync::Arc;
use std::time::Duration;

use shell_broker_client::BrokerClient;
use shell_remote_exec::RemoteShellExecutor;
use shell_store::JobStoreGateway;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::cancellation::CancellationBus;
use crate::runner::JobRunner;

const EMPTY_POP_BACKOFF: Duration = Duration::from_secs(1);
const BROKER_ERROR_BACKOFF: Duration = Duration::from_secs(2);
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Worker {
    broker: Arc<BrokerClient>,
    store: Arc<dyn JobStoreGateway>,
    executor: Arc<dyn RemoteShellExecutor>,
    blob_store: Arc<dyn BlobStore>,
    bus: Arc<CancellationBus>,
    semaphore: Arc<Semaphore>,
}

impl Worker {
    pub fn new(
        broker_addr: impl Into<String>,
        store: Arc<dyn JobStoreGateway>,
        executor: Arc<dyn RemoteShellExecutor>,
        blob_store: Arc<dyn BlobStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            broker: Arc::new(BrokerClient::new(broker_addr)),
            store,
            executor,
            blob_store,
            bus: Arc::new(CancellationBus::new()),
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let epoch = format!("worker-{}", Uuid::new_v4());
        match self.store.recover_stale_running(&epoch).await {
            Ok(recovered) if recovered > 0 => info!(recovered, epoch, "recovery sweep force-failed stale running jobs"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "recovery sweep failed; continuing anyway"),
        }

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // Step 1: back-pressure — do not POP again until a slot frees.
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => {
                    permit.expect("semaphore is never closed while the worker runs")
                }
            };

            let popped = tokio::select! {
                _ = shutdown.cancelled() => { drop(permit); break; }
                result = self.broker.pop() => result,
            };

            match popped {
                Ok(Some(envelope)) => {
                    let Ok(job_id) = Uuid::parse_str(&envelope.id) else {
                        warn!(id = %envelope.id, "popped envelope id is not a job uuid; acking and dropping");
                        let _ = self.broker.ack(envelope.id).await;
                        drop(permit);
                        continue;
                    };

                    let store = self.store.clone();
                    let executor = self.executor.clone();
                    let blob_store = self.blob_store.clone();
                    let broker = self.broker.clone();
                    let bus = self.bus.clone();

                    tokio::spawn(async move {
                        let token = CancellationToken::new();
                        bus.register(job_id, token.clone()).await;
                        let poller = CancellationBus::spawn_poller(store.clone(), job_id, token.clone());

                        let runner = JobRunner::new(store, executor, blob_store);
                        runner.run(job_id, token.clone()).await;

                        token.cancel();
                        let _ = poller.await;
                        bus.deregister(job_id).await;

                        if let Err(err) = broker.ack(envelope.id).await {
                            warn!(%job_id, error = %err, "failed to ack job after completion");
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(EMPTY_POP_BACKOFF) => {}
                    }
                }
                Err(err) => {
                    drop(permit);
                    warn!(error = %err, "broker pop failed; backing off");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(BROKER_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        self.drain().await;
    }

    async fn drain(&self) {
        let running = self.bus.running_count().await;
        if running == 0 {
            return;
        }
        info!(running, "shutting down; canceling in-flight jobs");
        self.bus.cancel_all().await;

        let start = tokio::time::Instant::now();
        while self.bus.running_count().await > 0 && start.elapsed() < SHUTDOWN_DRAIN_TIMEOUT {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
