//! In-process half of the Lifecycle & Cancellation Bus (§4.6): a map from
//! job id to cancellation handle, registered at dispatch and deregistered
//! at terminal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shell_store::JobStoreGateway;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How often a per-job supervisor polls the store's `pending_cancel` flag.
/// Bounded well inside the 2 s contract in §4.6.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Default)]
pub struct CancellationBus {
    running: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl CancellationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, job_id: Uuid, token: CancellationToken) {
        self.running.write().await.insert(job_id, token);
    }

    pub async fn deregister(&self, job_id: Uuid) {
        self.running.write().await.remove(&job_id);
    }

    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    pub async fn cancel_all(&self) {
        for token in self.running.read().await.values() {
            token.cancel();
        }
    }

    /// Spawns the per-job supervisor task described in §4.6: poll
    /// `pending_cancel` until it's set or the job's own token fires for
    /// another reason (terminal completion deregisters first).
    ///
    /// Only covers jobs already dispatched to this worker — a job still
    /// `queued` has no running supervisor to observe the flag, so
    /// `JobStoreGateway::request_cancel` transitions those straight to
    /// `canceled` itself instead of relying on this poller.
    pub fn spawn_poller(
        store: Arc<dyn JobStoreGateway>,
        job_id: Uuid,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    return;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(CANCEL_POLL_INTERVAL) => {}
                }
                match store.get_job(job_id).await {
                    Ok(job) if job.pending_cancel => {
                        token.cancel();
                        return;
                    }
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_deregister_empties_the_map() {
        let bus = CancellationBus::new();
        let id = Uuid::new_v4();
        bus.register(id, CancellationToken::new()).await;
        assert_eq!(bus.running_count().await, 1);
        bus.deregister(id).await;
        assert_eq!(bus.running_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_all_fires_every_registered_token() {
        let bus = CancellationBus::new();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        bus.register(Uuid::new_v4(), a.clone()).await;
        bus.register(Uuid::new_v4(), b.clone()).await;
        bus.cancel_all().await;
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }
}
