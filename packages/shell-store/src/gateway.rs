//! The narrow interface the worker depends on (§4.5). Kept as a trait so
//! the worker's own tests run against [`crate::memory::InMemoryJobStoreGateway`]
//! instead of a live Postgres.

use async_trait::async_trait;
use shell_core::{Job, ServerWithCredential};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    #[error("server {0} not found")]
    ServerNotFound(Uuid),
    #[error("server {0} has active jobs and cannot be deleted")]
    ServerHasActiveJobs(Uuid),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait JobStoreGateway: Send + Sync {
    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError>;
    async fn get_server(&self, id: Uuid) -> Result<ServerWithCredential, StoreError>;
    async fn create_job(&self, job: Job) -> Result<Job, StoreError>;
    async fn update_job(&self, job: Job) -> Result<Job, StoreError>;
    async fn append_output(&self, id: Uuid, delta: &str, is_stderr: bool) -> Result<(), StoreError>;

    /// Lists jobs most-recent-first, for the CLI's `list-jobs` surface (§6).
    async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>, StoreError>;

    /// Lists registered servers, for the CLI's `list-servers` surface (§6).
    async fn list_servers(&self) -> Result<Vec<shell_core::Server>, StoreError>;

    async fn create_server(&self, server: ServerWithCredential) -> Result<ServerWithCredential, StoreError>;

    /// Counts rows with status in `{queued, running}`; gates server deletion (§4.5).
    async fn count_active_for_server(&self, server_id: Uuid) -> Result<i64, StoreError>;

    /// Deletes a server. `cascade` controls whether its job history is
    /// deleted too; without it, deletion fails if any job references the
    /// server at all (not just active ones).
    async fn delete_server(&self, id: Uuid, cascade: bool) -> Result<(), StoreError>;

    /// Force-transitions every row still `running` to `failed` on worker
    /// startup (§4.3 recovery sweep). `worker_epoch` is carried through for
    /// observability only; this implementation does not partition by it.
    async fn recover_stale_running(&self, worker_epoch: &str) -> Result<u64, StoreError>;

    /// Requests cancellation (§4.6). A `queued` job has no running
    /// supervisor to poll a flag, so it transitions straight to
    /// `canceled`, bounded only by how soon the worker next re-reads the
    /// row before dispatch (§4.3 step 2). A `running` job instead gets
    /// `pending_cancel` set, which its supervisor polls within 2 s.
    /// Terminal jobs are a no-op.
    async fn request_cancel(&self, id: Uuid) -> Result<(), StoreError>;
}
