//! The 12-step job execution algorithm (§4.3). Errors never panic the
//! pool: every exit path leaves the job row in a terminal status.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use shell_core::credential::looks_like_inline_key;
use shell_core::{Credential, DispatchError, Job, JobStatus};
use shell_remote_exec::{ExecContext, ExecError, LineCallback, RemoteShellExecutor};
use shell_store::JobStoreGateway;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::output::{OutputChannel, OutputLine, CHANNEL_CAPACITY};
use crate::persist::run_persister;

pub struct JobRunner {
    store: Arc<dyn JobStoreGateway>,
    executor: Arc<dyn RemoteShellExecutor>,
    blob_store: Arc<dyn BlobStore>,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStoreGateway>, executor: Arc<dyn RemoteShellExecutor>, blob_store: Arc<dyn BlobStore>) -> Self {
        Self { store, executor, blob_store }
    }

    /// Returns `true` if the job was actually dispatched (steps 3-12 ran),
    /// `false` if it was already canceled while queued (step 2). The
    /// caller ACKs and releases its semaphore slot either way.
    pub async fn run(&self, job_id: Uuid, cancel: CancellationToken) -> bool {
        let mut job = match self.store.get_job(job_id).await {
            Ok(job) => job,
            Err(err) => {
                warn!(%job_id, error = %err, "could not re-read job before dispatch");
                return false;
            }
        };

        // Step 2: the row was canceled while still queued.
        if job.status == JobStatus::Canceled {
            return false;
        }

        // Step 3: clear any stale output from a prior attempt, then transition.
        job.stdout.clear();
        job.stderr.clear();
        if let Err(err) = job.transition(JobStatus::Running) {
            warn!(%job_id, error = %err, "illegal transition to running");
            return false;
        }
        if let Err(err) = self.store.update_job(job.clone()).await {
            warn!(%job_id, error = %err, "failed to persist running transition");
        }

        // Step 5.
        let server = match self.store.get_server(job.server_id).await {
            Ok(server) if server.server.can_accept_new_jobs() => server,
            Ok(_) => {
                let msg = DispatchError::ServerInactive(job.server_id).to_string();
                self.fail(&mut job, &msg).await;
                return true;
            }
            Err(_) => {
                let msg = DispatchError::ServerMissing(job.server_id).to_string();
                self.fail(&mut job, &msg).await;
                return true;
            }
        };

        // Step 6: resolve a stored-key reference into inline key material.
        // Password and already-inline keys pass through untouched.
        let credential = match self.resolve_credential(server.credential.clone()).await {
            Ok(credential) => credential,
            Err(reason) => {
                self.fail(&mut job, &reason).await;
                return true;
            }
        };
        let ctx = ExecContext::new(
            server.server.hostname.clone(),
            server.server.port as u16,
            server.server.username.clone(),
            credential,
        );

        // Steps 7-10: connect, stream, await exit/cancel/timeout.
        let channel = Arc::new(OutputChannel::new(CHANNEL_CAPACITY));
        let persister = tokio::spawn(run_persister(self.store.clone(), job_id, channel.clone()));

        let callback_channel = channel.clone();
        let callback: LineCallback = Box::new(move |text, is_stderr| {
            callback_channel.push(OutputLine { text, is_stderr });
            std::future::ready(()).boxed()
        });

        let timeout = Duration::from_secs(job.timeout_secs.max(0) as u64);
        let outcome = self.executor.execute_streaming(&ctx, &job.effective_command(), timeout, cancel, callback).await;

        channel.close();
        let _ = persister.await;

        // Re-read so the final write carries the output already persisted
        // incrementally by the persister task instead of overwriting it.
        let mut job = match self.store.get_job(job_id).await {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(%job_id, error = %err, "could not re-read job before terminal transition");
                job
            }
        };

        // Step 11.
        let dispatch_outcome = match outcome {
            Ok(0) => Ok(0),
            Ok(exit_code) => Err(DispatchError::NonZeroExit(exit_code)),
            Err(ExecError::Canceled) => Err(DispatchError::Canceled),
            Err(ExecError::Timeout(d)) => Err(DispatchError::TimedOut(d.as_secs() as i32)),
            Err(err @ (ExecError::Connect { .. } | ExecError::Auth { .. })) => {
                Err(DispatchError::AuthOrConnect(err.to_string()))
            }
            Err(err) => Err(DispatchError::Streaming(err.to_string())),
        };

        match dispatch_outcome {
            Ok(exit_code) => {
                job.exit_code = Some(exit_code);
                let _ = job.transition(JobStatus::Completed);
            }
            Err(DispatchError::Canceled) => {
                let _ = job.transition(JobStatus::Canceled);
            }
            Err(err @ DispatchError::TimedOut(_)) => {
                job.append_output(&format!("{err}\n"), true);
                let _ = job.transition(JobStatus::Canceled);
            }
            Err(err) => {
                if err.has_observed_exit() {
                    job.exit_code = Some(match err {
                        DispatchError::NonZeroExit(code) => code,
                        _ => unreachable!(),
                    });
                }
                job.append_output(&format!("{err}\n"), true);
                let _ = job.transition(JobStatus::Failed);
            }
        }

        // Step 12.
        if let Err(err) = self.store.update_job(job).await {
            warn!(%job_id, error = %err, "failed to persist terminal transition; leaving for recovery sweep");
        }
        info!(%job_id, "job finished");
        true
    }

    async fn fail(&self, job: &mut Job, reason: &str) {
        job.append_output(&format!("{reason}\n"), true);
        let _ = job.transition(JobStatus::Failed);
        if let Err(err) = self.store.update_job(job.clone()).await {
            warn!(job_id = %job.id, error = %err, "failed to persist dispatch failure");
        }
    }

    /// Fetches and parses a stored-key reference into inline key material
    /// (§4.3 step 6). Password and already-inline credentials pass through.
    async fn resolve_credential(&self, credential: Credential) -> Result<Credential, String> {
        let Credential::StoredKey { reference, passphrase } = credential else {
            return Ok(credential);
        };
        let bytes = self
            .blob_store
            .fetch(&reference)
            .await
            .map_err(|err| format!("could not fetch stored key {reference}: {err}"))?;
        let key = String::from_utf8(bytes).map_err(|_| format!("stored key {reference} is not valid UTF-8 PEM text"))?;
        if !looks_like_inline_key(&key) {
            return Err(format!("blob at {reference} does not look like PEM key material"));
        }
        Ok(Credential::InlineKey { key, passphrase })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shell_core::{Credential, Server, ServerWithCredential};
    use shell_remote_exec::{FakeExecutor, ScriptedOutcome};
    use shell_store::InMemoryJobStoreGateway;

    fn sample_server() -> ServerWithCredential {
        ServerWithCredential {
            server: Server::new("h", "h.example.com", "u"),
            credential: Credential::Password { password: "p".into() },
        }
    }

    fn blob_store() -> Arc<dyn BlobStore> {
        Arc::new(crate::blob::FilesystemBlobStore::new("."))
    }

    async fn setup() -> (Arc<InMemoryJobStoreGateway>, Arc<FakeExecutor>, Uuid) {
        let store = Arc::new(InMemoryJobStoreGateway::new());
        let executor = Arc::new(FakeExecutor::new());
        let server = sample_server();
        let server_id = server.server.id;
        store.seed_server(server);
        (store, executor, server_id)
    }

    #[tokio::test]
    async fn happy_path_completes_with_captured_output() {
        let (store, executor, server_id) = setup().await;
        executor.script_default(ScriptedOutcome::Success {
            stdout: vec!["hi\n".to_string()],
            stderr: vec![],
            exit_code: 0,
        });

        let job = Job::new(server_id, "echo", 5);
        let job_id = job.id;
        store.create_job(job).await.unwrap();

        let runner = JobRunner::new(store.clone(), executor, blob_store());
        assert!(runner.run(job_id, CancellationToken::new()).await);

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.exit_code, Some(0));
        assert_eq!(job.stdout, "hi\n");
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_exit_code() {
        let (store, executor, server_id) = setup().await;
        executor.script_default(ScriptedOutcome::Success { stdout: vec![], stderr: vec![], exit_code: 7 });

        let job = Job::new(server_id, "sh", 5);
        let job_id = job.id;
        store.create_job(job).await.unwrap();

        let runner = JobRunner::new(store.clone(), executor, blob_store());
        runner.run(job_id, CancellationToken::new()).await;

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.exit_code, Some(7));
    }

    #[tokio::test]
    async fn already_canceled_job_is_not_dispatched() {
        let (store, executor, server_id) = setup().await;
        let mut job = Job::new(server_id, "echo", 5);
        job.transition(JobStatus::Canceled).unwrap();
        let job_id = job.id;
        store.create_job(job).await.unwrap();

        let runner = JobRunner::new(store.clone(), executor, blob_store());
        assert!(!runner.run(job_id, CancellationToken::new()).await);

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
    }

    #[tokio::test]
    async fn missing_server_fails_the_job() {
        let store = Arc::new(InMemoryJobStoreGateway::new());
        let executor = Arc::new(FakeExecutor::new());
        let job = Job::new(Uuid::new_v4(), "echo", 5);
        let job_id = job.id;
        store.create_job(job).await.unwrap();

        let runner = JobRunner::new(store.clone(), executor, blob_store());
        runner.run(job_id, CancellationToken::new()).await;

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.stderr.contains("is missing"));
    }

    #[tokio::test]
    async fn inactive_server_fails_the_job() {
        let (store, executor, _) = setup().await;
        let mut server = sample_server();
        server.server.is_active = false;
        let server_id = server.server.id;
        store.seed_server(server);

        let job = Job::new(server_id, "echo", 5);
        let job_id = job.id;
        store.create_job(job).await.unwrap();

        let runner = JobRunner::new(store.clone(), executor, blob_store());
        runner.run(job_id, CancellationToken::new()).await;

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.stderr.contains("disabled"));
    }

    #[tokio::test]
    async fn cancellation_transitions_to_canceled_without_exit_code() {
        let (store, executor, server_id) = setup().await;
        executor.script_default(ScriptedOutcome::HangUntilCanceled);

        let job = Job::new(server_id, "sleep", 5);
        let job_id = job.id;
        store.create_job(job).await.unwrap();

        let cancel = CancellationToken::new();
        let runner = JobRunner::new(store.clone(), executor, blob_store());
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { runner.run(job_id, cancel_clone).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.exit_code.is_none());
    }

    #[tokio::test]
    async fn timeout_transitions_to_canceled_with_diagnostic() {
        let (store, executor, server_id) = setup().await;
        executor.script_default(ScriptedOutcome::HangUntilTimeout);

        let mut job = Job::new(server_id, "sleep", 5);
        job.timeout_secs = 0;
        let job_id = job.id;
        store.create_job(job).await.unwrap();

        let runner = JobRunner::new(store.clone(), executor, blob_store());
        runner.run(job_id, CancellationToken::new()).await;

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn auth_failure_fails_the_job() {
        let (store, executor, server_id) = setup().await;
        executor.script_default(ScriptedOutcome::AuthFailure);

        let job = Job::new(server_id, "echo", 5);
        let job_id = job.id;
        store.create_job(job).await.unwrap();

        let runner = JobRunner::new(store.clone(), executor, blob_store());
        runner.run(job_id, CancellationToken::new()).await;

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }
}
