//! `InMemoryJobStoreGateway`: a `HashMap`-backed [`JobStoreGateway`] used by
//! the worker's own test suite so its invariants can be exercised without a
//! live Postgres (§8 test tooling).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use shell_core::{Job, JobStatus, Server, ServerWithCredential};
use uuid::Uuid;

use crate::gateway::{JobStoreGateway, StoreError};

#[derive(Default)]
pub struct InMemoryJobStoreGateway {
    jobs: Mutex<HashMap<Uuid, Job>>,
    servers: Mutex<HashMap<Uuid, ServerWithCredential>>,
}

impl InMemoryJobStoreGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_server(&self, server: ServerWithCredential) {
        self.servers.lock().unwrap().insert(server.server.id, server);
    }
}

#[async_trait]
impl JobStoreGateway for InMemoryJobStoreGateway {
    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        self.jobs.lock().unwrap().get(&id).cloned().ok_or(StoreError::JobNotFound(id))
    }

    async fn get_server(&self, id: Uuid) -> Result<ServerWithCredential, StoreError> {
        self.servers.lock().unwrap().get(&id).cloned().ok_or(StoreError::ServerNotFound(id))
    }

    async fn create_job(&self, job: Job) -> Result<Job, StoreError> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn update_job(&self, job: Job) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if !jobs.contains_key(&job.id) {
            return Err(StoreError::JobNotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn append_output(&self, id: Uuid, delta: &str, is_stderr: bool) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        job.append_output(delta, is_stderr);
        Ok(())
    }

    async fn count_active_for_server(&self, server_id: Uuid) -> Result<i64, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let count = jobs
            .values()
            .filter(|j| j.server_id == server_id && matches!(j.status, JobStatus::Queued | JobStatus::Running))
            .count();
        Ok(count as i64)
    }

    async fn delete_server(&self, id: Uuid, cascade: bool) -> Result<(), StoreError> {
        let active = self.count_active_for_server(id).await?;
        if active > 0 {
            return Err(StoreError::ServerHasActiveJobs(id));
        }
        if cascade {
            self.jobs.lock().unwrap().retain(|_, j| j.server_id != id);
        }
        self.servers
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::ServerNotFound(id))
    }

    async fn recover_stale_running(&self, _worker_epoch: &str) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut recovered = 0;
        for job in jobs.values_mut() {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Failed;
                job.exit_code = None;
                job.finished_at = Some(Utc::now());
                job.stderr.push_str("\nworker restarted while job was running; remote state is unrecoverable\n");
                job.updated_at = Utc::now();
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn request_cancel(&self, id: Uuid) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            match job.status {
                JobStatus::Queued => {
                    let _ = job.transition(JobStatus::Canceled);
                }
                JobStatus::Running => {
                    job.pending_cancel = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        let mut servers: Vec<Server> = self.servers.lock().unwrap().values().map(|s| s.server.clone()).collect();
        servers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(servers)
    }

    async fn create_server(&self, server: ServerWithCredential) -> Result<ServerWithCredential, StoreError> {
        self.servers.lock().unwrap().insert(server.server.id, server.clone());
        Ok(server)
    }
}
