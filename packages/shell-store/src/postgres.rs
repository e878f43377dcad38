//! `PostgresJobStoreGateway`: the production [`JobStoreGateway`] (§4.5),
//! backed by raw `sqlx` queries rather than an ORM.

use async_trait::async_trait;
use shell_core::{Credential, Job, Server, ServerWithCredential};
use sqlx::PgPool;
use uuid::Uuid;

use crate::gateway::{JobStoreGateway, StoreError};

pub struct PostgresJobStoreGateway {
    pool: PgPool,
}

impl PostgresJobStoreGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and runs pending migrations before serving traffic.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    fn row_to_credential(row: &sqlx::postgres::PgRow) -> Result<Credential, StoreError> {
        use sqlx::Row;
        let auth_type: String = row.try_get("auth_type").map_err(|e| StoreError::Backend(e.into()))?;
        let credential = match auth_type.as_str() {
            "password" => Credential::Password {
                password: row.try_get("password").map_err(|e| StoreError::Backend(e.into()))?,
            },
            "inline_key" => Credential::InlineKey {
                key: row.try_get("private_key").map_err(|e| StoreError::Backend(e.into()))?,
                passphrase: row.try_get("passphrase").map_err(|e| StoreError::Backend(e.into()))?,
            },
            "stored_key" => Credential::StoredKey {
                reference: row.try_get("key_reference").map_err(|e| StoreError::Backend(e.into()))?,
                passphrase: row.try_get("passphrase").map_err(|e| StoreError::Backend(e.into()))?,
            },
            other => {
                return Err(StoreError::Backend(anyhow::anyhow!("unknown auth_type in servers row: {other}")))
            }
        };
        Ok(credential)
    }

    fn credential_columns(credential: &Credential) -> (&'static str, Option<&str>, Option<&str>, Option<&str>, Option<&str>) {
        match credential {
            Credential::Password { password } => ("password", Some(password.as_str()), None, None, None),
            Credential::InlineKey { key, passphrase } => {
                ("inline_key", None, Some(key.as_str()), None, passphrase.as_deref())
            }
            Credential::StoredKey { reference, passphrase } => {
                ("stored_key", None, None, Some(reference.as_str()), passphrase.as_deref())
            }
        }
    }
}

#[async_trait]
impl JobStoreGateway for PostgresJobStoreGateway {
    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT id, server_id, command, args, timeout_secs, priority, status,
                   stdout, stderr, exit_code, started_at, finished_at, pending_cancel,
                   created_at, updated_at
            FROM jobs WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?
        .ok_or(StoreError::JobNotFound(id))
    }

    async fn get_server(&self, id: Uuid) -> Result<ServerWithCredential, StoreError> {
        use sqlx::Row;
        let row = sqlx::query(
            r#"
            SELECT id, name, hostname, port, username, is_active, created_at, updated_at,
                   auth_type, password, private_key, key_reference, passphrase
            FROM servers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?
        .ok_or(StoreError::ServerNotFound(id))?;

        let server = Server::builder()
            .id(row.try_get::<Uuid, _>("id").map_err(|e| StoreError::Backend(e.into()))?)
            .name(row.try_get::<String, _>("name").map_err(|e| StoreError::Backend(e.into()))?)
            .hostname(row.try_get::<String, _>("hostname").map_err(|e| StoreError::Backend(e.into()))?)
            .port(row.try_get::<i32, _>("port").map_err(|e| StoreError::Backend(e.into()))?)
            .username(row.try_get::<String, _>("username").map_err(|e| StoreError::Backend(e.into()))?)
            .is_active(row.try_get::<bool, _>("is_active").map_err(|e| StoreError::Backend(e.into()))?)
            .created_at(row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at").map_err(|e| StoreError::Backend(e.into()))?)
            .updated_at(row.try_get::<chrono::DateTime<chrono::Utc>, _>("updated_at").map_err(|e| StoreError::Backend(e.into()))?)
            .build();
        let credential = Self::row_to_credential(&row)?;

        Ok(ServerWithCredential { server, credential })
    }

    async fn create_job(&self, job: Job) -> Result<Job, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, server_id, command, args, timeout_secs, priority, status,
                               stdout, stderr, exit_code, started_at, finished_at, pending_cancel,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(job.id)
        .bind(job.server_id)
        .bind(&job.command)
        .bind(&job.args)
        .bind(job.timeout_secs)
        .bind(job.priority)
        .bind(job.status)
        .bind(&job.stdout)
        .bind(&job.stderr)
        .bind(job.exit_code)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.pending_cancel)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        Ok(job)
    }

    async fn update_job(&self, job: Job) -> Result<Job, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                command = $2, args = $3, timeout_secs = $4, priority = $5, status = $6,
                stdout = $7, stderr = $8, exit_code = $9, started_at = $10, finished_at = $11,
                pending_cancel = $12, updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(&job.command)
        .bind(&job.args)
        .bind(job.timeout_secs)
        .bind(job.priority)
        .bind(job.status)
        .bind(&job.stdout)
        .bind(&job.stderr)
        .bind(job.exit_code)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.pending_cancel)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job.id));
        }
        Ok(job)
    }

    async fn append_output(&self, id: Uuid, delta: &str, is_stderr: bool) -> Result<(), StoreError> {
        let query = if is_stderr {
            "UPDATE jobs SET stderr = stderr || $2, updated_at = NOW() WHERE id = $1"
        } else {
            "UPDATE jobs SET stdout = stdout || $2, updated_at = NOW() WHERE id = $1"
        };
        let result = sqlx::query(query)
            .bind(id)
            .bind(delta)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    async fn count_active_for_server(&self, server_id: Uuid) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE server_id = $1 AND status IN ('queued', 'running')",
        )
        .bind(server_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(count)
    }

    async fn delete_server(&self, id: Uuid, cascade: bool) -> Result<(), StoreError> {
        let active = self.count_active_for_server(id).await?;
        if active > 0 {
            return Err(StoreError::ServerHasActiveJobs(id));
        }
        if cascade {
            sqlx::query("DELETE FROM jobs WHERE server_id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.into()))?;
        }
        let result = sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ServerNotFound(id));
        }
        Ok(())
    }

    async fn recover_stale_running(&self, worker_epoch: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'failed',
                exit_code = NULL,
                finished_at = NOW(),
                stderr = stderr || $1,
                updated_at = NOW()
            WHERE status = 'running'
            "#,
        )
        .bind("\nworker restarted while job was running; remote state is unrecoverable\n")
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        tracing::info!(recovered = result.rows_affected(), epoch = worker_epoch, "recovery sweep complete");
        Ok(result.rows_affected())
    }

    async fn request_cancel(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = CASE WHEN status = 'queued' THEN 'canceled' ELSE status END,
                finished_at = CASE WHEN status = 'queued' THEN NOW() ELSE finished_at END,
                pending_cancel = CASE WHEN status = 'running' THEN TRUE ELSE pending_cancel END,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT id, server_id, command, args, timeout_secs, priority, status,
                   stdout, stderr, exit_code, started_at, finished_at, pending_cancel,
                   created_at, updated_at
            FROM jobs ORDER BY created_at DESC LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))
    }

    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        sqlx::query_as::<_, Server>(
            r#"
            SELECT id, name, hostname, port, username, is_active, created_at, updated_at
            FROM servers ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))
    }

    async fn create_server(&self, server: ServerWithCredential) -> Result<ServerWithCredential, StoreError> {
        let (auth_type, password, private_key, key_reference, passphrase) =
            Self::credential_columns(&server.credential);

        sqlx::query(
            r#"
            INSERT INTO servers (id, name, hostname, port, username, is_active,
                                  auth_type, password, private_key, key_reference, passphrase,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(server.server.id)
        .bind(&server.server.name)
        .bind(&server.server.hostname)
        .bind(server.server.port)
        .bind(&server.server.username)
        .bind(server.server.is_active)
        .bind(auth_type)
        .bind(password)
        .bind(private_key)
        .bind(key_reference)
        .bind(passphrase)
        .bind(server.server.created_at)
        .bind(server.server.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        Ok(server)
    }
}
