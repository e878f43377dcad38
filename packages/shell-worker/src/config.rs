//! Worker configuration (§4.3, §6): `Config::from_env()` with `dotenvy`
//! fallback for local development.

use anyhow::{Context, Result};

fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    (4 * cpus).min(16)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub broker_addr: String,
    pub database_url: String,
    pub concurrency: usize,
    /// Root directory `FilesystemBlobStore` resolves stored-key references
    /// against; the real blob store's own credentials are provider-defined
    /// and out of scope here (§6: "`BLOB_STORE_*`, read but not interpreted
    /// by the core").
    pub blob_store_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let broker_addr = std::env::var("BROKER_ADDR").unwrap_or_else(|_| "0.0.0.0:9000".to_string());
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set for the worker's job store")?;
        let concurrency = match std::env::var("WORKER_CONCURRENCY") {
            Ok(raw) => raw.parse().context("WORKER_CONCURRENCY must be a positive integer")?,
            Err(_) => default_concurrency(),
        };
        let blob_store_dir = std::env::var("BLOB_STORE_DIR").unwrap_or_else(|_| ".".to_string());

        Ok(Self { broker_addr, database_url, concurrency, blob_store_dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_concurrency_is_capped_at_sixteen() {
        assert!(default_concurrency() <= 16);
        assert!(default_concurrency() >= 4);
    }
}
