//! Broker configuration loaded from the environment (§1a, §6).

use std::env;

use anyhow::Result;
use dotenvy::dotenv;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
}

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            bind_addr: env::var("BROKER_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}
