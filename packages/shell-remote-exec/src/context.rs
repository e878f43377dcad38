//! Everything needed to open one remote-shell session (§4.4).

use shell_core::Credential;

#[derive(Debug, Clone)]
pub struct ExecContext {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

impl ExecContext {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, credential: Credential) -> Self {
        Self { host: host.into(), port, username: username.into(), credential }
    }
}

/// Outcome of a non-streaming `execute` call.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}
