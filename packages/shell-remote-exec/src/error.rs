//! Narrow error taxonomy for the connect/auth/stream phases this crate
//! owns; terminal job-status mapping happens one layer up in the worker.

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("could not reach {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication failed for {username}@{host}: {reason}")]
    Auth { host: String, username: String, reason: String },

    #[error("private key could not be parsed: {0}")]
    KeyParse(String),

    #[error("connection timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("execution was canceled")]
    Canceled,

    #[error("i/o error while streaming output: {0}")]
    Io(String),

    #[error("ssh protocol error: {0}")]
    Protocol(String),
}
