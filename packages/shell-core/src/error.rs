//! Error taxonomy shared across the broker, worker, and store crates,
//! organized by effect per §7 rather than by originating type.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("server {0} is missing")]
    ServerMissing(Uuid),

    #[error("server {0} is disabled")]
    ServerInactive(Uuid),

    #[error("authentication or connection failure: {0}")]
    AuthOrConnect(String),

    #[error("remote process exited with code {0}")]
    NonZeroExit(i32),

    #[error("job was canceled")]
    Canceled,

    #[error("job timed out after {0}s")]
    TimedOut(i32),

    #[error("i/o error while streaming output: {0}")]
    Streaming(String),
}

impl DispatchError {
    /// Whether this outcome should record an `exit_code` on the job row
    /// (§3: "exit_code is set iff ... the remote process was observed to exit").
    pub fn has_observed_exit(&self) -> bool {
        matches!(self, DispatchError::NonZeroExit(_))
    }
}
