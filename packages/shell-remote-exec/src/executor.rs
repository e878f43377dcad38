//! The trait the worker depends on (§4.4), so its state-machine tests can
//! run against a fake executor instead of a live SSH host (§8).

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::context::{ExecContext, ExecOutput};
use crate::error::ExecError;

/// Invoked once per output line, `(line_with_newline, is_stderr)`. Returns a
/// boxed future so callers (the worker) can both buffer in memory and
/// persist to the store without this crate depending on `shell-store`.
pub type LineCallback<'a> = Box<dyn FnMut(String, bool) -> BoxFuture<'a, ()> + Send + 'a>;

#[async_trait]
pub trait RemoteShellExecutor: Send + Sync {
    /// Open, authenticate, close. Used for server health checks.
    async fn test_connection(&self, ctx: &ExecContext) -> Result<(), ExecError>;

    async fn execute(
        &self,
        ctx: &ExecContext,
        command: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ExecOutput, ExecError>;

    /// Same as `execute` but streams each line through `callback` as it
    /// arrives; returns only the exit code once the remote process exits.
    async fn execute_streaming<'a>(
        &self,
        ctx: &ExecContext,
        command: &str,
        timeout: Duration,
        cancel: CancellationToken,
        callback: LineCallback<'a>,
    ) -> Result<i32, ExecError>;
}
