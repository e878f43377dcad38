//! A scriptable [`RemoteShellExecutor`] for the worker's unit tests (§8): no
//! network or SSH server required to exercise the state-machine invariants.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::{ExecContext, ExecOutput};
use crate::error::ExecError;
use crate::executor::{LineCallback, RemoteShellExecutor};

#[derive(Clone)]
pub enum ScriptedOutcome {
    Success { stdout: Vec<String>, stderr: Vec<String>, exit_code: i32 },
    AuthFailure,
    ConnectFailure,
    HangUntilCanceled,
    HangUntilTimeout,
}

#[derive(Default)]
pub struct FakeExecutor {
    scripts: Mutex<HashMap<String, ScriptedOutcome>>,
    default: Mutex<Option<ScriptedOutcome>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_for(&self, command: impl Into<String>, outcome: ScriptedOutcome) {
        self.scripts.lock().unwrap().insert(command.into(), outcome);
    }

    pub fn script_default(&self, outcome: ScriptedOutcome) {
        *self.default.lock().unwrap() = Some(outcome);
    }

    fn outcome_for(&self, command: &str) -> ScriptedOutcome {
        self.scripts
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .or_else(|| self.default.lock().unwrap().clone())
            .unwrap_or(ScriptedOutcome::Success { stdout: vec![], stderr: vec![], exit_code: 0 })
    }
}

#[async_trait]
impl RemoteShellExecutor for FakeExecutor {
    async fn test_connection(&self, _ctx: &ExecContext) -> Result<(), ExecError> {
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        command: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ExecOutput, ExecError> {
        let stdout = std::sync::Arc::new(tokio::sync::Mutex::new(String::new()));
        let stderr = std::sync::Arc::new(tokio::sync::Mutex::new(String::new()));
        let stdout2 = stdout.clone();
        let stderr2 = stderr.clone();

        let callback: LineCallback = Box::new(move |line, is_stderr| {
            let stdout = stdout2.clone();
            let stderr = stderr2.clone();
            Box::pin(async move {
                if is_stderr {
                    stderr.lock().await.push_str(&line);
                } else {
                    stdout.lock().await.push_str(&line);
                }
            })
        });

        let exit_code = self.execute_streaming(ctx, command, timeout, cancel, callback).await?;
        let stdout = stdout.lock().await.clone();
        let stderr = stderr.lock().await.clone();
        Ok(ExecOutput { stdout, stderr, exit_code })
    }

    async fn execute_streaming<'a>(
        &self,
        _ctx: &ExecContext,
        command: &str,
        timeout: Duration,
        cancel: CancellationToken,
        mut callback: LineCallback<'a>,
    ) -> Result<i32, ExecError> {
        match self.outcome_for(command) {
            ScriptedOutcome::Success { stdout, stderr, exit_code } => {
                for line in stdout {
                    callback(line, false).await;
                }
                for line in stderr {
                    callback(line, true).await;
                }
                Ok(exit_code)
            }
            ScriptedOutcome::AuthFailure => Err(ExecError::Auth {
                host: "fake".into(),
                username: "fake".into(),
                reason: "scripted failure".into(),
            }),
            ScriptedOutcome::ConnectFailure => Err(ExecError::Connect {
                host: "fake".into(),
                port: 22,
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "scripted failure"),
            }),
            ScriptedOutcome::HangUntilCanceled => {
                cancel.cancelled().await;
                Err(ExecError::Canceled)
            }
            ScriptedOutcome::HangUntilTimeout => {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => Err(ExecError::Timeout(timeout)),
                    _ = cancel.cancelled() => Err(ExecError::Canceled),
                }
            }
        }
    }
}
