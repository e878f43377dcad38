//! Drains an [`OutputChannel`] into the store on the §9 cadence: every 10
//! lines or every 2 seconds, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use shell_store::JobStoreGateway;
use tracing::warn;
use uuid::Uuid;

use crate::output::OutputChannel;

const FLUSH_LINE_THRESHOLD: u32 = 10;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run_persister(store: Arc<dyn JobStoreGateway>, job_id: Uuid, channel: Arc<OutputChannel>) {
    let mut pending_stdout = String::new();
    let mut pending_stderr = String::new();
    let mut lines_since_flush: u32 = 0;
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            line = channel.recv() => {
                match line {
                    Some(line) => {
                        if line.is_stderr {
                            pending_stderr.push_str(&line.text);
                        } else {
                            pending_stdout.push_str(&line.text);
                        }
                        lines_since_flush += 1;
                        if lines_since_flush >= FLUSH_LINE_THRESHOLD {
                            flush(&store, job_id, &mut pending_stdout, &mut pending_stderr).await;
                            lines_since_flush = 0;
                        }
                    }
                    None => {
                        flush(&store, job_id, &mut pending_stdout, &mut pending_stderr).await;
                        if let Some(diagnostic) = channel.overflow_diagnostic() {
                            if let Err(err) = store.append_output(job_id, &diagnostic, true).await {
                                warn!(%job_id, error = %err, "failed to persist overflow diagnostic");
                            }
                        }
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&store, job_id, &mut pending_stdout, &mut pending_stderr).await;
                lines_since_flush = 0;
            }
        }
    }
}

async fn flush(store: &Arc<dyn JobStoreGateway>, job_id: Uuid, stdout: &mut String, stderr: &mut String) {
    if !stdout.is_empty() {
        append_with_retry(store, job_id, stdout, false).await;
        stdout.clear();
    }
    if !stderr.is_empty() {
        append_with_retry(store, job_id, stderr, true).await;
        stderr.clear();
    }
}

/// Retries once inline on a storage failure before logging and moving on
/// (§7: "Storage failure mid-job").
async fn append_with_retry(store: &Arc<dyn JobStoreGateway>, job_id: Uuid, chunk: &str, is_stderr: bool) {
    if let Err(err) = store.append_output(job_id, chunk, is_stderr).await {
        warn!(%job_id, error = %err, is_stderr, "failed to persist output chunk; retrying once");
        if let Err(err) = store.append_output(job_id, chunk, is_stderr).await {
            warn!(%job_id, error = %err, is_stderr, "output chunk persist failed again; continuing");
        }
    }
}
