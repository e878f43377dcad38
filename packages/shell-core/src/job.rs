//! Job model: the unit of work submitted against a registered server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Lifecycle status of a job.
///
/// Transitions form a DAG with initial `Queued` and terminals
/// `{Completed, Failed, Canceled}`. See [`JobStatus::can_transition_to`]
/// for the enumerated legal edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "job_status", rename_all = "snake_case"))]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    /// True once the job can no longer transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled)
    }

    /// Enumerates the legal transitions per §3/§8 of the job lifecycle.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Canceled)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Canceled)
        )
    }
}

/// Priority is an integer 1-10; higher is served first.
pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 10;
pub const DEFAULT_PRIORITY: i32 = 5;
pub const DEFAULT_TIMEOUT_SECS: i32 = 300;

/// Clamp a requested priority into the valid `[MIN_PRIORITY, MAX_PRIORITY]` range.
pub fn clamp_priority(priority: i32) -> i32 {
    priority.clamp(MIN_PRIORITY, MAX_PRIORITY)
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub server_id: Uuid,
    pub command: String,

    #[builder(default, setter(strip_option))]
    pub args: Option<String>,

    #[builder(default = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: i32,

    #[builder(default = DEFAULT_PRIORITY)]
    pub priority: i32,

    #[builder(default)]
    pub status: JobStatus,

    #[builder(default)]
    pub stdout: String,

    #[builder(default)]
    pub stderr: String,

    #[builder(default, setter(strip_option))]
    pub exit_code: Option<i32>,

    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub finished_at: Option<DateTime<Utc>>,

    /// Set by the control plane when a cancel is requested for a running job;
    /// polled by the worker's per-job supervisor (§4.6).
    #[builder(default)]
    pub pending_cancel: bool,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a new queued job with a clamped priority and validated fields.
    pub fn new(server_id: Uuid, command: impl Into<String>, priority: i32) -> Self {
        Self::builder()
            .server_id(server_id)
            .command(command.into())
            .priority(clamp_priority(priority))
            .build()
    }

    /// The command line actually executed over the remote shell: `command + " " + args`.
    pub fn effective_command(&self) -> String {
        match &self.args {
            Some(args) if !args.is_empty() => format!("{} {}", self.command, args),
            _ => self.command.clone(),
        }
    }

    /// Validate and apply a status transition, stamping timestamps as required.
    ///
    /// Returns an error rather than panicking so callers (the worker, tests)
    /// can surface an illegal-transition bug without crashing the pool.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), IllegalTransition> {
        if !self.status.can_transition_to(next) {
            return Err(IllegalTransition { from: self.status, to: next });
        }
        if next == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append to the appropriate output buffer. No-op once terminal, matching
    /// the "frozen on terminal transition" invariant in §3.
    pub fn append_output(&mut self, text: &str, is_stderr: bool) {
        if self.status.is_terminal() {
            return;
        }
        if is_stderr {
            self.stderr.push_str(text);
        } else {
            self.stdout.push_str(text);
        }
        self.updated_at = Utc::now();
    }
}

/// A status transition that is not part of the lifecycle DAG in §3.
#[derive(Debug, thiserror::Error)]
#[error("illegal job status transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Job {
        Job::new(Uuid::new_v4(), "echo", 5)
    }

    #[test]
    fn new_job_is_queued_with_default_priority() {
        let job = sample();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn priority_is_clamped_to_valid_range() {
        assert_eq!(Job::new(Uuid::new_v4(), "x", 99).priority, MAX_PRIORITY);
        assert_eq!(Job::new(Uuid::new_v4(), "x", -5).priority, MIN_PRIORITY);
    }

    #[test]
    fn effective_command_joins_args_when_present() {
        let mut job = sample();
        job.args = Some("hi".to_string());
        assert_eq!(job.effective_command(), "echo hi");
    }

    #[test]
    fn effective_command_is_bare_when_args_absent() {
        let job = sample();
        assert_eq!(job.effective_command(), "echo");
    }

    #[test]
    fn queued_to_running_stamps_started_at() {
        let mut job = sample();
        assert!(job.started_at.is_none());
        job.transition(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn running_to_completed_stamps_finished_at() {
        let mut job = sample();
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.finished_at.is_some());
        assert!(job.started_at.unwrap() <= job.finished_at.unwrap());
    }

    #[test]
    fn queued_can_cancel_directly_without_started_at() {
        let mut job = sample();
        job.transition(JobStatus::Canceled).unwrap();
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn backward_transition_is_rejected() {
        let mut job = sample();
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.transition(JobStatus::Running).is_err());
    }

    #[test]
    fn cannot_skip_running_to_reach_completed() {
        let mut job = sample();
        assert!(job.transition(JobStatus::Completed).is_err());
    }

    #[test]
    fn output_is_frozen_after_terminal_transition() {
        let mut job = sample();
        job.transition(JobStatus::Running).unwrap();
        job.append_output("hi\n", false);
        job.transition(JobStatus::Completed).unwrap();
        job.append_output("late\n", false);
        assert_eq!(job.stdout, "hi\n");
    }

    #[test]
    fn stdout_and_stderr_are_independent_buffers() {
        let mut job = sample();
        job.transition(JobStatus::Running).unwrap();
        job.append_output("out\n", false);
        job.append_output("err\n", true);
        assert_eq!(job.stdout, "out\n");
        assert_eq!(job.stderr, "err\n");
    }
}
