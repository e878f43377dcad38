//! Remote Shell Executor (§4.4): authenticated SSH sessions with streamed
//! stdout/stderr, behind a trait so the worker can test against a fake.

pub mod context;
pub mod error;
pub mod executor;
pub mod fake;
pub mod ssh;

pub use context::{ExecContext, ExecOutput};
pub use error::ExecError;
pub use executor::{LineCallback, RemoteShellExecutor};
pub use fake::{FakeExecutor, ScriptedOutcome};
pub use ssh::RusshExecutor;
