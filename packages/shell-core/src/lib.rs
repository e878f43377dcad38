//! Shared data model for the distributed shell-command execution service.
//!
//! This crate carries no I/O: the broker, broker client, store, and worker
//! crates each depend on it for the [`Job`], [`Server`], and [`Credential`]
//! types so the wire protocol, the database, and the worker's in-memory
//! state never disagree on shape.

pub mod credential;
pub mod error;
pub mod job;
pub mod server;

pub use credential::Credential;
pub use error::DispatchError;
pub use job::{Job, JobStatus};
pub use server::{Server, ServerWithCredential};
