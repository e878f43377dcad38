//! Worker runtime (§4.3): pulls jobs off the priority broker and executes
//! them over remote shells, tracking per-job cancellation and output
//! backpressure along the way.

pub mod blob;
pub mod cancellation;
pub mod config;
pub mod output;
pub mod persist;
pub mod runner;
pub mod worker;

pub use blob::{BlobStore, FilesystemBlobStore};
pub use cancellation::CancellationBus;
pub use config::Config;
pub use runner::JobRunner;
pub use worker::Worker;
