//! Job Store Gateway (§4.5): the worker's only path to persisted job and
//! server state. No other crate in this workspace talks to the database
//! directly.

pub mod gateway;
pub mod memory;
pub mod postgres;

pub use gateway::{JobStoreGateway, StoreError};
pub use memory::InMemoryJobStoreGateway;
pub use postgres::PostgresJobStoreGateway;
