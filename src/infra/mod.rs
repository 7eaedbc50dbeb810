//! Infrastructure layer implementations.

pub mod database;
pub mod idempotency;

pub use database::{PostgresClient, PostgresConfig};
pub use idempotency::{InMemoryIdempotencyStore, PostgresIdempotencyStore};
