//! Idempotency store backends.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryIdempotencyStore;
pub use postgres::PostgresIdempotencyStore;
