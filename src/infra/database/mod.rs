//! Relational persistence.

pub mod postgres;

pub use postgres::{PostgresClient, PostgresConfig};
