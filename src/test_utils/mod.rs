//! Test doubles shared by unit and integration tests.

mod mocks;

pub use mocks::{LedgerFaults, MockConfig, MockIdempotencyStore, MockLedger};
