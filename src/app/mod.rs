//! Application layer containing business logic and shared state.

pub mod account_service;
pub mod auth;
pub mod idempotency;
pub mod state;
pub mod sweeper;
pub mod transfer_service;
pub mod unit_of_work;

pub use account_service::AccountService;
pub use auth::{AuthConfig, AuthService};
pub use idempotency::{
    CACHE_HIT, CacheOutcome, CapturedResponse, IDEMPOTENCY_CACHE_HEADER, IDEMPOTENCY_KEY_HEADER,
    IdempotencyCache, IdempotencyConfig, IdempotencyKey,
};
pub use state::{AppSettings, AppState};
pub use sweeper::spawn_idempotency_sweeper;
pub use transfer_service::{TransferConfig, TransferService};
pub use unit_of_work::within_transaction;
