//! Domain layer containing core business types, traits, and error definitions.

pub mod cpf;
pub mod error;
pub mod money;
pub mod traits;
pub mod types;

pub use cpf::Cpf;
pub use error::{AppError, ConfigError, DatabaseError, ErrorCategory, ValidationError};
pub use money::Money;
pub use traits::{
    AccountRepository, IdempotencyStore, LedgerScope, TransferRepository, UnitOfWork,
};
pub use types::{
    Account, AccountBalance, AccountBalanceResponse, AccountResponse, CreateAccountRequest,
    CreateTransferRequest, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus,
    LoginRequest, TokenResponse, Transfer, TransferInput, TransferResponse,
};
