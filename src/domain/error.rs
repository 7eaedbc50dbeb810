//! Error types shared across every layer.
//!
//! [`AppError`] is a closed set of conditions. Each variant reports an
//! [`ErrorCategory`]; the HTTP layer maps categories to status codes in one
//! place instead of matching individual variants.

use thiserror::Error;

/// Coarse classification used for status-code dispatch and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed or rejected input, safe to show verbatim
    Validation,
    /// Caller identity could not be established
    Unauthorized,
    /// A referenced account does not exist
    NotFound,
    /// The request collides with existing or in-flight state
    Conflict,
    /// A business rule rejected an otherwise valid request
    BusinessRule,
    /// A dependency is temporarily unreachable
    Unavailable,
    /// Anything unexpected; details stay server-side
    Internal,
}

impl ErrorCategory {
    /// Whether the underlying error text may be shown to the caller.
    #[must_use]
    pub fn is_client_facing(self) -> bool {
        !matches!(self, Self::Unavailable | Self::Internal)
    }
}

/// Input validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("'account_origin_id' is required")]
    OriginAccountRequired,

    #[error("'account_destination_id' is required")]
    DestinationAccountRequired,

    #[error("'amount' must be greater than zero")]
    AmountNotPositive,

    #[error("'amount' is out of range")]
    AmountOutOfRange,

    #[error("origin and destination accounts must not be the same")]
    SameAccount,

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("{0}")]
    Multiple(String),
}

/// Persistence failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

/// Startup configuration failures, reported before the server binds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("account not found")]
    AccountNotFound,

    #[error("current account balance is insufficient")]
    InsufficientBalance,

    #[error("an account with this CPF already exists")]
    AccountAlreadyExists,

    #[error("invalid access token")]
    InvalidAccessToken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("a request with this idempotency key is still being processed")]
    IdempotencyKeyInFlight,

    #[error("could not create transfer")]
    TransferCreate,

    #[error("could not fetch transfers")]
    TransferFetch,

    #[error("could not create account")]
    AccountCreate,

    #[error("could not fetch accounts")]
    AccountFetch,

    #[error("could not get account balance")]
    AccountBalance,

    #[error("could not login")]
    Login,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::InvalidAccessToken | Self::InvalidCredentials => ErrorCategory::Unauthorized,
            Self::AccountNotFound => ErrorCategory::NotFound,
            Self::AccountAlreadyExists | Self::IdempotencyKeyInFlight => ErrorCategory::Conflict,
            Self::InsufficientBalance => ErrorCategory::BusinessRule,
            Self::Database(DatabaseError::Connection(_)) => ErrorCategory::Unavailable,
            Self::TransferCreate
            | Self::TransferFetch
            | Self::AccountCreate
            | Self::AccountFetch
            | Self::AccountBalance
            | Self::Login
            | Self::Database(_)
            | Self::Timeout(_)
            | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Stable machine-readable identifier for the error body.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::AccountNotFound => "account_not_found",
            Self::InsufficientBalance => "insufficient_balance",
            Self::AccountAlreadyExists => "account_already_exists",
            Self::InvalidAccessToken => "invalid_access_token",
            Self::InvalidCredentials => "invalid_credentials",
            Self::IdempotencyKeyInFlight => "idempotency_key_in_flight",
            Self::TransferCreate => "transfer_create_failed",
            Self::TransferFetch => "transfer_fetch_failed",
            Self::AccountCreate => "account_create_failed",
            Self::AccountFetch => "account_fetch_failed",
            Self::AccountBalance => "account_balance_failed",
            Self::Login => "login_failed",
            Self::Database(_) => "database_error",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to return to the caller.
    ///
    /// The generic operation failures already carry fixed text; raw
    /// infrastructure errors are replaced wholesale.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(DatabaseError::Connection(_)) => {
                "service temporarily unavailable".to_string()
            }
            Self::Database(_) | Self::Timeout(_) | Self::Internal(_) => {
                "internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}
