//! Domain types with validation support.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::cpf::Cpf;
use super::error::ValidationError;
use super::money::Money;

/// Bank account as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub cpf: Cpf,
    /// Argon2 PHC string, never the raw secret
    pub secret_hash: String,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
}

impl Account {
    #[must_use]
    pub fn new(name: &str, cpf: Cpf, secret_hash: String, balance: Money) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            cpf,
            secret_hash,
            balance,
            created_at: Utc::now(),
        }
    }
}

/// Balance snapshot read through the balance port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBalance {
    pub id: String,
    pub balance: Money,
}

/// Immutable record of a committed balance movement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub id: String,
    pub account_origin_id: String,
    pub account_destination_id: String,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    #[must_use]
    pub fn new(account_origin_id: String, account_destination_id: String, amount: Money) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_origin_id,
            account_destination_id,
            amount,
            created_at: Utc::now(),
        }
    }
}

/// Transfer engine input, origin taken from the bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInput {
    pub account_origin_id: String,
    pub account_destination_id: String,
    pub amount: Money,
}

impl TransferInput {
    #[must_use]
    pub fn new(account_origin_id: &str, account_destination_id: &str, amount: Money) -> Self {
        Self {
            account_origin_id: account_origin_id.trim().to_string(),
            account_destination_id: account_destination_id.trim().to_string(),
            amount,
        }
    }

    /// Checks run in a fixed order and stop at the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.account_origin_id.is_empty() {
            return Err(ValidationError::OriginAccountRequired);
        }
        if self.account_destination_id.is_empty() {
            return Err(ValidationError::DestinationAccountRequired);
        }
        if !self.amount.is_positive() {
            return Err(ValidationError::AmountNotPositive);
        }
        if self.account_origin_id == self.account_destination_id {
            return Err(ValidationError::SameAccount);
        }
        Ok(())
    }
}

/// Request body for `POST /transfers`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTransferRequest {
    /// Destination account ID
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub account_destination_id: String,
    /// Amount in major units, at most two fractional digits are kept
    #[schema(example = 1.99)]
    pub amount: f64,
}

impl CreateTransferRequest {
    #[must_use]
    pub fn new(account_destination_id: impl Into<String>, amount: f64) -> Self {
        Self {
            account_destination_id: account_destination_id.into(),
            amount,
        }
    }
}

/// Transfer as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TransferResponse {
    #[schema(example = "0b8c1a4e-2f7d-4a39-9f3e-5d0c6b7a8e91")]
    pub id: String,
    pub account_origin_id: String,
    pub account_destination_id: String,
    #[schema(example = 1.99)]
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Transfer> for TransferResponse {
    fn from(transfer: &Transfer) -> Self {
        Self {
            id: transfer.id.clone(),
            account_origin_id: transfer.account_origin_id.clone(),
            account_destination_id: transfer.account_destination_id.clone(),
            amount: transfer.amount.to_f64(),
            created_at: transfer.created_at,
        }
    }
}

/// Request body for `POST /accounts`
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateAccountRequest {
    #[validate(custom(function = "validate_name"))]
    #[schema(example = "Homer Simpson")]
    pub name: String,
    #[validate(custom(function = "validate_cpf"))]
    #[schema(example = "761.647.810-78")]
    pub cpf: String,
    /// Between 6 and 100 characters
    #[schema(value_type = String, example = "donuts123")]
    #[serde(deserialize_with = "deserialize_secret")]
    pub secret: SecretString,
    #[validate(range(min = 0.0, message = "'balance' must be greater than or equal to zero"))]
    #[schema(example = 100.0)]
    #[serde(default)]
    pub balance: f64,
}

impl CreateAccountRequest {
    #[must_use]
    pub fn new(name: &str, cpf: &str, secret: &str, balance: f64) -> Self {
        Self {
            name: name.to_string(),
            cpf: cpf.to_string(),
            secret: SecretString::from(secret.to_string()),
            balance,
        }
    }

    /// Length check for `secret`, which stays outside the derived
    /// validator because it is not `Serialize`.
    pub fn validate_secret(&self) -> Result<(), ValidationError> {
        let len = self.secret.expose_secret().chars().count();
        if (6..=100).contains(&len) {
            Ok(())
        } else {
            Err(ValidationError::InvalidField {
                field: "secret".to_string(),
                message: "'secret' must be between 6 and 100 characters in length".to_string(),
            })
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn validate_name(name: &str) -> Result<(), validator::ValidationError> {
    let len = name.trim().chars().count();
    if (2..=100).contains(&len) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("name_length")
            .with_message("'name' must be between 2 and 100 characters in length".into()))
    }
}

fn validate_cpf(cpf: &str) -> Result<(), validator::ValidationError> {
    if Cpf::new(cpf).is_valid() {
        Ok(())
    } else {
        Err(validator::ValidationError::new("cpf").with_message("'cpf' is invalid".into()))
    }
}

/// Account as returned by the API (no secret)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AccountResponse {
    pub id: String,
    pub name: String,
    #[schema(example = "761.647.810-78")]
    pub cpf: String,
    pub balance: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            name: account.name.clone(),
            cpf: account.cpf.to_string(),
            balance: account.balance.to_f64(),
            created_at: account.created_at,
        }
    }
}

/// Response for `GET /accounts/{id}/balance`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AccountBalanceResponse {
    pub id: String,
    #[schema(example = 98.01)]
    pub balance: f64,
}

/// Request body for `POST /login`
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "761.647.810-78")]
    pub cpf: String,
    #[schema(value_type = String, example = "donuts123")]
    #[serde(deserialize_with = "deserialize_secret")]
    pub secret: SecretString,
}

impl LoginRequest {
    #[must_use]
    pub fn new(cpf: &str, secret: &str) -> Self {
        Self {
            cpf: cpf.to_string(),
            secret: SecretString::from(secret.to_string()),
        }
    }
}

/// Issued bearer token
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Database health status
    pub database: HealthStatus,
    /// Idempotency store health status
    pub idempotency_store: HealthStatus,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    /// The idempotency store is not critical: requests still succeed without
    /// it, so its failure only degrades the service.
    #[must_use]
    pub fn new(database: HealthStatus, idempotency_store: HealthStatus) -> Self {
        let status = match (&database, &idempotency_store) {
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            idempotency_store,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "insufficient_balance")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "current account balance is insufficient")]
    pub message: String,
}
