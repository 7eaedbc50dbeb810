//! Account registration and lookups.

use std::sync::Arc;

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::domain::{
    Account, AccountBalance, AccountRepository, AppError, CreateAccountRequest, Cpf, Money,
    ValidationError,
};

pub struct AccountService {
    accounts: Arc<dyn AccountRepository>,
}

impl AccountService {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountRepository>) -> Self {
        Self { accounts }
    }

    /// Register a new account. The secret is stored as an Argon2 hash.
    #[instrument(skip(self, request))]
    pub async fn create(&self, request: CreateAccountRequest) -> Result<Account, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;
        request.validate_secret()?;

        let balance = Money::from_f64(request.balance).ok_or_else(|| {
            AppError::Validation(ValidationError::InvalidField {
                field: "balance".to_string(),
                message: "out of range".to_string(),
            })
        })?;
        let cpf = Cpf::new(&request.cpf);

        match self.accounts.exists_by_cpf(&cpf).await {
            Ok(false) => {}
            Ok(true) => return Err(AppError::AccountAlreadyExists),
            Err(e) => {
                error!(error = %e, "Could not check CPF uniqueness");
                return Err(AppError::AccountCreate);
            }
        }

        let secret_hash = hash_secret(request.secret).await.map_err(|e| {
            error!(error = %e, "Could not hash account secret");
            AppError::AccountCreate
        })?;

        let account = Account::new(&request.name, cpf, secret_hash, balance);
        match self.accounts.create_account(&account).await {
            Ok(()) => {
                info!(account_id = %account.id, "Account created");
                Ok(account)
            }
            Err(AppError::AccountAlreadyExists) => Err(AppError::AccountAlreadyExists),
            Err(e) => {
                error!(error = %e, "Could not create account");
                Err(AppError::AccountCreate)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Account>, AppError> {
        self.accounts.list_accounts().await.map_err(|e| {
            error!(error = %e, "Could not list accounts");
            AppError::AccountFetch
        })
    }

    #[instrument(skip(self))]
    pub async fn balance(&self, id: &str) -> Result<AccountBalance, AppError> {
        match self.accounts.get_balance(id).await {
            Ok(balance) => Ok(balance),
            Err(AppError::AccountNotFound) => Err(AppError::AccountNotFound),
            Err(e) => {
                error!(error = %e, "Could not read account balance");
                Err(AppError::AccountBalance)
            }
        }
    }
}

/// Hashing is CPU-bound and runs on the blocking pool.
async fn hash_secret(secret: SecretString) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(secret.expose_secret().as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(e.to_string()))
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
}
