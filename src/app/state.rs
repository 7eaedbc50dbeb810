//! Application state management.

use std::sync::Arc;

use tracing::warn;

use crate::domain::{
    AccountRepository, ConfigError, HealthResponse, HealthStatus, IdempotencyStore,
    TransferRepository, UnitOfWork,
};

use super::account_service::AccountService;
use super::auth::{AuthConfig, AuthService};
use super::idempotency::{IdempotencyCache, IdempotencyConfig};
use super::transfer_service::{TransferConfig, TransferService};

/// Settings passed down to the services
#[derive(Debug)]
pub struct AppSettings {
    pub auth: AuthConfig,
    pub transfer: TransferConfig,
    pub idempotency: IdempotencyConfig,
}

impl AppSettings {
    /// Defaults for everything except the token signing secret
    #[must_use]
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            auth,
            transfer: TransferConfig::default(),
            idempotency: IdempotencyConfig::default(),
        }
    }

    /// Reject combinations that break replay guarantees.
    ///
    /// An in-flight claim must outlive the longest transfer, otherwise a
    /// duplicate could claim the key while the original is still running.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idempotency.claim_ttl <= self.transfer.timeout {
            return Err(ConfigError::InvalidValue {
                name: "IDEMPOTENCY_CLAIM_TTL_SECS".to_string(),
                message: format!(
                    "must be greater than TRANSFER_TIMEOUT_SECS ({}s), got {}s",
                    self.transfer.timeout.as_secs(),
                    self.idempotency.claim_ttl.as_secs()
                ),
            });
        }
        if self.idempotency.ttl < self.idempotency.claim_ttl {
            return Err(ConfigError::InvalidValue {
                name: "IDEMPOTENCY_TTL_SECS".to_string(),
                message: "must not be shorter than IDEMPOTENCY_CLAIM_TTL_SECS".to_string(),
            });
        }
        Ok(())
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub transfers: Arc<TransferService>,
    pub accounts: Arc<AccountService>,
    pub auth: Arc<AuthService>,
    pub idempotency: Arc<IdempotencyCache>,
    pub account_repo: Arc<dyn AccountRepository>,
}

impl AppState {
    /// Create a new application state
    #[must_use]
    pub fn new(
        account_repo: Arc<dyn AccountRepository>,
        transfer_repo: Arc<dyn TransferRepository>,
        uow: Arc<dyn UnitOfWork>,
        idempotency_store: Arc<dyn IdempotencyStore>,
        settings: AppSettings,
    ) -> Self {
        Self {
            transfers: Arc::new(TransferService::new(
                uow,
                transfer_repo,
                settings.transfer,
            )),
            accounts: Arc::new(AccountService::new(Arc::clone(&account_repo))),
            auth: Arc::new(AuthService::new(
                settings.auth,
                Arc::clone(&account_repo),
            )),
            idempotency: Arc::new(IdempotencyCache::new(
                idempotency_store,
                settings.idempotency,
            )),
            account_repo,
        }
    }

    /// Database failure is fatal, idempotency store failure only degrades.
    pub async fn health_check(&self) -> HealthResponse {
        let database = match self.account_repo.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };
        let idempotency_store = match self.idempotency.store().health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = %e, "Idempotency store health check failed");
                HealthStatus::Unhealthy
            }
        };
        HealthResponse::new(database, idempotency_store)
    }
}
