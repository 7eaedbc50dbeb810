//! Bearer token issuance and verification.
//!
//! Tokens are HMAC-signed JWTs whose `sub` claim is the account id. Only the
//! HMAC family is accepted on verification, which rules out `none` and any
//! asymmetric algorithm a forged header might name.

use std::sync::Arc;
use std::time::Duration;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::domain::{AccountRepository, AppError, Cpf, LoginRequest};

/// Bearer token settings
#[derive(Debug)]
pub struct AuthConfig {
    pub secret: SecretString,
    pub token_ttl: Duration,
}

impl AuthConfig {
    pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            token_ttl: Self::DEFAULT_TOKEN_TTL,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

pub struct AuthService {
    config: AuthConfig,
    accounts: Arc<dyn AccountRepository>,
}

impl AuthService {
    #[must_use]
    pub fn new(config: AuthConfig, accounts: Arc<dyn AccountRepository>) -> Self {
        Self { config, accounts }
    }

    /// Exchange CPF and secret for an access token.
    #[instrument(skip(self, request))]
    pub async fn login(&self, request: LoginRequest) -> Result<String, AppError> {
        let cpf = Cpf::new(&request.cpf);
        let account = match self.accounts.get_by_cpf(&cpf).await {
            Ok(account) => account,
            Err(AppError::AccountNotFound) => {
                warn!("Login for unknown CPF");
                return Err(AppError::InvalidCredentials);
            }
            Err(e) => {
                error!(error = %e, "Could not load account for login");
                return Err(AppError::Login);
            }
        };

        if !verify_secret(request.secret, account.secret_hash).await? {
            warn!(account_id = %account.id, "Login with wrong secret");
            return Err(AppError::InvalidCredentials);
        }

        self.issue_token(&account.id)
    }

    /// Sign a token for `account_id` valid for the configured lifetime.
    pub fn issue_token(&self, account_id: &str) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: account_id.to_string(),
            iat: now,
            exp: now + self.config.token_ttl.as_secs() as i64,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.secret.expose_secret().as_bytes()),
        )
        .map_err(|e| {
            error!(error = %e, "Could not sign access token");
            AppError::Login
        })
    }

    /// Verify a token and return the account id it was issued for.
    ///
    /// Every failure is reported as [`AppError::InvalidAccessToken`].
    pub fn authorize(&self, token: &str) -> Result<String, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.secret.expose_secret().as_bytes()),
            &validation,
        )
        .map_err(|e| {
            debug!(error = %e, "Access token rejected");
            AppError::InvalidAccessToken
        })?;

        if data.claims.sub.is_empty() {
            return Err(AppError::InvalidAccessToken);
        }
        Ok(data.claims.sub)
    }
}

async fn verify_secret(secret: SecretString, secret_hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&secret_hash).map_err(|e| {
            error!(error = %e, "Stored secret hash is malformed");
            AppError::Login
        })?;
        Ok(Argon2::default()
            .verify_password(secret.expose_secret().as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| {
        error!(error = %e, "Secret verification task failed");
        AppError::Login
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AccountService;
    use crate::domain::CreateAccountRequest;
    use crate::test_utils::MockLedger;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    const SECRET: &str = "test-signing-secret";

    fn auth(ledger: &MockLedger) -> AuthService {
        AuthService::new(
            AuthConfig::new(SecretString::from(SECRET.to_string())),
            Arc::new(ledger.clone()),
        )
    }

    fn sign(claims: &Claims, algorithm: Algorithm, secret: &str) -> String {
        encode(
            &Header::new(algorithm),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(sub: &str, exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: sub.to_string(),
            iat: now,
            exp: now + exp_offset,
        }
    }

    #[test]
    fn test_issued_token_authorizes() {
        let auth = auth(&MockLedger::new());
        let token = auth.issue_token("account-1").unwrap();
        assert_eq!(auth.authorize(&token).unwrap(), "account-1");
    }

    #[test]
    fn test_other_hmac_algorithms_accepted() {
        let auth = auth(&MockLedger::new());
        for algorithm in [Algorithm::HS384, Algorithm::HS512] {
            let token = sign(&claims("account-1", 60), algorithm, SECRET);
            assert_eq!(auth.authorize(&token).unwrap(), "account-1");
        }
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = auth(&MockLedger::new());
        let token = sign(&claims("account-1", -1), Algorithm::HS256, SECRET);
        assert!(matches!(
            auth.authorize(&token),
            Err(AppError::InvalidAccessToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let auth = auth(&MockLedger::new());
        let token = sign(&claims("account-1", 60), Algorithm::HS256, "another-secret");
        assert!(matches!(
            auth.authorize(&token),
            Err(AppError::InvalidAccessToken)
        ));
    }

    #[test]
    fn test_unsigned_token_rejected() {
        let auth = auth(&MockLedger::new());
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&claims("account-1", 60)).unwrap(),
        );
        let token = format!("{header}.{payload}.");
        assert!(matches!(
            auth.authorize(&token),
            Err(AppError::InvalidAccessToken)
        ));
    }

    #[test]
    fn test_garbage_and_empty_subject_rejected() {
        let auth = auth(&MockLedger::new());
        for token in ["", "abc", "a.b.c"] {
            assert!(matches!(
                auth.authorize(token),
                Err(AppError::InvalidAccessToken)
            ));
        }
        let token = sign(&claims("", 60), Algorithm::HS256, SECRET);
        assert!(matches!(
            auth.authorize(&token),
            Err(AppError::InvalidAccessToken)
        ));
    }

    #[tokio::test]
    async fn test_login_flow() {
        let ledger = MockLedger::new();
        let account = AccountService::new(Arc::new(ledger.clone()))
            .create(CreateAccountRequest::new("Homer", "761.647.810-78", "donuts", 0.0))
            .await
            .unwrap();
        let auth = auth(&ledger);

        let token = auth
            .login(LoginRequest::new("76164781078", "donuts"))
            .await
            .unwrap();
        assert_eq!(auth.authorize(&token).unwrap(), account.id);

        let wrong = auth
            .login(LoginRequest::new("76164781078", "duff-beer"))
            .await;
        assert!(matches!(wrong, Err(AppError::InvalidCredentials)));

        let unknown = auth
            .login(LoginRequest::new("529.982.247-25", "donuts"))
            .await;
        assert!(matches!(unknown, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_login_repository_failure_is_generic() {
        let auth = auth(&MockLedger::failing("pool closed"));
        let result = auth.login(LoginRequest::new("76164781078", "donuts")).await;
        assert!(matches!(result, Err(AppError::Login)));
    }
}
