//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use super::middleware::AuthenticatedAccount;
use crate::app::AppState;
use crate::domain::{
    AccountBalanceResponse, AccountResponse, AppError, CreateAccountRequest,
    CreateTransferRequest, ErrorCategory, ErrorDetail, ErrorResponse, HealthResponse,
    HealthStatus, LoginRequest, Money, TokenResponse, TransferInput, TransferResponse,
    ValidationError,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Springfield Bank API",
        version = "0.1.0",
        description = "Accounts, logins and exactly-once fund transfers",
        license(
            name = "MIT"
        )
    ),
    paths(
        create_transfer_handler,
        list_transfers_handler,
        create_account_handler,
        list_accounts_handler,
        get_account_balance_handler,
        login_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            CreateTransferRequest,
            TransferResponse,
            CreateAccountRequest,
            AccountResponse,
            AccountBalanceResponse,
            LoginRequest,
            TokenResponse,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "transfers", description = "Fund transfers between accounts"),
        (name = "accounts", description = "Account management endpoints"),
        (name = "auth", description = "Access token issuance"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Transfer funds from the caller's account
///
/// The origin account is the token subject. Repeating the request with the
/// same `X-Idempotency-Key` replays the first response with
/// `X-Idempotency-Cache: HIT` instead of moving funds again.
#[utoipa::path(
    post,
    path = "/transfers",
    tag = "transfers",
    request_body = CreateTransferRequest,
    params(
        ("X-Idempotency-Key" = Option<String>, Header, description = "Client token that makes the request replay-safe")
    ),
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Transfer committed", body = TransferResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 404, description = "Account not found", body = ErrorResponse),
        (status = 409, description = "Same idempotency key still in flight", body = ErrorResponse),
        (status = 422, description = "Insufficient balance", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_transfer_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(origin)): Extension<AuthenticatedAccount>,
    Json(payload): Json<CreateTransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let amount = Money::from_f64(payload.amount).ok_or(ValidationError::AmountOutOfRange)?;
    let input = TransferInput::new(&origin, &payload.account_destination_id, amount);
    let transfer = state.transfers.create(input).await?;
    Ok((StatusCode::CREATED, Json(TransferResponse::from(&transfer))))
}

/// List transfers of the caller's account, newest first
#[utoipa::path(
    get,
    path = "/transfers",
    tag = "transfers",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Transfers sent or received", body = Vec<TransferResponse>),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_transfers_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account_id)): Extension<AuthenticatedAccount>,
) -> Result<Json<Vec<TransferResponse>>, AppError> {
    let transfers = state.transfers.fetch(&account_id).await?;
    Ok(Json(transfers.iter().map(TransferResponse::from).collect()))
}

/// Open a new account
#[utoipa::path(
    post,
    path = "/accounts",
    tag = "accounts",
    request_body = CreateAccountRequest,
    params(
        ("X-Idempotency-Key" = Option<String>, Header, description = "Client token that makes the request replay-safe")
    ),
    responses(
        (status = 201, description = "Account created", body = AccountResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "CPF already registered", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_account_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    let account = state.accounts.create(payload).await?;
    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

/// List all accounts
#[utoipa::path(
    get,
    path = "/accounts",
    tag = "accounts",
    responses(
        (status = 200, description = "All accounts", body = Vec<AccountResponse>),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_accounts_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AccountResponse>>, AppError> {
    let accounts = state.accounts.list().await?;
    Ok(Json(accounts.iter().map(AccountResponse::from).collect()))
}

/// Current balance of an account
#[utoipa::path(
    get,
    path = "/accounts/{id}/balance",
    tag = "accounts",
    params(
        ("id" = String, Path, description = "Account ID")
    ),
    responses(
        (status = 200, description = "Account balance", body = AccountBalanceResponse),
        (status = 404, description = "Account not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_account_balance_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AccountBalanceResponse>, AppError> {
    let balance = state.accounts.balance(&id).await?;
    Ok(Json(AccountBalanceResponse {
        id: balance.id,
        balance: balance.balance.to_f64(),
    }))
}

/// Exchange CPF and secret for an access token
#[utoipa::path(
    post,
    path = "/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Access token issued", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let access_token = state.auth.login(payload).await?;
    Ok(Json(TokenResponse { access_token }))
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.health_check().await)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.health_check().await.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::BusinessRule => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = status_for(self.category());
        let error_type = self.error_type();

        if status.is_server_error() {
            error!(error_type = %error_type, error = %self, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message: self.public_message(),
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DatabaseError;
    use http_body_util::BodyExt;

    async fn render(err: AppError) -> (StatusCode, ErrorResponse) {
        let response = err.into_response();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_business_errors_render_verbatim() {
        let (status, body) = render(AppError::InsufficientBalance).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.error.r#type, "insufficient_balance");
        assert_eq!(body.error.message, AppError::InsufficientBalance.to_string());

        let (status, _) = render(AppError::AccountNotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = render(AppError::IdempotencyKeyInFlight).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = render(AppError::InvalidAccessToken).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = render(ValidationError::SameAccount.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_infrastructure_errors_are_masked() {
        let (status, body) = render(AppError::Database(DatabaseError::Query(
            "relation \"accounts\" does not exist".into(),
        )))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.message, "internal server error");

        let (status, body) = render(AppError::Database(DatabaseError::Connection(
            "connection refused".into(),
        )))
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.error.message.contains("refused"));
    }
}
