//! Route table and middleware stack.

use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{
    ApiDoc, create_account_handler, create_transfer_handler, get_account_balance_handler,
    health_check_handler, list_accounts_handler, list_transfers_handler, liveness_handler,
    login_handler, readiness_handler,
};
use super::middleware::{bearer_auth_middleware, idempotency_middleware};
use crate::app::AppState;

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Route layers wrap in reverse order: auth runs first so the idempotency
    // key can include the caller's account id.
    let transfer_routes = Router::new()
        .route(
            "/transfers",
            post(create_transfer_handler).get(list_transfers_handler),
        )
        .route_layer(from_fn_with_state(state.clone(), idempotency_middleware))
        .route_layer(from_fn_with_state(state.clone(), bearer_auth_middleware));

    let account_routes = Router::new()
        .route(
            "/accounts",
            post(create_account_handler).get(list_accounts_handler),
        )
        .route_layer(from_fn_with_state(state.clone(), idempotency_middleware))
        .route("/accounts/{id}/balance", get(get_account_balance_handler))
        .route("/login", post(login_handler));

    let health_routes = Router::new()
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler));

    Router::new()
        .merge(transfer_routes)
        .merge(account_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(state)
}
