//! Request middleware: bearer authentication and idempotent replay.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::app::{
    AppState, CACHE_HIT, CacheOutcome, CapturedResponse, IDEMPOTENCY_CACHE_HEADER,
    IDEMPOTENCY_KEY_HEADER, IdempotencyKey,
};
use crate::domain::AppError;

/// Account id resolved from the bearer token, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedAccount(pub String);

/// Reject the request unless it carries a valid `Authorization: Bearer` token.
pub async fn bearer_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers()).ok_or(AppError::InvalidAccessToken)?;
    let account_id = state.auth.authorize(token)?;

    request
        .extensions_mut()
        .insert(AuthenticatedAccount(account_id));
    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Replay or capture responses of state-mutating requests that carry an
/// `X-Idempotency-Key` header.
///
/// Must run inside [`bearer_auth_middleware`] on protected routes so the
/// caller's account id is part of the key.
pub async fn idempotency_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method().is_safe() {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let subject = request
        .extensions()
        .get::<AuthenticatedAccount>()
        .map(|account| account.0.as_str())
        .unwrap_or_default();
    let uri = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path(), |pq| pq.as_str());

    let Some(key) = IdempotencyKey::from_parts(subject, token, request.method().as_str(), uri)
    else {
        return next.run(request).await;
    };

    let outcome = state
        .idempotency
        .execute(&key, || async move { capture(next.run(request).await).await })
        .await;

    match outcome {
        Ok(CacheOutcome::Hit(captured)) => replay(captured, true),
        Ok(CacheOutcome::Miss(captured)) => replay(captured, false),
        Err(e) => e.into_response(),
    }
}

/// Buffer a response so it can be stored and replayed.
pub async fn capture(response: Response) -> Result<CapturedResponse, AppError> {
    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to buffer response body: {e}")))?;

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| match value.to_str() {
            Ok(value) => Some((name.as_str().to_string(), value.to_string())),
            Err(_) => {
                debug!(header = %name, "Dropping non-UTF-8 header from captured response");
                None
            }
        })
        .collect();

    Ok(CapturedResponse {
        status: parts.status.as_u16(),
        headers,
        body: body.to_vec(),
    })
}

/// Rebuild a response from its captured form.
pub fn replay(captured: CapturedResponse, hit: bool) -> Response {
    let status = StatusCode::from_u16(captured.status).unwrap_or_else(|_| {
        warn!(status = captured.status, "Captured response has an invalid status");
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut response = Response::new(Body::from(captured.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &captured.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "Skipping unreplayable header"),
        }
    }
    if hit {
        headers.insert(IDEMPOTENCY_CACHE_HEADER, HeaderValue::from_static(CACHE_HIT));
    }

    response
}
