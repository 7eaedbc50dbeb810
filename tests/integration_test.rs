//! Integration tests for the API.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use springfield_bank::api::create_router;
use springfield_bank::app::{
    AppSettings, AppState, AuthConfig, CACHE_HIT, IDEMPOTENCY_CACHE_HEADER,
    IDEMPOTENCY_KEY_HEADER, IdempotencyKey,
};
use springfield_bank::domain::{
    AccountBalanceResponse, AccountRepository, AccountResponse, CreateTransferRequest,
    ErrorResponse, HealthResponse, HealthStatus, IdempotencyStore, Money, TokenResponse,
    TransferResponse,
};
use springfield_bank::test_utils::{MockIdempotencyStore, MockLedger};

const SIGNING_SECRET: &str = "integration-test-signing-secret";
const VALID_CPF: &str = "761.647.810-78";

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    ledger: MockLedger,
    store: Arc<MockIdempotencyStore>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_store(MockIdempotencyStore::new())
    }

    fn with_store(store: MockIdempotencyStore) -> Self {
        let ledger = MockLedger::new();
        let store = Arc::new(store);
        let settings = AppSettings::new(AuthConfig::new(SecretString::from(
            SIGNING_SECRET.to_string(),
        )));
        let state = Arc::new(AppState::new(
            Arc::new(ledger.clone()),
            Arc::new(ledger.clone()),
            Arc::new(ledger.clone()),
            store.clone(),
            settings,
        ));
        Self {
            router: create_router(Arc::clone(&state)),
            state,
            ledger,
            store,
        }
    }

    fn token_for(&self, account_id: &str) -> String {
        self.state.auth.issue_token(account_id).unwrap()
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn post_transfer(
        &self,
        origin: &str,
        destination: &str,
        amount: f64,
        idempotency_key: Option<&str>,
    ) -> Response {
        let payload = CreateTransferRequest::new(destination, amount);
        let mut builder = Request::builder()
            .method("POST")
            .uri("/transfers")
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.token_for(origin)));
        if let Some(key) = idempotency_key {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        self.send(
            builder
                .body(Body::from(serde_json::to_string(&payload).unwrap()))
                .unwrap(),
        )
        .await
    }

    async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> Response {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn json_body<T: DeserializeOwned>(response: Response) -> T {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn cents(value: i64) -> Money {
    Money::from_minor(value)
}

#[tokio::test]
async fn test_transfer_moves_funds() {
    let app = TestApp::new();
    let origin = app.ledger.seed_account("Homer", cents(10_000));
    let destination = app.ledger.seed_account("Marge", cents(0));

    let response = app.post_transfer(&origin, &destination, 1.99, None).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let transfer: TransferResponse = json_body(response).await;
    assert_eq!(transfer.account_origin_id, origin);
    assert_eq!(transfer.account_destination_id, destination);
    assert_eq!(transfer.amount, 1.99);

    assert_eq!(app.ledger.balance(&origin), Some(cents(9_801)));
    assert_eq!(app.ledger.balance(&destination), Some(cents(199)));
    assert_eq!(app.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_transfer_insufficient_balance() {
    let app = TestApp::new();
    let origin = app.ledger.seed_account("Homer", cents(0));
    let destination = app.ledger.seed_account("Marge", cents(500));

    let response = app.post_transfer(&origin, &destination, 0.01, None).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error.r#type, "insufficient_balance");
    assert_eq!(error.error.message, "current account balance is insufficient");

    assert_eq!(app.ledger.balance(&origin), Some(cents(0)));
    assert_eq!(app.ledger.balance(&destination), Some(cents(500)));
    assert!(app.ledger.transfers().is_empty());
}

#[tokio::test]
async fn test_idempotent_transfer_is_replayed() {
    let app = TestApp::new();
    let origin = app.ledger.seed_account("Homer", cents(10_000));
    let destination = app.ledger.seed_account("Marge", cents(0));

    let first = app
        .post_transfer(&origin, &destination, 10.0, Some("transfer-001"))
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().get(IDEMPOTENCY_CACHE_HEADER).is_none());
    let first_body = body_bytes(first).await;

    let second = app
        .post_transfer(&origin, &destination, 10.0, Some("transfer-001"))
        .await;
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(second.headers()[IDEMPOTENCY_CACHE_HEADER], CACHE_HIT);
    assert_eq!(body_bytes(second).await, first_body);

    assert_eq!(app.ledger.transfers().len(), 1);
    assert_eq!(app.ledger.balance(&origin), Some(cents(9_000)));
    assert_eq!(app.ledger.balance(&destination), Some(cents(1_000)));
    assert_eq!(app.store.stored(), 1);
}

#[tokio::test]
async fn test_transfers_without_key_execute_every_time() {
    let app = TestApp::new();
    let origin = app.ledger.seed_account("Homer", cents(10_000));
    let destination = app.ledger.seed_account("Marge", cents(0));

    for _ in 0..2 {
        let response = app.post_transfer(&origin, &destination, 10.0, None).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    assert_eq!(app.ledger.transfers().len(), 2);
    assert_eq!(app.ledger.balance(&origin), Some(cents(8_000)));
    assert_eq!(app.store.set_calls(), 0);
}

#[tokio::test]
async fn test_same_key_from_different_callers_is_not_shared() {
    let app = TestApp::new();
    let homer = app.ledger.seed_account("Homer", cents(10_000));
    let marge = app.ledger.seed_account("Marge", cents(10_000));
    let bart = app.ledger.seed_account("Bart", cents(0));

    let first = app.post_transfer(&homer, &bart, 1.0, Some("shared")).await;
    let second = app.post_transfer(&marge, &bart, 1.0, Some("shared")).await;

    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(second.status(), StatusCode::CREATED);
    assert!(second.headers().get(IDEMPOTENCY_CACHE_HEADER).is_none());
    assert_eq!(app.ledger.transfers().len(), 2);
    assert_eq!(app.ledger.balance(&bart), Some(cents(200)));
}

#[tokio::test]
async fn test_rejected_transfer_is_replayed_too() {
    let app = TestApp::new();
    let origin = app.ledger.seed_account("Homer", cents(100));
    let destination = app.ledger.seed_account("Marge", cents(0));

    let first = app
        .post_transfer(&origin, &destination, 5.0, Some("too-much"))
        .await;
    assert_eq!(first.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Funds arriving later do not change the recorded outcome.
    let top_up = app.ledger.seed_account("Lisa", cents(1_000));
    let response = app.post_transfer(&top_up, &origin, 10.0, None).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let second = app
        .post_transfer(&origin, &destination, 5.0, Some("too-much"))
        .await;
    assert_eq!(second.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(second.headers()[IDEMPOTENCY_CACHE_HEADER], CACHE_HIT);
    assert_eq!(app.ledger.balance(&destination), Some(cents(0)));
}

#[tokio::test]
async fn test_transfer_succeeds_when_idempotency_store_is_down() {
    let app = TestApp::with_store(MockIdempotencyStore::failing("store offline"));
    let origin = app.ledger.seed_account("Homer", cents(10_000));
    let destination = app.ledger.seed_account("Marge", cents(0));

    let response = app
        .post_transfer(&origin, &destination, 1.0, Some("key-1"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().get(IDEMPOTENCY_CACHE_HEADER).is_none());
    assert_eq!(app.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_transfer_succeeds_when_cache_write_fails() {
    let store = MockIdempotencyStore::new();
    store.set_fail_writes(true);
    let app = TestApp::with_store(store);
    let origin = app.ledger.seed_account("Homer", cents(10_000));
    let destination = app.ledger.seed_account("Marge", cents(0));

    let response = app
        .post_transfer(&origin, &destination, 1.0, Some("key-1"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.store.stored(), 0);
    assert_eq!(app.store.pending(), 0);
}

#[tokio::test]
async fn test_duplicate_in_flight_is_rejected() {
    let app = TestApp::new();
    let origin = app.ledger.seed_account("Homer", cents(10_000));
    let destination = app.ledger.seed_account("Marge", cents(0));

    // Another request with the same key holds the claim.
    let key = IdempotencyKey::derive(&origin, "in-flight", "POST", "/transfers");
    assert!(
        app.store
            .claim(key.as_str(), Duration::from_secs(60))
            .await
            .unwrap()
    );

    let response = app
        .post_transfer(&origin, &destination, 1.0, Some("in-flight"))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error.r#type, "idempotency_key_in_flight");
    assert!(app.ledger.transfers().is_empty());
}

#[tokio::test]
async fn test_transfer_requires_bearer_token() {
    let app = TestApp::new();
    let destination = app.ledger.seed_account("Marge", cents(0));
    let payload = CreateTransferRequest::new(destination, 1.0);

    let missing = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/transfers")
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_string(&payload).unwrap()))
                .unwrap(),
        )
        .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let forged = app.get("/transfers", Some("not-a-jwt")).await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = json_body(forged).await;
    assert_eq!(error.error.r#type, "invalid_access_token");
    assert_eq!(error.error.message, "invalid access token");
}

#[tokio::test]
async fn test_transfer_validation_errors() {
    let app = TestApp::new();
    let origin = app.ledger.seed_account("Homer", cents(10_000));

    let same = app.post_transfer(&origin, &origin, 1.0, None).await;
    assert_eq!(same.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = json_body(same).await;
    assert_eq!(
        error.error.message,
        "origin and destination accounts must not be the same"
    );

    let zero = app.post_transfer(&origin, "someone", 0.0, None).await;
    assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

    let blank = app.post_transfer(&origin, "   ", 1.0, None).await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let unknown = app.post_transfer(&origin, "no-such-account", 1.0, None).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    assert_eq!(app.ledger.balance(&origin), Some(cents(10_000)));
    assert!(app.ledger.transfers().is_empty());
}

#[tokio::test]
async fn test_list_transfers_newest_first() {
    let app = TestApp::new();
    let homer = app.ledger.seed_account("Homer", cents(10_000));
    let marge = app.ledger.seed_account("Marge", cents(10_000));
    let bart = app.ledger.seed_account("Bart", cents(0));

    app.post_transfer(&homer, &marge, 1.0, None).await;
    app.post_transfer(&marge, &homer, 2.0, None).await;
    app.post_transfer(&marge, &bart, 3.0, None).await;

    let token = app.token_for(&homer);
    let response = app.get("/transfers", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let transfers: Vec<TransferResponse> = json_body(response).await;
    let amounts: Vec<f64> = transfers.iter().map(|t| t.amount).collect();
    assert_eq!(amounts, vec![2.0, 1.0]);
    // Reads are never cached.
    assert_eq!(app.store.set_calls(), 0);
}

#[tokio::test]
async fn test_account_lifecycle_and_login() {
    let app = TestApp::new();

    let created = app
        .post_json(
            "/accounts",
            serde_json::json!({
                "name": "Homer Simpson",
                "cpf": VALID_CPF,
                "secret": "donuts123",
                "balance": 100.0
            }),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let account: AccountResponse = json_body(created).await;
    assert_eq!(account.name, "Homer Simpson");
    assert_eq!(account.cpf, VALID_CPF);
    assert_eq!(account.balance, 100.0);

    let duplicate = app
        .post_json(
            "/accounts",
            serde_json::json!({
                "name": "Homer J. Simpson",
                "cpf": "76164781078",
                "secret": "donuts456",
                "balance": 0.0
            }),
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let listed = app.get("/accounts", None).await;
    assert_eq!(listed.status(), StatusCode::OK);
    let raw = body_bytes(listed).await;
    assert!(!String::from_utf8_lossy(&raw).contains("secret"));
    let accounts: Vec<AccountResponse> = serde_json::from_slice(&raw).unwrap();
    assert_eq!(accounts.len(), 1);

    let balance = app
        .get(&format!("/accounts/{}/balance", account.id), None)
        .await;
    assert_eq!(balance.status(), StatusCode::OK);
    let balance: AccountBalanceResponse = json_body(balance).await;
    assert_eq!(balance.balance, 100.0);

    let wrong = app
        .post_json(
            "/login",
            serde_json::json!({"cpf": VALID_CPF, "secret": "not-donuts"}),
        )
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let login = app
        .post_json(
            "/login",
            serde_json::json!({"cpf": VALID_CPF, "secret": "donuts123"}),
        )
        .await;
    assert_eq!(login.status(), StatusCode::OK);
    let token: TokenResponse = json_body(login).await;
    assert_eq!(app.state.auth.authorize(&token.access_token).unwrap(), account.id);

    let transfers = app.get("/transfers", Some(&token.access_token)).await;
    assert_eq!(transfers.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_account_creation_rejects_invalid_input() {
    let app = TestApp::new();

    let response = app
        .post_json(
            "/accounts",
            serde_json::json!({
                "name": "Homer Simpson",
                "cpf": "111.111.111-11",
                "secret": "donuts123",
                "balance": 10.0
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error.r#type, "validation_error");
    assert!(app.ledger.list_accounts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_balance_of_unknown_account() {
    let app = TestApp::new();
    let response = app.get("/accounts/does-not-exist/balance", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();

    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = json_body(response).await;
    assert_eq!(health.status, HealthStatus::Healthy);

    let live = app.get("/health/live", None).await;
    assert_eq!(live.status(), StatusCode::OK);

    app.store.set_healthy(false);
    let health: HealthResponse = json_body(app.get("/health", None).await).await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.idempotency_store, HealthStatus::Unhealthy);
    assert_eq!(app.get("/health/ready", None).await.status(), StatusCode::OK);

    app.ledger.set_healthy(false);
    let health: HealthResponse = json_body(app.get("/health", None).await).await;
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(
        app.get("/health/ready", None).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = TestApp::new();
    let response = app.get("/api-docs/openapi.json", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let doc: serde_json::Value = json_body(response).await;
    assert!(doc["paths"]["/transfers"].is_object());
    assert!(doc["components"]["securitySchemes"]["bearer_auth"].is_object());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = TestApp::new();
    let response = app
        .post_json(
            "/accounts",
            serde_json::json!({
                "name": "x".repeat(128 * 1024),
                "cpf": VALID_CPF,
                "secret": "donuts123",
                "balance": 1.0
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.ledger.list_accounts().await.unwrap().is_empty());
}
