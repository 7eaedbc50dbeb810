//! Application entry point.

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use springfield_bank::api::create_router;
use springfield_bank::app::{
    AppSettings, AppState, AuthConfig, IdempotencyConfig, TransferConfig,
    spawn_idempotency_sweeper,
};
use springfield_bank::domain::{ConfigError, IdempotencyStore};
use springfield_bank::infra::{
    InMemoryIdempotencyStore, PostgresClient, PostgresConfig, PostgresIdempotencyStore,
};

const SECRET_PLACEHOLDER: &str = "CHANGE_ME";

/// Where idempotency entries live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdempotencyBackend {
    Postgres,
    Memory,
}

impl FromStr for IdempotencyBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(invalid(
                "IDEMPOTENCY_BACKEND",
                format!("must be 'postgres' or 'memory', got '{other}'"),
            )),
        }
    }
}

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    db_max_connections: u32,
    json_logs: bool,
    settings: AppSettings,
    idempotency_backend: IdempotencyBackend,
}

impl Config {
    fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_or("PORT", 8080)?;
        let db_max_connections = env_or("DB_MAX_CONNECTIONS", 10)?;
        let json_logs = env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let mut auth = AuthConfig::new(Self::load_auth_secret()?);
        auth.token_ttl = secs_or(
            "AUTH_ACCESS_TOKEN_DURATION_SECS",
            AuthConfig::DEFAULT_TOKEN_TTL,
        )?;

        let transfer = TransferConfig {
            timeout: secs_or("TRANSFER_TIMEOUT_SECS", TransferConfig::default().timeout)?,
        };

        let defaults = IdempotencyConfig::default();
        let idempotency = IdempotencyConfig {
            ttl: secs_or("IDEMPOTENCY_TTL_SECS", defaults.ttl)?,
            claim_ttl: secs_or("IDEMPOTENCY_CLAIM_TTL_SECS", defaults.claim_ttl)?,
            sweep_interval: secs_or("IDEMPOTENCY_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
        };

        let settings = AppSettings {
            auth,
            transfer,
            idempotency,
        };
        settings.validate()?;

        let idempotency_backend = env::var("IDEMPOTENCY_BACKEND")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(IdempotencyBackend::Postgres);

        Ok(Self {
            database_url,
            host,
            port,
            db_max_connections,
            json_logs,
            settings,
            idempotency_backend,
        })
    }

    fn load_auth_secret() -> Result<SecretString, ConfigError> {
        let secret = env::var("AUTH_SECRET_KEY")
            .map_err(|_| ConfigError::MissingVar("AUTH_SECRET_KEY".to_string()))?;

        if secret.trim().is_empty() {
            return Err(invalid("AUTH_SECRET_KEY", "must not be empty"));
        }

        if secret == SECRET_PLACEHOLDER {
            return Err(invalid(
                "AUTH_SECRET_KEY",
                "still set to the placeholder value, replace it with a long random string",
            ));
        }

        Ok(SecretString::from(secret))
    }
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.into(),
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| invalid(name, e.to_string()))
        }
        _ => Ok(default),
    }
}

fn secs_or(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let secs = env_or(name, default.as_secs())?;
    if secs == 0 {
        return Err(invalid(name, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.json_logs);

    info!("🏗️  Springfield Bank v{}", env!("CARGO_PKG_VERSION"));
    info!("📦 Initializing infrastructure...");

    let db_config = PostgresConfig {
        max_connections: config.db_max_connections,
        ..PostgresConfig::default()
    };
    let postgres_client = Arc::new(PostgresClient::new(&config.database_url, db_config).await?);
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    let idempotency_store: Arc<dyn IdempotencyStore> = match config.idempotency_backend {
        IdempotencyBackend::Postgres => {
            info!("   ✓ Idempotency store: PostgreSQL");
            Arc::new(PostgresIdempotencyStore::new(postgres_client.pool().clone()))
        }
        IdempotencyBackend::Memory => {
            warn!("   ○ Idempotency store: in-memory (not shared between instances)");
            Arc::new(InMemoryIdempotencyStore::new())
        }
    };

    let sweep_interval = config.settings.idempotency.sweep_interval;
    let (_sweeper_handle, sweeper_shutdown_tx) =
        spawn_idempotency_sweeper(Arc::clone(&idempotency_store), sweep_interval);
    info!(
        "   ✓ Idempotency sweeper started (every {}s)",
        sweep_interval.as_secs()
    );

    let app_state = Arc::new(AppState::new(
        postgres_client.clone(),
        postgres_client.clone(),
        postgres_client,
        idempotency_store,
        config.settings,
    ));

    let router = create_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = sweeper_shutdown_tx.send(true);

    info!("Server shutdown complete");
    Ok(())
}
