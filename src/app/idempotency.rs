//! Idempotency cache for state-mutating requests.
//!
//! A request carrying an idempotency token is keyed by
//! `sha256(subject.token.method.uri)`. The first request for a key claims it,
//! runs the handler and stores the captured response; later requests with
//! the same key get that response back byte for byte without the handler
//! running again. A duplicate that arrives while the first one still holds
//! the claim is turned away with [`AppError::IdempotencyKeyInFlight`].
//! The claim is renewed for as long as the handler runs, so a slow handler
//! never loses it to a duplicate.
//!
//! Store failures never fail a request: the live response is served and
//! caching is skipped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::domain::{AppError, IdempotencyStore};

/// Request header carrying the client's idempotency token
pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// Response header set on replayed responses
pub const IDEMPOTENCY_CACHE_HEADER: &str = "x-idempotency-cache";

/// Value of [`IDEMPOTENCY_CACHE_HEADER`] on a replayed response
pub const CACHE_HIT: &str = "HIT";

/// Idempotency cache settings
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Lifetime of a stored response
    pub ttl: Duration,
    /// Lifetime of a claim whose response was never stored. The owner
    /// renews it at half this period while its handler runs.
    pub claim_ttl: Duration,
    /// Period of the expired-entry sweeper
    pub sweep_interval: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            claim_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// A fully buffered HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
}

mod base64_body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Opaque cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Hex SHA-256 of `subject.token.method.uri`.
    #[must_use]
    pub fn derive(subject: &str, token: &str, method: &str, uri: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{subject}.{token}.{method}.{uri}"));
        Self(format!("{:x}", hasher.finalize()))
    }

    /// `None` when the client sent no token, in which case the request is
    /// not cached at all.
    #[must_use]
    pub fn from_parts(subject: &str, token: &str, method: &str, uri: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        Some(Self::derive(subject, token, method, uri))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of running a request through the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Replayed from the store, the handler did not run
    Hit(CapturedResponse),
    /// Produced by the handler on this request
    Miss(CapturedResponse),
}

pub struct IdempotencyCache {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl IdempotencyCache {
    #[must_use]
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    /// Replay the stored response for `key`, or run `handler` and store what
    /// it returns.
    #[instrument(skip(self, key, handler), fields(key = %key.as_str()))]
    pub async fn execute<F, Fut>(
        &self,
        key: &IdempotencyKey,
        handler: F,
    ) -> Result<CacheOutcome, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CapturedResponse, AppError>>,
    {
        match self.lookup(key).await {
            Lookup::Hit(response) => {
                debug!("Idempotency cache hit");
                return Ok(CacheOutcome::Hit(response));
            }
            Lookup::Corrupt(bytes) => {
                // Only the request that removes the unreadable entry goes on
                // to claim; the others lose the claim below.
                if let Err(e) = self.store.discard(key.as_str(), &bytes).await {
                    warn!(error = %e, "Could not discard unreadable entry, executing uncached");
                    return self.run_and_store(key, handler, false).await;
                }
            }
            Lookup::Miss => {}
        }

        let owned = match self.store.claim(key.as_str(), self.config.claim_ttl).await {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(error = %e, "Idempotency claim failed, executing uncached");
                return self.run_and_store(key, handler, false).await;
            }
        };

        if owned {
            return self.run_and_store(key, handler, true).await;
        }

        // Lost the claim. The winner may have stored its response meanwhile.
        match self.lookup(key).await {
            Lookup::Hit(response) => Ok(CacheOutcome::Hit(response)),
            Lookup::Miss | Lookup::Corrupt(_) => {
                info!("Duplicate request while original is in flight");
                Err(AppError::IdempotencyKeyInFlight)
            }
        }
    }

    async fn lookup(&self, key: &IdempotencyKey) -> Lookup {
        match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(response) => Lookup::Hit(response),
                Err(e) => {
                    warn!(error = %e, "Unreadable idempotency entry");
                    Lookup::Corrupt(bytes)
                }
            },
            Ok(None) => Lookup::Miss,
            Err(e) => {
                warn!(error = %e, "Idempotency lookup failed, treating as miss");
                Lookup::Miss
            }
        }
    }

    async fn run_and_store<F, Fut>(
        &self,
        key: &IdempotencyKey,
        handler: F,
        claimed: bool,
    ) -> Result<CacheOutcome, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CapturedResponse, AppError>>,
    {
        let result = if claimed {
            self.holding_claim(key, handler()).await
        } else {
            handler().await
        };
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if claimed {
                    self.release(key).await;
                }
                return Err(e);
            }
        };

        let stored = match serde_json::to_vec(&response) {
            Ok(bytes) => self
                .store
                .set(key.as_str(), &bytes, self.config.ttl)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(e) = stored {
            warn!(error = %e, "Could not cache response, serving it uncached");
            if claimed {
                self.release(key).await;
            }
        }

        Ok(CacheOutcome::Miss(response))
    }

    /// Drive `work` to completion, renewing the claim on `key` meanwhile.
    async fn holding_claim<Fut>(&self, key: &IdempotencyKey, work: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        let claim_ttl = self.config.claim_ttl;
        let period = (claim_ttl / 2).max(Duration::from_millis(1));
        let mut renewal = tokio::time::interval_at(Instant::now() + period, period);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = renewal.tick() => match self.store.renew(key.as_str(), claim_ttl).await {
                    Ok(true) => debug!("Idempotency claim renewed"),
                    Ok(false) => warn!("Idempotency claim no longer held"),
                    Err(e) => warn!(error = %e, "Could not renew idempotency claim"),
                },
            }
        }
    }

    async fn release(&self, key: &IdempotencyKey) {
        if let Err(e) = self.store.release(key.as_str()).await {
            warn!(error = %e, "Could not release idempotency claim");
        }
    }
}

enum Lookup {
    Hit(CapturedResponse),
    Miss,
    /// Raw bytes that failed to deserialize
    Corrupt(Vec<u8>),
}
