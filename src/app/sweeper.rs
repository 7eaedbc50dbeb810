//! Background purge of expired idempotency entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::IdempotencyStore;

/// Spawn the sweeper. Send `true` on the returned channel to stop it.
pub fn spawn_idempotency_sweeper(
    store: Arc<dyn IdempotencyStore>,
    interval: Duration,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => debug!("No expired idempotency entries"),
                        Ok(purged) => info!(purged, "Purged expired idempotency entries"),
                        Err(e) => warn!(error = %e, "Idempotency purge failed"),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Idempotency sweeper shutting down");
                        break;
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::InMemoryIdempotencyStore;

    #[tokio::test]
    async fn test_sweeper_purges_and_stops() {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        store
            .set("stale", b"{}", Duration::from_millis(1))
            .await
            .unwrap();
        store
            .set("fresh", b"{}", Duration::from_secs(60))
            .await
            .unwrap();

        let (handle, shutdown_tx) =
            spawn_idempotency_sweeper(store.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.len(), 1);
        assert!(store.get("fresh").await.unwrap().is_some());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
