//! Process-local idempotency store.
//!
//! Suitable for a single instance only: entries are not shared between
//! processes and are lost on restart.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::{AppError, IdempotencyStore};

enum Slot {
    Pending,
    Ready(Vec<u8>),
}

struct StoredEntry {
    slot: Slot,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryIdempotencyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included until purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        let now = Instant::now();
        Ok(self.entries.get(key).and_then(|entry| match &entry.slot {
            Slot::Ready(bytes) if entry.is_live(now) => Some(bytes.clone()),
            _ => None,
        }))
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let now = Instant::now();
        let pending = StoredEntry {
            slot: Slot::Pending,
            expires_at: now + ttl,
        };
        // The entry API holds the shard lock, making check-and-insert atomic.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(pending);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(pending);
                Ok(true)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), AppError> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                slot: Slot::Ready(value.to_vec()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let now = Instant::now();
        Ok(match self.entries.get_mut(key) {
            Some(mut entry) if matches!(entry.slot, Slot::Pending) && entry.is_live(now) => {
                entry.expires_at = now + ttl;
                true
            }
            _ => false,
        })
    }

    async fn release(&self, key: &str) -> Result<(), AppError> {
        self.entries
            .remove_if(key, |_, entry| matches!(entry.slot, Slot::Pending));
        Ok(())
    }

    async fn discard(&self, key: &str, value: &[u8]) -> Result<bool, AppError> {
        let removed = self.entries.remove_if(key, |_, entry| {
            matches!(&entry.slot, Slot::Ready(bytes) if bytes.as_slice() == value)
        });
        Ok(removed.is_some())
    }

    async fn purge_expired(&self) -> Result<u64, AppError> {
        let now = Instant::now();
        let mut purged = 0u64;
        self.entries.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                purged += 1;
            }
            live
        });
        Ok(purged)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
