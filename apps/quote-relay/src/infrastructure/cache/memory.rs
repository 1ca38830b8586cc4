//! In-process quote store with per-entry expiry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CacheError, QuoteStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Quote store backed by a concurrent map.
///
/// Expired entries are treated as absent and removed lazily on read;
/// [`run_eviction`](Self::run_eviction) sweeps the ones never read again.
#[derive(Debug, Default)]
pub struct MemoryQuoteStore {
    entries: DashMap<String, Entry>,
}

impl MemoryQuoteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Sweep expired entries every `every` until cancelled.
    pub async fn run_eviction(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.evict_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.len(), "Evicted expired quotes");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl QuoteStore for MemoryQuoteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let live = self.entries.get(key).and_then(|entry| {
            (entry.expires_at > now).then(|| entry.value.clone())
        });
        if live.is_none() {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        Ok(live)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryQuoteStore::new();
        store.set("quote:AAPL", "v1".into(), TTL).await.unwrap();
        assert_eq!(store.get("quote:AAPL").await.unwrap().as_deref(), Some("v1"));

        tokio::time::advance(TTL).await;
        assert_eq!(store.get("quote:AAPL").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn set_resets_expiry() {
        let store = MemoryQuoteStore::new();
        store.set("k", "v1".into(), TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        store.set("k", "v2".into(), TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = MemoryQuoteStore::new();
        store.set("k", "v".into(), TTL).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.delete("missing").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_expired_entries() {
        let store = MemoryQuoteStore::new();
        store.set("short", "v".into(), Duration::from_secs(1)).await.unwrap();
        store.set("long", "v".into(), TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.evict_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_task_sweeps_unread_entries() {
        let store = Arc::new(MemoryQuoteStore::new());
        store.set("short", "v".into(), Duration::from_secs(1)).await.unwrap();
        store.set("long", "v".into(), Duration::from_secs(60)).await.unwrap();

        let cancel = CancellationToken::new();
        let sweeper = tokio::spawn(Arc::clone(&store).run_eviction(TTL, cancel.clone()));

        tokio::time::sleep(TTL + Duration::from_secs(1)).await;
        assert_eq!(store.len(), 1);

        cancel.cancel();
        sweeper.await.unwrap();
    }
}
