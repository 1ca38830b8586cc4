//! Dedup & Change Detection
//!
//! Compares each observation against the last published quote held in the
//! [`QuoteStore`] and forwards only the ones that differ.
//!
//! Read-then-write for a symbol runs under a per-symbol async lock, so a
//! streaming and a polling observation for the same symbol can never both
//! read the old value and publish twice. Different symbols never contend.
//!
//! Store failures fail open: an unreadable cache counts as "changed" and a
//! failed write is only logged.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::application::ports::QuoteStore;
use crate::domain::quote::{ChangeEvent, Observation, Quote, Symbol};
use crate::infrastructure::metrics;

/// Prefix applied to symbols to form cache keys.
const CACHE_KEY_PREFIX: &str = "quote:";

/// Cache key holding the last published quote for a symbol.
#[must_use]
pub fn cache_key(symbol: &Symbol) -> String {
    format!("{CACHE_KEY_PREFIX}{symbol}")
}

/// Deduplicating change detector.
pub struct ChangeDetector {
    store: Arc<dyn QuoteStore>,
    ttl: Duration,
    locks: DashMap<Symbol, Arc<Mutex<()>>>,
}

impl ChangeDetector {
    /// Create a detector writing entries with the given expiry.
    #[must_use]
    pub fn new(store: Arc<dyn QuoteStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, symbol: &Symbol) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(symbol.clone()).or_default().value())
    }

    /// Process one observation.
    ///
    /// Returns the change event when the quote differs from the cached one
    /// (or nothing is cached), after storing it.
    pub async fn observe(&self, observation: Observation) -> Option<ChangeEvent> {
        self.observe_tracked(observation, |_| true).await
    }

    /// Like [`observe`](Self::observe), but drops the observation when
    /// `is_tracked` rejects the symbol once its lock is held.
    ///
    /// A tear-down that completes while this call waits for the lock is
    /// never undone by a late write.
    pub async fn observe_tracked(
        &self,
        observation: Observation,
        is_tracked: impl Fn(&Symbol) -> bool + Send,
    ) -> Option<ChangeEvent> {
        let Observation {
            symbol,
            quote,
            source,
        } = observation;
        let lock = self.lock_for(&symbol);
        let _guard = lock.lock().await;

        if !is_tracked(&symbol) {
            tracing::debug!(symbol = %symbol, source = source.as_str(), "Symbol retired while waiting");
            metrics::record_untracked_observation();
            return None;
        }

        let key = cache_key(&symbol);
        if self.read_cached(&key, &symbol).await.as_ref() == Some(&quote) {
            tracing::trace!(symbol = %symbol, source = source.as_str(), "Quote unchanged");
            metrics::record_duplicate(source);
            return None;
        }

        self.write_cached(&key, &symbol, &quote).await;
        metrics::record_change(source);
        tracing::debug!(symbol = %symbol, source = source.as_str(), "Quote changed");

        Some(ChangeEvent { symbol, quote })
    }

    async fn read_cached(&self, key: &str, symbol: &Symbol) -> Option<Quote> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(quote) => Some(quote),
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Discarding malformed cache entry");
                    metrics::record_cache_error("decode");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Cache read failed, treating quote as changed");
                metrics::record_cache_error("get");
                None
            }
        }
    }

    async fn write_cached(&self, key: &str, symbol: &Symbol, quote: &Quote) {
        let raw = match serde_json::to_string(quote) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Failed to encode quote for cache");
                metrics::record_cache_error("encode");
                return;
            }
        };
        if let Err(e) = self.store.set(key, raw, self.ttl).await {
            tracing::warn!(symbol = %symbol, error = %e, "Cache write failed");
            metrics::record_cache_error("set");
        }
    }

    /// Last published quote for a symbol, if still live. Never writes.
    pub async fn latest(&self, symbol: &Symbol) -> Option<Quote> {
        self.read_cached(&cache_key(symbol), symbol).await
    }

    /// Drop everything held for a symbol that is no longer tracked.
    pub async fn forget(&self, symbol: &Symbol) {
        let lock = self.lock_for(symbol);
        {
            let _guard = lock.lock().await;
            if let Err(e) = self.store.delete(&cache_key(symbol)).await {
                tracing::warn!(symbol = %symbol, error = %e, "Cache delete failed");
                metrics::record_cache_error("delete");
            }
        }
        self.locks.remove(symbol);
    }
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("ttl", &self.ttl)
            .field("tracked_locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
