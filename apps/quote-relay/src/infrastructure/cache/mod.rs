//! Quote Cache Stores
//!
//! Implementations of the [`QuoteStore`](crate::application::ports::QuoteStore)
//! port: an in-process map for single-instance deployments and Redis for a
//! cache shared between instances.

mod memory;
mod redis;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use self::memory::MemoryQuoteStore;
pub use self::redis::RedisQuoteStore;
use crate::application::ports::QuoteStore;
use crate::infrastructure::config::CacheSettings;

/// Build the configured store.
///
/// Falls back to the in-process store when Redis is unreachable at startup.
/// An in-process store is swept of expired entries once per TTL until
/// `cancel` fires.
pub async fn build_store(
    settings: &CacheSettings,
    cancel: &CancellationToken,
) -> Arc<dyn QuoteStore> {
    let Some(url) = settings.redis_url.as_deref() else {
        tracing::info!("Using in-process quote cache");
        return memory_store(settings, cancel);
    };

    match RedisQuoteStore::connect(url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, using in-process quote cache");
            memory_store(settings, cancel)
        }
    }
}

fn memory_store(settings: &CacheSettings, cancel: &CancellationToken) -> Arc<dyn QuoteStore> {
    let store = Arc::new(MemoryQuoteStore::new());
    tokio::spawn(Arc::clone(&store).run_eviction(settings.ttl, cancel.clone()));
    store
}
