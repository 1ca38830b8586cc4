//! Watchlist Store
//!
//! In-memory per-user watchlists, optionally seeded from a JSON file of the
//! form `{"user-id": ["AAPL", "BINANCE:BTCUSDT"]}`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{WatchlistError, WatchlistStore};
use crate::domain::quote::Symbol;

/// Watchlists held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryWatchlistStore {
    lists: RwLock<HashMap<String, HashSet<Symbol>>>,
}

impl InMemoryWatchlistStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load watchlists from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the file cannot be read and `Invalid` if it
    /// is not a map of user ids to symbol arrays.
    pub async fn from_json_file(path: &Path) -> Result<Self, WatchlistError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| WatchlistError::Unavailable(format!("{}: {e}", path.display())))?;
        let parsed: HashMap<String, Vec<String>> =
            serde_json::from_slice(&raw).map_err(|e| WatchlistError::Invalid(e.to_string()))?;

        let lists = parsed
            .into_iter()
            .map(|(user, symbols)| {
                let set = symbols
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .map(Symbol::new)
                    .collect();
                (user, set)
            })
            .collect::<HashMap<_, _>>();

        tracing::info!(users = lists.len(), path = %path.display(), "Watchlists loaded");
        Ok(Self {
            lists: RwLock::new(lists),
        })
    }

    /// Replace a user's watchlist.
    pub fn set_watchlist(&self, user_id: impl Into<String>, symbols: impl IntoIterator<Item = Symbol>) {
        self.lists
            .write()
            .insert(user_id.into(), symbols.into_iter().collect());
    }

    /// Number of users with a stored watchlist.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.lists.read().len()
    }
}

#[async_trait]
impl WatchlistStore for InMemoryWatchlistStore {
    async fn watchlist(&self, user_id: &str) -> Result<HashSet<Symbol>, WatchlistError> {
        if user_id.trim().is_empty() {
            return Err(WatchlistError::Invalid("empty user id".to_string()));
        }
        Ok(self.lists.read().get(user_id).cloned().unwrap_or_default())
    }
}
