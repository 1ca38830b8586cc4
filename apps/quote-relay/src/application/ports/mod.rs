//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`QuoteStore`]: Key-value cache of last published quotes
//! - [`QuoteApi`]: Request/response quote lookups for polling
//! - [`SymbolSource`]: Bootstrap list of tracked symbols
//! - [`WatchlistStore`]: Per-user watchlists for filtered sessions
//! - [`ChangePublisher`]: Fan-out of change events to subscribers

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::quote::{ChangeEvent, Quote, Symbol};
use crate::domain::subscription::PublishReport;

// =============================================================================
// Errors
// =============================================================================

/// Errors from a quote cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend could not be reached or rejected the command.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A cached value could not be encoded or decoded.
    #[error("cache value codec error: {0}")]
    Codec(String),
}

/// Errors from the upstream quote API.
#[derive(Debug, thiserror::Error)]
pub enum QuoteApiError {
    /// Transport failure.
    #[error("quote request failed: {0}")]
    Http(String),

    /// Non-success HTTP status.
    #[error("quote API returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The upstream throttled the request.
    #[error("quote API rate limit exceeded")]
    RateLimited,

    /// The request did not complete in time.
    #[error("quote request timed out after {0:?}")]
    Timeout(Duration),

    /// The response body could not be parsed.
    #[error("failed to decode quote response: {0}")]
    Decode(String),
}

/// Errors from the watchlist store.
#[derive(Debug, thiserror::Error)]
pub enum WatchlistError {
    /// The store could not be read.
    #[error("watchlist store unavailable: {0}")]
    Unavailable(String),

    /// The stored data is malformed.
    #[error("invalid watchlist data: {0}")]
    Invalid(String),
}

/// Errors while loading the tracked symbol list.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The upstream listing could not be fetched.
    #[error("symbol listing request failed: {0}")]
    Fetch(#[from] QuoteApiError),

    /// The on-disk cache could not be read or written.
    #[error("symbol cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk cache is malformed.
    #[error("symbol cache is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// No symbols are available from any source.
    #[error("no symbols available to track")]
    NoSymbols,
}

// =============================================================================
// Ports
// =============================================================================

/// Key-value store holding the last published quote per symbol.
///
/// Values are opaque strings; callers own serialization.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Fetch a live value.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value, replacing any previous one and resetting its expiry.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a value.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Point-in-time quote lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteApi: Send + Sync {
    /// Fetch the current quote for a symbol.
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, QuoteApiError>;
}

/// Supplier of the ordered list of tracked symbols.
#[async_trait]
pub trait SymbolSource: Send + Sync {
    /// Load the symbols to track, in registry order.
    async fn load_symbols(&self) -> Result<Vec<Symbol>, BootstrapError>;
}

/// Per-user watchlists.
#[async_trait]
pub trait WatchlistStore: Send + Sync {
    /// The watchlist of a user; unknown users have an empty watchlist.
    async fn watchlist(&self, user: &str) -> Result<HashSet<Symbol>, WatchlistError>;
}

/// Destination of deduplicated change events.
pub trait ChangePublisher: Send + Sync {
    /// Deliver an event to every matching subscriber.
    fn publish(&self, event: &ChangeEvent) -> PublishReport;

    /// Stop delivering events for symbols that are no longer tracked.
    fn retire_symbols(&self, symbols: &[Symbol]);
}
