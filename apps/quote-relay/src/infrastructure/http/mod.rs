//! HTTP and Subscriber WebSocket Server
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of sources, sessions and registry
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (a source is delivering quotes)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /symbols/stocks`, `GET /symbols/crypto` - Tracked symbols by class
//! - `GET /ws/quotes` - Unfiltered quote stream
//! - `GET /ws/watchlist?user=<id>` - Quote stream filtered to a watchlist

mod health;
mod sessions;
mod symbols;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use self::health::{HealthResponse, HealthStatus};
use crate::application::ports::WatchlistStore;
use crate::application::services::ChangeDetector;
use crate::domain::registry::SymbolRegistry;
use crate::domain::streaming::SourceState;
use crate::infrastructure::broadcast::SharedBroadcastHub;

// =============================================================================
// Server State
// =============================================================================

/// Services shared by every HTTP handler.
pub struct AppState {
    /// Service version.
    pub version: String,
    /// Process start time.
    pub started_at: Instant,
    /// Subscriber fan-out.
    pub hub: SharedBroadcastHub,
    /// Tracked symbols.
    pub registry: Arc<SymbolRegistry>,
    /// Latest cached quotes, for watchlist snapshots.
    pub detector: Arc<ChangeDetector>,
    /// Per-user watchlists.
    pub watchlists: Arc<dyn WatchlistStore>,
    /// Upstream stream status.
    pub stream_state: Arc<SourceState>,
    /// Polling status.
    pub poll_state: Arc<SourceState>,
    /// Closes subscriber sockets on shutdown.
    pub cancel: CancellationToken,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/healthz", get(health::liveness_handler))
        .route("/readyz", get(health::readiness_handler))
        .route("/metrics", get(health::metrics_handler))
        .route("/symbols/stocks", get(symbols::stocks_handler))
        .route("/symbols/crypto", get(symbols::crypto_handler))
        .route("/ws/quotes", get(sessions::quotes_handler))
        .route("/ws/watchlist", get(sessions::watchlist_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Server
// =============================================================================

/// HTTP server for health, symbols and subscriber sessions.
pub struct HttpServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server encounters
    /// a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HttpServerError> {
        let local = listener
            .local_addr()
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;
        tracing::info!(addr = %local, "HTTP server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Test Support
// =============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tokio_util::sync::CancellationToken;

    use super::AppState;
    use crate::application::services::ChangeDetector;
    use crate::domain::quote::{ObservationSource, Symbol};
    use crate::domain::registry::SymbolRegistry;
    use crate::domain::streaming::SourceState;
    use crate::infrastructure::broadcast::BroadcastHub;
    use crate::infrastructure::cache::MemoryQuoteStore;
    use crate::infrastructure::watchlist::InMemoryWatchlistStore;

    pub fn state(symbols: &[&str], watchlists: InMemoryWatchlistStore) -> Arc<AppState> {
        Arc::new(AppState {
            version: "test".to_string(),
            started_at: Instant::now(),
            hub: Arc::new(BroadcastHub::default()),
            registry: Arc::new(SymbolRegistry::from_symbols(
                symbols.iter().copied().map(Symbol::from),
            )),
            detector: Arc::new(ChangeDetector::new(
                Arc::new(MemoryQuoteStore::new()),
                Duration::from_secs(10),
            )),
            watchlists: Arc::new(watchlists),
            stream_state: Arc::new(SourceState::new(ObservationSource::Stream)),
            poll_state: Arc::new(SourceState::new(ObservationSource::Poll)),
            cancel: CancellationToken::new(),
        })
    }
}
