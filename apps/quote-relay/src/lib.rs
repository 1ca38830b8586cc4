#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Quote Relay - Live Quote Fan-out
//!
//! Keeps one streaming connection to Finnhub, polls the REST quote API as a
//! fallback, suppresses quotes that have not changed and pushes the changes
//! to many WebSocket subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Quote, symbol, registry and session types
//!   - `quote`: Symbols, quotes, observations and change events
//!   - `registry`: The set of tracked symbols
//!   - `streaming`: Per-source connection state
//!   - `subscription`: Session filters and delivery reports
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Cache store, quote API, symbol source, watchlists, publisher
//!   - `services`: Change detector, poller, pipeline
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `finnhub`: Trade stream client, REST client, symbol bootstrap
//!   - `cache`: In-process and Redis quote stores
//!   - `broadcast`: Per-session filtered fan-out
//!   - `http`: Health, symbol lists and subscriber WebSockets
//!   - `config`, `metrics`, `telemetry`, `watchlist`
//!
//! # Data Flow
//!
//! ```text
//! Finnhub WS ──► StreamClient ──┐
//!                               ├─► QuotePipeline ─► ChangeDetector ─► BroadcastHub ─► sessions
//! Finnhub REST ─► QuotePoller ──┘                        │
//!                                                    QuoteStore
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core quote types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::quote::{ChangeEvent, Observation, ObservationSource, Quote, QuoteUpdate, Symbol};
pub use domain::registry::{RegistryDiff, SymbolRegistry};
pub use domain::streaming::{ConnectionState, SourceState};
pub use domain::subscription::{PublishReport, SessionFilter, SessionId, SessionStats};

// Application services and ports
pub use application::ports::{ChangePublisher, QuoteApi, QuoteStore, SymbolSource, WatchlistStore};
pub use application::services::{ChangeDetector, PollingConfig, QuotePipeline, QuotePoller};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RelayConfig};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastHub, HubMessage, SessionHandle};

// Cache stores
pub use infrastructure::cache::{MemoryQuoteStore, RedisQuoteStore};

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
