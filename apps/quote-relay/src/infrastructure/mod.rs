//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Subscriber session fan-out.
pub mod broadcast;

/// Quote cache stores (in-process and Redis).
pub mod cache;

/// Configuration loading.
pub mod config;

/// Finnhub stream, REST and symbol bootstrap adapters.
pub mod finnhub;

/// HTTP endpoints and subscriber WebSockets.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;

/// Per-user watchlist store.
pub mod watchlist;
