//! Health, readiness and metrics handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::domain::streaming::SourceSnapshot;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream stream status.
    pub stream: SourceSnapshot,
    /// Polling status.
    pub polling: SourceSnapshot,
    /// Subscriber sessions.
    pub sessions: SessionStatus,
    /// Tracked symbols.
    pub registry: RegistryStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming upstream connected.
    Healthy,
    /// Only the polling fallback is delivering quotes.
    Degraded,
    /// No source is delivering quotes.
    Unhealthy,
}

impl HealthStatus {
    /// Derive the status from source connectivity.
    #[must_use]
    pub const fn from_sources(stream_connected: bool, poll_connected: bool) -> Self {
        match (stream_connected, poll_connected) {
            (true, _) => Self::Healthy,
            (false, true) => Self::Degraded,
            (false, false) => Self::Unhealthy,
        }
    }
}

/// Subscriber session counts.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionStatus {
    /// All sessions.
    pub total: usize,
    /// Watchlist-filtered sessions.
    pub filtered: usize,
}

/// Tracked symbol counts.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegistryStatus {
    /// All tracked symbols.
    pub symbols: usize,
    /// Tracked cryptocurrencies.
    pub cryptos: usize,
}

// =============================================================================
// HTTP Handlers
// =============================================================================

pub(super) async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.stream_state.is_connected() || state.poll_state.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

pub(super) async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let stream = state.stream_state.snapshot();
    let polling = state.poll_state.snapshot();
    let sessions = state.hub.stats();

    HealthResponse {
        status: HealthStatus::from_sources(
            state.stream_state.is_connected(),
            state.poll_state.is_connected(),
        ),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream,
        polling,
        sessions: SessionStatus {
            total: sessions.total,
            filtered: sessions.filtered,
        },
        registry: RegistryStatus {
            symbols: state.registry.len(),
            cryptos: state.registry.cryptos().len(),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::super::{router, test_support};
    use super::*;
    use crate::domain::streaming::ConnectionState;
    use crate::infrastructure::watchlist::InMemoryWatchlistStore;

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[test]
    fn status_from_sources() {
        assert_eq!(HealthStatus::from_sources(true, false), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_sources(false, true), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_sources(false, false), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let state = test_support::state(&[], InMemoryWatchlistStore::new());
        let (status, body) = get(state, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn not_ready_until_a_source_connects() {
        let state = test_support::state(&["AAPL"], InMemoryWatchlistStore::new());
        let (status, _) = get(Arc::clone(&state), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.poll_state.set_state(ConnectionState::Connected);
        let (status, body) = get(state, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"READY");
    }

    #[tokio::test]
    async fn health_reports_sources_sessions_and_registry() {
        let state = test_support::state(&["AAPL", "BINANCE:BTCUSDT"], InMemoryWatchlistStore::new());
        state.stream_state.set_state(ConnectionState::Connected);
        let _session = state.hub.register_session();

        let (status, body) = get(state, "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["stream"]["state"], "connected");
        assert_eq!(json["sessions"]["total"], 1);
        assert_eq!(json["registry"]["symbols"], 2);
        assert_eq!(json["registry"]["cryptos"], 1);
    }

    #[tokio::test]
    async fn health_is_unavailable_without_sources() {
        let state = test_support::state(&[], InMemoryWatchlistStore::new());
        let (status, _) = get(state, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
