//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: Observations per source, trade frames, parse errors
//! - **Dedup**: Change events, suppressed duplicates, cache errors
//! - **Polling**: Failed requests and cycle durations
//! - **Delivery**: Per-session deliveries, drops and active sessions
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::QuoteApiError;
use crate::domain::quote::ObservationSource;
use crate::domain::subscription::PublishReport;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the already installed handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Ingestion
    describe_counter!(
        "quote_relay_observations_total",
        "Quote observations received by source"
    );
    describe_counter!(
        "quote_relay_untracked_observations_total",
        "Observations dropped because the symbol is not tracked"
    );
    describe_counter!(
        "quote_relay_trade_frames_total",
        "Trade frames received from the upstream stream"
    );
    describe_counter!(
        "quote_relay_parse_errors_total",
        "Upstream frames discarded because they could not be parsed"
    );
    describe_counter!(
        "quote_relay_stream_reconnects_total",
        "Upstream stream reconnection attempts"
    );

    // Dedup
    describe_counter!(
        "quote_relay_changes_total",
        "Observations that differed from the cached quote"
    );
    describe_counter!(
        "quote_relay_duplicates_total",
        "Observations suppressed as unchanged"
    );
    describe_counter!(
        "quote_relay_cache_errors_total",
        "Cache store failures by operation"
    );

    // Polling
    describe_counter!(
        "quote_relay_poll_failures_total",
        "Failed quote requests by reason"
    );
    describe_histogram!(
        "quote_relay_poll_cycle_seconds",
        "Time to poll every tracked symbol once"
    );

    // Delivery
    describe_counter!(
        "quote_relay_deliveries_total",
        "Messages queued for subscriber sessions"
    );
    describe_counter!(
        "quote_relay_dropped_deliveries_total",
        "Messages dropped because a session queue was full"
    );
    describe_gauge!(
        "quote_relay_active_sessions",
        "Connected subscriber sessions"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for messages fanned out to sessions.
#[derive(Debug, Clone, Copy)]
pub enum DeliveryKind {
    /// Deduplicated quote change.
    QuoteUpdate,
    /// Relayed upstream trade frame.
    StockData,
}

impl DeliveryKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::QuoteUpdate => "quote_update",
            Self::StockData => "stock_data",
        }
    }
}

const fn poll_failure_reason(err: &QuoteApiError) -> &'static str {
    match err {
        QuoteApiError::Http(_) => "http",
        QuoteApiError::Status { .. } => "status",
        QuoteApiError::RateLimited => "rate_limited",
        QuoteApiError::Timeout(_) => "timeout",
        QuoteApiError::Decode(_) => "decode",
    }
}

/// Record an observation entering the pipeline.
pub fn record_observation(source: ObservationSource) {
    counter!("quote_relay_observations_total", "source" => source.as_str()).increment(1);
}

/// Record an observation for a symbol that is not tracked.
pub fn record_untracked_observation() {
    counter!("quote_relay_untracked_observations_total").increment(1);
}

/// Record a change event.
pub fn record_change(source: ObservationSource) {
    counter!("quote_relay_changes_total", "source" => source.as_str()).increment(1);
}

/// Record a suppressed duplicate.
pub fn record_duplicate(source: ObservationSource) {
    counter!("quote_relay_duplicates_total", "source" => source.as_str()).increment(1);
}

/// Record a cache store failure.
pub fn record_cache_error(operation: &'static str) {
    counter!("quote_relay_cache_errors_total", "operation" => operation).increment(1);
}

/// Record a failed quote request.
pub fn record_poll_failure(err: &QuoteApiError) {
    counter!(
        "quote_relay_poll_failures_total",
        "reason" => poll_failure_reason(err)
    )
    .increment(1);
}

/// Record the duration of one polling cycle.
pub fn record_poll_cycle(duration: Duration) {
    histogram!("quote_relay_poll_cycle_seconds").record(duration.as_secs_f64());
}

/// Record an upstream reconnection attempt.
pub fn record_stream_reconnect() {
    counter!("quote_relay_stream_reconnects_total").increment(1);
}

/// Record a discarded upstream frame.
pub fn record_parse_error() {
    counter!("quote_relay_parse_errors_total").increment(1);
}

/// Record a trade frame and the trades it carried.
pub fn record_trade_frame(trades: usize) {
    counter!("quote_relay_trade_frames_total").increment(1);
    tracing::trace!(trades, "Trade frame received");
}

/// Record the outcome of one fan-out.
pub fn record_publish(kind: DeliveryKind, report: &PublishReport) {
    counter!("quote_relay_deliveries_total", "kind" => kind.as_str())
        .increment(report.delivered as u64);
    if report.dropped > 0 {
        counter!("quote_relay_dropped_deliveries_total", "kind" => kind.as_str())
            .increment(report.dropped as u64);
    }
}

/// Update the connected session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_sessions(count: usize) {
    gauge!("quote_relay_active_sessions").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
