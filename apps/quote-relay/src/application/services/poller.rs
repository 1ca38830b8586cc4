//! Polling Fallback
//!
//! On a fixed interval, requests a point-in-time quote for every registered
//! symbol, one at a time, and feeds the results into the same merge point as
//! the streaming observations. A failing symbol is skipped for that cycle
//! only; there is no backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{QuoteApi, QuoteApiError};
use crate::domain::quote::{Observation, ObservationSource};
use crate::domain::registry::SymbolRegistry;
use crate::domain::streaming::{ConnectionState, SourceState};
use crate::infrastructure::metrics;

/// Polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    /// Time between cycle starts.
    pub interval: Duration,
    /// Upper bound for a single quote request.
    pub request_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            request_timeout: Duration::from_millis(5000),
        }
    }
}

/// Outcome of one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Quotes fetched and forwarded.
    pub succeeded: usize,
    /// Requests that failed or timed out.
    pub failed: usize,
}

/// Periodic quote poller.
pub struct QuotePoller {
    api: Arc<dyn QuoteApi>,
    registry: Arc<SymbolRegistry>,
    config: PollingConfig,
    observations: mpsc::Sender<Observation>,
    state: Arc<SourceState>,
    cancel: CancellationToken,
}

impl QuotePoller {
    /// Create a poller that sends observations into `observations`.
    #[must_use]
    pub fn new(
        api: Arc<dyn QuoteApi>,
        registry: Arc<SymbolRegistry>,
        config: PollingConfig,
        observations: mpsc::Sender<Observation>,
        state: Arc<SourceState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            registry,
            config,
            observations,
            state,
            cancel,
        }
    }

    /// Poll until cancelled or until the pipeline goes away.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.config.interval.as_millis(),
            symbols = self.registry.len(),
            "Quote poller started"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.observations.is_closed() {
                        tracing::warn!("Observation channel closed, stopping poller");
                        break;
                    }
                    self.poll_cycle().await;
                }
            }
        }

        self.state.set_state(ConnectionState::Disconnected);
        tracing::info!("Quote poller stopped");
    }

    /// Run one pass over the registry.
    pub async fn poll_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let symbols = self.registry.symbols();
        self.state.set_tracked_symbols(symbols.len());
        let mut report = CycleReport::default();

        for symbol in symbols {
            if self.cancel.is_cancelled() {
                break;
            }

            let result =
                match tokio::time::timeout(self.config.request_timeout, self.api.fetch_quote(&symbol))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(QuoteApiError::Timeout(self.config.request_timeout)),
                };

            match result {
                Ok(quote) => {
                    report.succeeded += 1;
                    let observation = Observation::new(symbol, quote, ObservationSource::Poll);
                    if self.observations.send(observation).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_poll_failure(&e);
                    tracing::warn!(symbol = %symbol, error = %e, "Quote poll failed, skipping symbol");
                }
            }
        }

        self.state.record_messages(report.succeeded as u64);
        if report.succeeded > 0 {
            self.state.set_state(ConnectionState::Connected);
        } else if report.failed > 0 {
            self.state.set_error(format!("all {} quote requests failed", report.failed));
        }

        metrics::record_poll_cycle(started.elapsed());
        tracing::debug!(
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis(),
            "Poll cycle complete"
        );

        report
    }
}

impl std::fmt::Debug for QuotePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotePoller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
