//! Quote Pipeline
//!
//! The single merge point of the two observation streams. Every observation
//! is checked against the registry, deduplicated and, when it is a change,
//! handed to the publisher.
//!
//! ```text
//! stream client ──┐
//!                 ├──► merge ──► registry check ──► detector ──► publisher
//! poller ─────────┘
//! ```

use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::application::ports::ChangePublisher;
use crate::application::services::ChangeDetector;
use crate::domain::quote::{Observation, Symbol};
use crate::domain::registry::{RegistryDiff, SymbolRegistry};
use crate::domain::subscription::PublishReport;
use crate::infrastructure::metrics;

/// Ingestion, dedup and publish pipeline.
pub struct QuotePipeline {
    registry: Arc<SymbolRegistry>,
    detector: Arc<ChangeDetector>,
    publisher: Arc<dyn ChangePublisher>,
    cancel: CancellationToken,
}

impl QuotePipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(
        registry: Arc<SymbolRegistry>,
        detector: Arc<ChangeDetector>,
        publisher: Arc<dyn ChangePublisher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            detector,
            publisher,
            cancel,
        }
    }

    /// Consume both sources until cancelled or until both are exhausted.
    ///
    /// Either source may go quiet indefinitely; the other keeps flowing.
    pub async fn run<S, P>(&self, streaming: S, polling: P)
    where
        S: Stream<Item = Observation> + Send,
        P: Stream<Item = Observation> + Send,
    {
        let merged = streaming.merge(polling);
        tokio::pin!(merged);

        tracing::info!("Quote pipeline started");
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                next = merged.next() => match next {
                    Some(observation) => {
                        self.process(observation).await;
                    }
                    None => {
                        tracing::warn!("All observation sources closed");
                        break;
                    }
                }
            }
        }
        tracing::info!("Quote pipeline stopped");
    }

    /// Process a single observation.
    ///
    /// Returns the delivery report when the observation was a change.
    pub async fn process(&self, observation: Observation) -> Option<PublishReport> {
        metrics::record_observation(observation.source);

        if !self.registry.contains(&observation.symbol) {
            tracing::debug!(
                symbol = %observation.symbol,
                source = observation.source.as_str(),
                "Dropping observation for untracked symbol"
            );
            metrics::record_untracked_observation();
            return None;
        }

        let event = self
            .detector
            .observe_tracked(observation, |symbol| self.registry.contains(symbol))
            .await?;
        Some(self.publisher.publish(&event))
    }

    /// Replace the registry with a fresh bootstrap result.
    ///
    /// Removed symbols are torn down: their cache entries are deleted and
    /// they are retired from every session watchlist.
    pub async fn apply_registry_refresh(&self, symbols: Vec<Symbol>) -> RegistryDiff {
        let diff = self.registry.replace(symbols);
        if diff.is_empty() {
            return diff;
        }

        for symbol in &diff.removed {
            self.detector.forget(symbol).await;
        }
        self.publisher.retire_symbols(&diff.removed);

        tracing::info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            tracked = self.registry.len(),
            "Symbol registry refreshed"
        );
        diff
    }
}

impl std::fmt::Debug for QuotePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotePipeline")
            .field("tracked_symbols", &self.registry.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;
    use crate::application::ports::{CacheError, QuoteStore};
    use crate::domain::quote::{ChangeEvent, ObservationSource, Quote};
    use crate::infrastructure::cache::MemoryQuoteStore;

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<ChangeEvent>>,
        retired: Mutex<Vec<Symbol>>,
    }

    impl ChangePublisher for RecordingPublisher {
        fn publish(&self, event: &ChangeEvent) -> PublishReport {
            self.events.lock().push(event.clone());
            PublishReport {
                matched: 1,
                delivered: 1,
                ..PublishReport::default()
            }
        }

        fn retire_symbols(&self, symbols: &[Symbol]) {
            self.retired.lock().extend_from_slice(symbols);
        }
    }

    fn pipeline(symbols: &[&str]) -> (QuotePipeline, Arc<RecordingPublisher>) {
        let registry = Arc::new(SymbolRegistry::from_symbols(
            symbols.iter().copied().map(Symbol::from),
        ));
        let detector = Arc::new(ChangeDetector::new(
            Arc::new(MemoryQuoteStore::new()),
            Duration::from_secs(10),
        ));
        let publisher = Arc::new(RecordingPublisher::default());
        let publisher_dyn: Arc<dyn ChangePublisher> = publisher.clone();
        (
            QuotePipeline::new(registry, detector, publisher_dyn, CancellationToken::new()),
            publisher,
        )
    }

    fn observation(symbol: &str, price: i64, source: ObservationSource) -> Observation {
        Observation::new(
            Symbol::from(symbol),
            Quote {
                price: Some(Decimal::from(price)),
                ..Quote::default()
            },
            source,
        )
    }

    #[tokio::test]
    async fn untracked_symbols_never_reach_publisher() {
        let (pipeline, publisher) = pipeline(&["AAPL"]);
        assert!(
            pipeline
                .process(observation("GME", 20, ObservationSource::Stream))
                .await
                .is_none()
        );
        assert!(publisher.events.lock().is_empty());
    }

    #[tokio::test]
    async fn merges_both_sources_and_dedups_across_them() {
        let (pipeline, publisher) = pipeline(&["TSLA", "AAPL"]);
        let (stream_tx, stream_rx) = mpsc::channel(8);
        let (poll_tx, poll_rx) = mpsc::channel(8);

        stream_tx
            .send(observation("TSLA", 250, ObservationSource::Stream))
            .await
            .unwrap();
        poll_tx
            .send(observation("AAPL", 190, ObservationSource::Poll))
            .await
            .unwrap();
        drop(stream_tx);
        drop(poll_tx);

        pipeline
            .run(ReceiverStream::new(stream_rx), ReceiverStream::new(poll_rx))
            .await;
        pipeline
            .process(observation("TSLA", 250, ObservationSource::Poll))
            .await;

        let events = publisher.events.lock();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.symbol.as_str() == "TSLA"));
        assert!(events.iter().any(|e| e.symbol.as_str() == "AAPL"));
    }

    #[tokio::test]
    async fn run_returns_on_cancel_with_open_sources() {
        let (pipeline, _) = pipeline(&["AAPL"]);
        let (_stream_tx, stream_rx) = mpsc::channel::<Observation>(1);
        let (_poll_tx, poll_rx) = mpsc::channel::<Observation>(1);
        pipeline.cancel.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            pipeline.run(ReceiverStream::new(stream_rx), ReceiverStream::new(poll_rx)),
        )
        .await
        .unwrap();
    }

    /// Store whose reads stall, widening the window between the registry
    /// check and the detector lock.
    struct SlowReadStore {
        inner: MemoryQuoteStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl QuoteStore for SlowReadStore {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_during_queued_observation_is_not_undone() {
        let store = Arc::new(SlowReadStore {
            inner: MemoryQuoteStore::new(),
            delay: Duration::from_millis(50),
        });
        let registry = Arc::new(SymbolRegistry::from_symbols([Symbol::from("BTC")]));
        let detector = Arc::new(ChangeDetector::new(
            Arc::clone(&store) as Arc<dyn QuoteStore>,
            Duration::from_secs(10),
        ));
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = Arc::new(QuotePipeline::new(
            registry,
            detector,
            Arc::clone(&publisher) as Arc<dyn ChangePublisher>,
            CancellationToken::new(),
        ));

        // First observation holds the BTC lock inside the slow read.
        let first = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move {
                pipeline
                    .process(observation("BTC", 60_000, ObservationSource::Stream))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Second passes the registry check and queues on the lock.
        let second = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move {
                pipeline
                    .process(observation("BTC", 60_100, ObservationSource::Poll))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Tear BTC down while the second observation is still waiting.
        let refresh = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.apply_registry_refresh(vec![Symbol::from("ETH")]).await }
        });

        assert!(first.await.unwrap().is_some());
        assert!(second.await.unwrap().is_none());
        assert_eq!(refresh.await.unwrap().removed, vec![Symbol::from("BTC")]);

        assert_eq!(publisher.events.lock().len(), 1);
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn refresh_tears_down_removed_symbols() {
        let (pipeline, publisher) = pipeline(&["AAPL", "BTC"]);
        pipeline
            .process(observation("BTC", 60_000, ObservationSource::Stream))
            .await;

        let diff = pipeline
            .apply_registry_refresh(vec![Symbol::from("AAPL"), Symbol::from("ETH")])
            .await;
        assert_eq!(diff.removed, vec![Symbol::from("BTC")]);
        assert_eq!(diff.added, vec![Symbol::from("ETH")]);
        assert_eq!(*publisher.retired.lock(), vec![Symbol::from("BTC")]);
        assert!(pipeline.detector.latest(&Symbol::from("BTC")).await.is_none());

        assert!(
            pipeline
                .process(observation("BTC", 61_000, ObservationSource::Stream))
                .await
                .is_none()
        );
        assert!(
            pipeline
                .process(observation("ETH", 3_000, ObservationSource::Poll))
                .await
                .is_some()
        );
    }
}
