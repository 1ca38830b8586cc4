//! Quote Pipeline Integration Tests
//!
//! Drives observations through merge, dedup, cache and fan-out using the
//! in-process cache store and the real broadcast hub.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quote_relay::application::services::cache_key;
use quote_relay::infrastructure::config::ApiKey;
use quote_relay::infrastructure::finnhub::FinnhubRestClient;
use quote_relay::{
    BroadcastHub, ChangeDetector, ChangePublisher, HubMessage, MemoryQuoteStore, Observation,
    ObservationSource, PollingConfig, Quote, QuotePipeline, QuotePoller, QuoteStore, SessionHandle,
    SourceState, Symbol, SymbolRegistry,
};

struct Relay {
    registry: Arc<SymbolRegistry>,
    store: Arc<MemoryQuoteStore>,
    hub: Arc<BroadcastHub>,
    pipeline: Arc<QuotePipeline>,
    cancel: CancellationToken,
}

fn relay(symbols: &[&str]) -> Relay {
    let registry = Arc::new(SymbolRegistry::from_symbols(
        symbols.iter().copied().map(Symbol::from),
    ));
    let store = Arc::new(MemoryQuoteStore::new());
    let detector = Arc::new(ChangeDetector::new(
        Arc::clone(&store) as Arc<dyn QuoteStore>,
        Duration::from_secs(10),
    ));
    let hub = Arc::new(BroadcastHub::default());
    let cancel = CancellationToken::new();
    let pipeline = Arc::new(QuotePipeline::new(
        Arc::clone(&registry),
        detector,
        Arc::clone(&hub) as Arc<dyn ChangePublisher>,
        cancel.clone(),
    ));
    Relay {
        registry,
        store,
        hub,
        pipeline,
        cancel,
    }
}

fn quote(price: &str) -> Quote {
    Quote::from_trade(price.parse().unwrap(), None)
}

async fn next_quote(session: &mut SessionHandle) -> (String, Quote) {
    let message = tokio::time::timeout(Duration::from_secs(2), session.recv())
        .await
        .expect("timed out waiting for a quote")
        .expect("session closed");
    match message {
        HubMessage::Quote(event) => (event.symbol.to_string(), event.quote.clone()),
        HubMessage::StockData(_) => panic!("unexpected trade frame"),
    }
}

#[tokio::test]
async fn duplicate_from_second_source_is_suppressed() {
    let relay = relay(&["TSLA"]);
    let mut session = relay.hub.register_session();

    let (stream_tx, stream_rx) = mpsc::channel(8);
    let (poll_tx, poll_rx) = mpsc::channel(8);
    let pipeline = Arc::clone(&relay.pipeline);
    tokio::spawn(async move {
        pipeline
            .run(ReceiverStream::new(stream_rx), ReceiverStream::new(poll_rx))
            .await;
    });

    let tsla = Symbol::from("TSLA");
    stream_tx
        .send(Observation::new(tsla.clone(), quote("250.10"), ObservationSource::Stream))
        .await
        .unwrap();
    let (symbol, received) = next_quote(&mut session).await;
    assert_eq!(symbol, "TSLA");
    assert_eq!(received, quote("250.10"));

    let cached = relay.store.get(&cache_key(&tsla)).await.unwrap().unwrap();
    let cached: Quote = serde_json::from_str(&cached).unwrap();
    assert_eq!(cached, quote("250.10"));

    // Same quote again from polling, then a real change.
    poll_tx
        .send(Observation::new(tsla.clone(), quote("250.10"), ObservationSource::Poll))
        .await
        .unwrap();
    poll_tx
        .send(Observation::new(tsla.clone(), quote("251.00"), ObservationSource::Poll))
        .await
        .unwrap();

    let (_, received) = next_quote(&mut session).await;
    assert_eq!(received, quote("251.00"));
    relay.cancel.cancel();
}

#[tokio::test]
async fn full_quote_repeated_from_polling_is_suppressed() {
    let relay = relay(&["TSLA"]);
    let mut session = relay.hub.register_session();
    let tsla = Symbol::from("TSLA");

    let streamed = Quote {
        price: Some("250.10".parse().unwrap()),
        change: Some("0".parse().unwrap()),
        change_percent: Some("0".parse().unwrap()),
        open: Some("248".parse().unwrap()),
        high: Some("252".parse().unwrap()),
        low: Some("247".parse().unwrap()),
        previous_close: Some("248".parse().unwrap()),
        timestamp: None,
    };
    let polled = Quote {
        change: None,
        change_percent: None,
        ..streamed.clone()
    };

    relay
        .pipeline
        .process(Observation::new(tsla.clone(), streamed.clone(), ObservationSource::Stream))
        .await
        .unwrap();
    let (_, received) = next_quote(&mut session).await;
    assert_eq!(received.low, streamed.low);

    let report = relay
        .pipeline
        .process(Observation::new(tsla.clone(), polled, ObservationSource::Poll))
        .await;
    assert!(report.is_none());
    assert!(session.try_recv().is_none());

    let cached = relay.store.get(&cache_key(&tsla)).await.unwrap().unwrap();
    let cached: Quote = serde_json::from_str(&cached).unwrap();
    assert_eq!(cached, streamed);
}

#[tokio::test]
async fn untracked_symbols_are_dropped() {
    let relay = relay(&["AAPL"]);
    let mut session = relay.hub.register_session();

    let report = relay
        .pipeline
        .process(Observation::new(
            Symbol::from("GME"),
            quote("20"),
            ObservationSource::Stream,
        ))
        .await;
    assert!(report.is_none());
    assert!(session.try_recv().is_none());
    assert!(relay.store.is_empty());
}

#[tokio::test]
async fn registry_shrink_tears_down_symbol() {
    let relay = relay(&["BINANCE:BTCUSDT", "BINANCE:ETHUSDT"]);
    let btc = Symbol::from("BINANCE:BTCUSDT");
    let mut session = relay.hub.register_session();
    relay.hub.set_filter(session.id(), [btc.clone()]);

    relay
        .pipeline
        .process(Observation::new(btc.clone(), quote("43000"), ObservationSource::Stream))
        .await
        .unwrap();
    assert!(session.try_recv().is_some());

    let diff = relay
        .pipeline
        .apply_registry_refresh(vec![Symbol::from("BINANCE:ETHUSDT"), Symbol::from("BINANCE:SOLUSDT")])
        .await;
    assert_eq!(diff.removed, vec![btc.clone()]);
    assert_eq!(diff.added, vec![Symbol::from("BINANCE:SOLUSDT")]);

    assert!(!relay.registry.contains(&btc));
    assert!(relay.store.get(&cache_key(&btc)).await.unwrap().is_none());

    // Further observations are dropped and the emptied watchlist stays filtered.
    let report = relay
        .pipeline
        .process(Observation::new(btc, quote("43001"), ObservationSource::Poll))
        .await;
    assert!(report.is_none());

    relay
        .pipeline
        .process(Observation::new(
            Symbol::from("BINANCE:SOLUSDT"),
            quote("100"),
            ObservationSource::Poll,
        ))
        .await
        .unwrap();
    assert!(session.try_recv().is_none());
    assert_eq!(relay.hub.stats().filtered, 1);
}

#[tokio::test]
async fn polling_fallback_publishes_once_per_change() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .and(query_param("symbol", "AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "c": 189.84, "d": 1.2, "dp": 0.64, "h": 190.1, "l": 187.5,
            "o": 188.0, "pc": 188.64, "t": 1_700_000_000
        })))
        .mount(&server)
        .await;

    let relay = relay(&["AAPL"]);
    let mut session = relay.hub.register_session();
    let api = Arc::new(
        FinnhubRestClient::new(
            &server.uri(),
            ApiKey::new("test-key".to_string()),
            Duration::from_secs(1),
        )
        .unwrap(),
    );

    let poll_state = Arc::new(SourceState::new(ObservationSource::Poll));
    let (poll_tx, poll_rx) = mpsc::channel(8);
    let (_stream_tx, stream_rx) = mpsc::channel::<Observation>(8);
    let poller = QuotePoller::new(
        api,
        Arc::clone(&relay.registry),
        PollingConfig {
            interval: Duration::from_millis(20),
            request_timeout: Duration::from_secs(1),
        },
        poll_tx,
        Arc::clone(&poll_state),
        relay.cancel.clone(),
    );
    tokio::spawn(poller.run());

    let pipeline = Arc::clone(&relay.pipeline);
    tokio::spawn(async move {
        pipeline
            .run(ReceiverStream::new(stream_rx), ReceiverStream::new(poll_rx))
            .await;
    });

    let (symbol, received) = next_quote(&mut session).await;
    assert_eq!(symbol, "AAPL");
    assert_eq!(received.price, Some("189.84".parse().unwrap()));
    assert_eq!(received.previous_close, Some("188.64".parse().unwrap()));

    for _ in 0..200 {
        if server.received_requests().await.unwrap().len() >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Let the last cycle drain through the pipeline.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(session.try_recv().is_none());
    assert!(poll_state.is_connected());
    relay.cancel.cancel();
}
