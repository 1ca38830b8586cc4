//! Quote Relay Binary
//!
//! Starts the live quote relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FINNHUB_API_KEY`: Finnhub API key
//!
//! ## Optional
//! - `FINNHUB_WS_URL`, `FINNHUB_API_URL`: Upstream endpoints
//! - `REDIS_URL`: Shared quote cache (default: in-process)
//! - `QUOTE_CACHE_TTL_SECS`: Cache entry lifetime (default: 10)
//! - `POLL_INTERVAL_MS`, `POLL_REQUEST_TIMEOUT_MS`: Polling fallback (default: 3000 / 5000)
//! - `SYMBOLS_PER_CLASS`: Stocks and cryptos tracked (default: 5 each)
//! - `WATCHLIST_FILE`: JSON map of user ids to symbols
//! - `PORT`: HTTP and subscriber WebSocket port (default: 8000)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::{Duration, Instant};

use quote_relay::application::ports::{SymbolSource, WatchlistStore};
use quote_relay::domain::registry::SymbolRegistry;
use quote_relay::domain::streaming::{ConnectionState, SourceState};
use quote_relay::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
use quote_relay::infrastructure::cache;
use quote_relay::infrastructure::finnhub::{
    FinnhubRestClient, FinnhubSymbolSource, StreamClient, StreamClientConfig, StreamCommand,
    StreamEvent,
};
use quote_relay::infrastructure::http::{AppState, HttpServer};
use quote_relay::infrastructure::telemetry;
use quote_relay::infrastructure::watchlist::InMemoryWatchlistStore;
use quote_relay::{
    ChangeDetector, ObservationSource, PollingConfig, QuotePipeline, QuotePoller, RelayConfig,
    init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Observation channel capacity per source.
const OBSERVATION_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err("failed to install rustls crypto provider".into());
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Quote Relay");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Symbol bootstrap
    let rest_client = Arc::new(FinnhubRestClient::new(
        &config.finnhub.api_url,
        config.finnhub.api_key.clone(),
        config.polling.request_timeout,
    )?);
    let symbol_source = Arc::new(FinnhubSymbolSource::new(
        Arc::clone(&rest_client),
        config.bootstrap.clone(),
    ));
    let symbols = symbol_source.load_symbols().await?;
    let registry = Arc::new(SymbolRegistry::from_symbols(symbols));
    tracing::info!(
        tracked = registry.len(),
        stocks = registry.stocks().len(),
        cryptos = registry.cryptos().len(),
        "Symbol registry ready"
    );

    // Core services
    let store = cache::build_store(&config.cache, &shutdown_token).await;
    let detector = Arc::new(ChangeDetector::new(store, config.cache.ttl));
    let hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(&config.broadcast)));
    let watchlists: Arc<dyn WatchlistStore> = match &config.watchlist_file {
        Some(path) => Arc::new(InMemoryWatchlistStore::from_json_file(path).await?),
        None => Arc::new(InMemoryWatchlistStore::new()),
    };

    let stream_state = Arc::new(SourceState::new(ObservationSource::Stream));
    let poll_state = Arc::new(SourceState::new(ObservationSource::Poll));

    // Observation sources
    let (stream_obs_tx, stream_obs_rx) = mpsc::channel(OBSERVATION_BUFFER);
    let (poll_obs_tx, poll_obs_rx) = mpsc::channel(OBSERVATION_BUFFER);
    let (stream_event_tx, stream_event_rx) = mpsc::channel::<StreamEvent>(OBSERVATION_BUFFER);
    let (command_tx, command_rx) = mpsc::channel::<StreamCommand>(16);

    let stream_client = Arc::new(StreamClient::new(
        StreamClientConfig::from_relay_config(&config),
        Arc::clone(&registry),
        stream_obs_tx,
        stream_event_tx,
        shutdown_token.clone(),
    ));

    let poller = QuotePoller::new(
        rest_client,
        Arc::clone(&registry),
        PollingConfig {
            interval: config.polling.interval,
            request_timeout: config.polling.request_timeout,
        },
        poll_obs_tx,
        Arc::clone(&poll_state),
        shutdown_token.clone(),
    );

    let pipeline = Arc::new(QuotePipeline::new(
        Arc::clone(&registry),
        Arc::clone(&detector),
        Arc::clone(&hub) as _,
        shutdown_token.clone(),
    ));

    // Spawn stream event handler
    let event_hub = Arc::clone(&hub);
    let event_state = Arc::clone(&stream_state);
    tokio::spawn(async move {
        handle_stream_events(stream_event_rx, event_hub, event_state).await;
    });

    // Spawn stream client
    tokio::spawn(async move {
        if let Err(e) = stream_client.run(command_rx).await {
            tracing::error!(error = %e, "Stream client stopped, continuing on polling");
        }
    });

    // Spawn poller
    tokio::spawn(poller.run());

    // Spawn pipeline
    let pipeline_task = Arc::clone(&pipeline);
    tokio::spawn(async move {
        pipeline_task
            .run(
                ReceiverStream::new(stream_obs_rx),
                ReceiverStream::new(poll_obs_rx),
            )
            .await;
    });

    // Spawn periodic symbol refresh
    tokio::spawn(refresh_symbols(
        symbol_source,
        Arc::clone(&pipeline),
        command_tx,
        config.bootstrap.max_age,
        shutdown_token.clone(),
    ));

    // Spawn HTTP server
    let app_state = Arc::new(AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: Instant::now(),
        hub,
        registry,
        detector,
        watchlists,
        stream_state,
        poll_state,
        cancel: shutdown_token.clone(),
    });
    let http_server = HttpServer::new(config.server.port, app_state, shutdown_token.clone());
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Quote relay ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, http_task).await.is_err() {
        tracing::warn!("HTTP server did not stop within the shutdown timeout");
    }

    tracing::info!("Quote relay stopped");
    Ok(())
}

/// Handle status and relay events from the stream client.
async fn handle_stream_events(
    mut rx: mpsc::Receiver<StreamEvent>,
    hub: Arc<BroadcastHub>,
    state: Arc<SourceState>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Connected { subscribed } => {
                state.set_state(ConnectionState::Connected);
                state.set_tracked_symbols(subscribed);
                tracing::info!(subscribed, "Trade stream connected");
            }
            StreamEvent::Disconnected => {
                state.set_state(ConnectionState::Disconnected);
                tracing::warn!("Trade stream disconnected, relying on polling");
            }
            StreamEvent::Closed { code, reason } => {
                tracing::warn!(code, reason = %reason, "Trade stream closed by server");
            }
            StreamEvent::Reconnecting { attempt } => {
                state.record_reconnect();
                tracing::info!(attempt, "Trade stream reconnecting");
            }
            StreamEvent::Trades(frame) => {
                state.record_messages(frame.data.len() as u64);
                hub.relay_trades(frame);
            }
            StreamEvent::Error(msg) => {
                state.set_error(msg.clone());
                tracing::error!(error = %msg, "Trade stream error");
            }
        }
    }
}

/// Reload the symbol listings whenever they are due and apply the result.
async fn refresh_symbols(
    source: Arc<FinnhubSymbolSource>,
    pipeline: Arc<QuotePipeline>,
    commands: mpsc::Sender<StreamCommand>,
    every: Duration,
    cancel: CancellationToken,
) {
    let every = every.max(Duration::from_secs(60));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let symbols = match source.load_symbols().await {
            Ok(symbols) => symbols,
            Err(e) => {
                tracing::warn!(error = %e, "Symbol refresh failed, keeping current registry");
                continue;
            }
        };

        let diff = pipeline.apply_registry_refresh(symbols).await;
        if !diff.removed.is_empty() {
            let _ = commands.send(StreamCommand::Unsubscribe(diff.removed)).await;
        }
        if !diff.added.is_empty() {
            let _ = commands.send(StreamCommand::Subscribe(diff.added)).await;
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        port = config.server.port,
        redis = config.cache.redis_url.is_some(),
        cache_ttl_secs = config.cache.ttl.as_secs(),
        poll_interval_ms = config.polling.interval.as_millis(),
        symbols_per_class = config.bootstrap.per_class,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.finnhub.ws_url,
        api_url = %config.finnhub.api_url,
        "Upstream endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
