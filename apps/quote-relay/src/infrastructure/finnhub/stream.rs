//! Trade Stream Client
//!
//! Maintains the single upstream WebSocket connection to Finnhub.
//!
//! # Stream URL
//!
//! `wss://ws.finnhub.io?token=<API_KEY>`
//!
//! # Protocol
//!
//! After connecting, one `{"type":"subscribe","symbol":S}` frame is sent per
//! registry symbol. Inbound `trade` frames become one observation per record
//! and are also relayed raw; `ping` frames are absorbed; unknown frame types
//! are ignored. Unparseable frames are logged and discarded without dropping
//! the connection.

use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, Liveness};
use super::messages::{ControlMessage, FinnhubMessage, TradeFrame};
use super::reconnect::{Backoff, BackoffConfig};
use crate::domain::quote::{Observation, Symbol};
use crate::domain::registry::SymbolRegistry;
use crate::infrastructure::config::RelayConfig;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the stream client.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The pipeline is no longer receiving observations.
    #[error("observation channel closed")]
    ChannelSend,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// Heartbeat timeout.
    #[error("no traffic within heartbeat timeout")]
    HeartbeatTimeout,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Events and Commands
// =============================================================================

/// Status and relay events emitted by the stream client.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Connected and subscriptions sent.
    Connected {
        /// Symbols subscribed on this connection.
        subscribed: usize,
    },
    /// Connection lost.
    Disconnected,
    /// Server closed the connection.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Waiting before the next attempt.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// Raw trade batch to relay to subscribers.
    Trades(TradeFrame),
    /// Error reported by the upstream.
    Error(String),
}

/// Subscription changes applied to the live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand {
    /// Start streaming these symbols.
    Subscribe(Vec<Symbol>),
    /// Stop streaming these symbols.
    Unsubscribe(Vec<Symbol>),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream client.
#[derive(Clone)]
pub struct StreamClientConfig {
    /// Full connection URL including the token.
    pub url: String,
    /// URL safe to log.
    pub display_url: String,
    /// Reconnection configuration.
    pub backoff: BackoffConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl StreamClientConfig {
    /// Build from the relay configuration.
    #[must_use]
    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            url: config.stream_url_with_token(),
            display_url: config.finnhub.ws_url.clone(),
            backoff: BackoffConfig::from(&config.stream),
            heartbeat: HeartbeatConfig::from(&config.stream),
        }
    }
}

impl std::fmt::Debug for StreamClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClientConfig")
            .field("url", &self.display_url)
            .field("backoff", &self.backoff)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// Finnhub trade stream client.
///
/// Manages the connection lifecycle including:
/// - Subscribing every registry symbol on each (re)connect
/// - Heartbeat monitoring
/// - Automatic reconnection with exponential backoff
/// - Live subscription changes from registry refreshes
pub struct StreamClient {
    config: StreamClientConfig,
    codec: JsonCodec,
    registry: Arc<SymbolRegistry>,
    observation_tx: mpsc::Sender<Observation>,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a new stream client.
    #[must_use]
    pub const fn new(
        config: StreamClientConfig,
        registry: Arc<SymbolRegistry>,
        observation_tx: mpsc::Sender<Observation>,
        event_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
            registry,
            observation_tx,
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop.
    ///
    /// Connects, processes frames and reconnects on failure until
    /// cancelled, until the attempt budget is spent or until the pipeline
    /// stops receiving observations.
    ///
    /// # Errors
    ///
    /// Returns an error when reconnection gives up or the observation
    /// channel is closed.
    pub async fn run(
        self: Arc<Self>,
        mut commands: mpsc::Receiver<StreamCommand>,
    ) -> Result<(), StreamClientError> {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Stream client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut backoff, &mut commands).await {
                Ok(()) => {
                    tracing::info!("Stream connection closed gracefully");
                    return Ok(());
                }
                Err(StreamClientError::ChannelSend) => {
                    tracing::warn!("Observation channel closed, stopping stream client");
                    return Err(StreamClientError::ChannelSend);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Stream connection error");
                    let _ = self.event_tx.send(StreamEvent::Disconnected).await;

                    let Some(delay) = backoff.next_delay() else {
                        return Err(StreamClientError::MaxReconnectAttemptsExceeded);
                    };
                    let attempt = backoff.attempts();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to trade stream"
                    );
                    metrics::record_stream_reconnect();
                    let _ = self.event_tx.send(StreamEvent::Reconnecting { attempt }).await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Stream client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect to the WebSocket and run until error or cancellation.
    async fn connect_and_run(
        &self,
        backoff: &mut Backoff,
        commands: &mut mpsc::Receiver<StreamCommand>,
    ) -> Result<(), StreamClientError> {
        tracing::info!(url = %self.config.display_url, "Connecting to trade stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        let symbols = self.registry.symbols();
        for symbol in &symbols {
            let json = self.codec.encode_control(&ControlMessage::subscribe(symbol))?;
            write.send(Message::Text(json.into())).await?;
        }

        backoff.reset();
        tracing::info!(symbols = symbols.len(), "Trade stream connected");
        let _ = self
            .event_tx
            .send(StreamEvent::Connected {
                subscribed: symbols.len(),
            })
            .await;

        let liveness = Arc::new(Liveness::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = self.cancel.child_token();
        tokio::spawn(
            HeartbeatMonitor::new(
                self.config.heartbeat.clone(),
                Arc::clone(&liveness),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let _heartbeat_guard = heartbeat_cancel.drop_guard();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(command) = commands.recv() => {
                    self.apply_command(&mut write, command).await?;
                }
                heartbeat_event = heartbeat_rx.recv() => {
                    if heartbeat_ping_due(heartbeat_event)? {
                        write.send(Message::Ping(Vec::new().into())).await?;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            liveness.touch();
                            self.handle_text_message(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            liveness.touch();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame.map_or((1005, String::new()), |f| {
                                (u16::from(f.code), f.reason.to_string())
                            });
                            tracing::warn!(code, reason = %reason, "Trade stream closed by server");
                            let _ = self.event_tx.send(StreamEvent::Closed { code, reason }).await;
                            return Err(StreamClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            liveness.touch();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Trade stream ended");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn apply_command<W>(
        &self,
        write: &mut W,
        command: StreamCommand,
    ) -> Result<(), StreamClientError>
    where
        W: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let frames: Vec<ControlMessage> = match &command {
            StreamCommand::Subscribe(symbols) => {
                symbols.iter().map(ControlMessage::subscribe).collect()
            }
            StreamCommand::Unsubscribe(symbols) => {
                symbols.iter().map(ControlMessage::unsubscribe).collect()
            }
        };
        tracing::info!(command = ?command, "Updating stream subscriptions");
        for frame in &frames {
            let json = self.codec.encode_control(frame)?;
            write.send(Message::Text(json.into())).await?;
        }
        Ok(())
    }

    /// Handle a text frame from the WebSocket.
    async fn handle_text_message(&self, text: &str) -> Result<(), StreamClientError> {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                let preview: String = text.chars().take(120).collect();
                tracing::warn!(error = %e, frame = %preview, "Discarding unparseable frame");
                metrics::record_parse_error();
                return Ok(());
            }
        };

        match message {
            FinnhubMessage::Trade(frame) => {
                metrics::record_trade_frame(frame.data.len());
                for observation in frame.observations() {
                    self.observation_tx
                        .send(observation)
                        .await
                        .map_err(|_| StreamClientError::ChannelSend)?;
                }
                let _ = self.event_tx.send(StreamEvent::Trades(frame)).await;
            }
            FinnhubMessage::Ping => {
                tracing::trace!("Stream keepalive");
            }
            FinnhubMessage::Error(error) => {
                tracing::error!(msg = %error.msg, "Trade stream error");
                let _ = self.event_tx.send(StreamEvent::Error(error.msg)).await;
            }
            FinnhubMessage::Other(kind) => {
                tracing::debug!(kind = %kind, "Ignoring frame");
            }
        }

        Ok(())
    }
}

/// Whether a ping should go out for this heartbeat event.
///
/// A closed heartbeat channel means the monitor stopped, so the connection
/// is treated as dead.
fn heartbeat_ping_due(event: Option<HeartbeatEvent>) -> Result<bool, StreamClientError> {
    match event {
        Some(HeartbeatEvent::SendPing) => Ok(true),
        Some(HeartbeatEvent::Timeout) => Err(StreamClientError::HeartbeatTimeout),
        None => {
            tracing::warn!("Heartbeat monitor stopped, dropping connection");
            Err(StreamClientError::HeartbeatTimeout)
        }
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
