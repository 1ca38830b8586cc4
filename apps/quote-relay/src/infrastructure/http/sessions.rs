//! Subscriber WebSocket sessions.
//!
//! Each socket is one hub session. `/ws/quotes` starts unfiltered;
//! `/ws/watchlist?user=` starts restricted to the user's stored watchlist
//! and first receives the cached quotes for it, in display order.
//!
//! # Wire Format (JSON)
//!
//! Outbound:
//! ```json
//! {"event": "quoteUpdate", "symbol": "AAPL", "price": 189.84, "timestamp": 1700000000000}
//! {"event": "stockData", "type": "trade", "data": [{"s": "AAPL", "p": 189.84, "t": 1700000000123}]}
//! ```
//!
//! Inbound:
//! ```json
//! {"action": "setWatchlist", "symbols": ["AAPL", "BINANCE:BTCUSDT"]}
//! ```

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::application::ports::WatchlistError;
use crate::domain::quote::{ChangeEvent, QuoteUpdate, Symbol, display_order};
use crate::domain::subscription::{SessionFilter, SessionId};
use crate::infrastructure::broadcast::HubMessage;
use crate::infrastructure::finnhub::messages::TradeFrame;

// =============================================================================
// Frames
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum OutboundFrame<'a> {
    QuoteUpdate(QuoteUpdate),
    StockData(&'a TradeFrame),
    Error { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum ClientMessage {
    SetWatchlist { symbols: Vec<String> },
}

#[derive(Debug, Deserialize)]
pub(super) struct WatchlistQuery {
    user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionMode {
    All,
    Watchlist,
}

#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("socket closed: {0}")]
    Socket(#[from] axum::Error),
}

// =============================================================================
// Upgrade Handlers
// =============================================================================

pub(super) async fn quotes_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state, SessionMode::All, Vec::new()))
}

pub(super) async fn watchlist_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WatchlistQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let watchlist = match state.watchlists.watchlist(&query.user).await {
        Ok(symbols) => symbols.into_iter().collect::<Vec<_>>(),
        Err(WatchlistError::Invalid(message)) => {
            return (StatusCode::BAD_REQUEST, message).into_response();
        }
        Err(e) => {
            tracing::warn!(user = %query.user, error = %e, "Watchlist lookup failed");
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };

    tracing::debug!(user = %query.user, symbols = watchlist.len(), "Watchlist session requested");
    ws.on_upgrade(move |socket| run_session(socket, state, SessionMode::Watchlist, watchlist))
}

// =============================================================================
// Session Loop
// =============================================================================

async fn run_session(
    socket: WebSocket,
    state: Arc<AppState>,
    mode: SessionMode,
    watchlist: Vec<Symbol>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut session = match mode {
        SessionMode::All => state.hub.register_session(),
        SessionMode::Watchlist => state
            .hub
            .register_with(SessionFilter::restricted(watchlist.iter().cloned())),
    };
    let id = session.id();
    tracing::info!(session_id = id, mode = ?mode, "Subscriber connected");

    let snapshot_sent = if mode == SessionMode::Watchlist {
        send_snapshot(&state, &watchlist, &mut ws_tx).await
    } else {
        Ok(())
    };

    if snapshot_sent.is_ok() {
        loop {
            tokio::select! {
                () = state.cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                message = session.recv() => {
                    let Some(message) = message else { break };
                    let frame = match &message {
                        HubMessage::Quote(event) => OutboundFrame::QuoteUpdate(QuoteUpdate::from(event.as_ref())),
                        HubMessage::StockData(frame) => OutboundFrame::StockData(frame),
                    };
                    if let Err(e) = send_frame(&mut ws_tx, &frame).await {
                        tracing::debug!(session_id = id, error = %e, "Subscriber send failed");
                        break;
                    }
                }
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_text(&state, id, mode, text.as_str(), &mut ws_tx).await {
                            tracing::debug!(session_id = id, error = %e, "Subscriber send failed");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(session_id = id, error = %e, "Subscriber socket error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister_session(id);
    tracing::info!(session_id = id, "Subscriber disconnected");
}

async fn handle_client_text<S>(
    state: &AppState,
    id: SessionId,
    mode: SessionMode,
    text: &str,
    sink: &mut S,
) -> Result<(), SendError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(session_id = id, error = %e, "Ignoring malformed client message");
            let frame = OutboundFrame::Error {
                message: format!("invalid message: {e}"),
            };
            return send_frame(sink, &frame).await;
        }
    };

    match message {
        ClientMessage::SetWatchlist { symbols } => {
            let symbols: Vec<Symbol> = symbols
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(Symbol::new)
                .collect();
            tracing::debug!(session_id = id, symbols = symbols.len(), "Session watchlist replaced");

            match mode {
                SessionMode::All => {
                    state.hub.set_filter(id, symbols);
                    Ok(())
                }
                SessionMode::Watchlist => {
                    state.hub.restrict_to(id, symbols.iter().cloned());
                    send_snapshot(state, &symbols, sink).await
                }
            }
        }
    }
}

/// Send the cached quotes of a watchlist, in display order.
async fn send_snapshot<S>(state: &AppState, watchlist: &[Symbol], sink: &mut S) -> Result<(), SendError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let mut cached = Vec::with_capacity(watchlist.len());
    for symbol in watchlist {
        if let Some(quote) = state.detector.latest(symbol).await {
            cached.push(ChangeEvent {
                symbol: symbol.clone(),
                quote,
            });
        }
    }
    cached.sort_by(|a, b| display_order((&a.symbol, &a.quote), (&b.symbol, &b.quote)));

    for event in &cached {
        send_frame(sink, &OutboundFrame::QuoteUpdate(QuoteUpdate::from(event))).await?;
    }
    Ok(())
}

async fn send_frame<S>(sink: &mut S, frame: &OutboundFrame<'_>) -> Result<(), SendError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let json = serde_json::to_string(frame)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::super::{HttpServer, test_support};
    use super::*;
    use crate::application::ports::ChangePublisher;
    use crate::domain::quote::{Observation, ObservationSource, Quote};
    use crate::infrastructure::watchlist::InMemoryWatchlistStore;

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn serve(state: Arc<AppState>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = HttpServer::new(addr.port(), state, tokio_util::sync::CancellationToken::new());
        tokio::spawn(server.serve(listener));
        format!("ws://{addr}")
    }

    async fn next_json(client: &mut Client) -> serde_json::Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), client.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let WsMessage::Text(text) = message {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn wait_for_sessions(state: &AppState, count: usize) {
        for _ in 0..100 {
            if state.hub.session_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} sessions");
    }

    fn event(symbol: &str, price: &str) -> ChangeEvent {
        ChangeEvent {
            symbol: Symbol::from(symbol),
            quote: Quote::from_trade(price.parse().unwrap(), None),
        }
    }

    #[test]
    fn outbound_frames_are_tagged_by_event() {
        let json = serde_json::to_value(OutboundFrame::QuoteUpdate(QuoteUpdate::from(&event(
            "AAPL", "10",
        ))))
        .unwrap();
        assert_eq!(json["event"], "quoteUpdate");
        assert_eq!(json["symbol"], "AAPL");

        let frame = TradeFrame {
            msg_type: "trade".to_string(),
            data: Vec::new(),
        };
        let json = serde_json::to_value(OutboundFrame::StockData(&frame)).unwrap();
        assert_eq!(json["event"], "stockData");
        assert_eq!(json["type"], "trade");
    }

    #[test]
    fn client_message_parses_set_watchlist() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"action":"setWatchlist","symbols":["AAPL"]}"#).unwrap();
        let ClientMessage::SetWatchlist { symbols } = message;
        assert_eq!(symbols, ["AAPL"]);
    }

    #[tokio::test]
    async fn quotes_stream_receives_every_change() {
        let state = test_support::state(&["AAPL"], InMemoryWatchlistStore::new());
        let url = serve(Arc::clone(&state)).await;
        let (mut client, _) = tokio_tungstenite::connect_async(format!("{url}/ws/quotes"))
            .await
            .unwrap();
        wait_for_sessions(&state, 1).await;

        state.hub.publish(&event("MSFT", "420"));
        let json = next_json(&mut client).await;
        assert_eq!(json["event"], "quoteUpdate");
        assert_eq!(json["symbol"], "MSFT");
        assert_eq!(json["price"], 420.0);
    }

    #[tokio::test]
    async fn watchlist_stream_sends_snapshot_then_filtered_updates() {
        let watchlists = InMemoryWatchlistStore::new();
        watchlists.set_watchlist("alice", [Symbol::from("BINANCE:BTCUSDT"), Symbol::from("AAPL")]);
        let state = test_support::state(&["AAPL", "MSFT", "BINANCE:BTCUSDT"], watchlists);

        for (symbol, price) in [("BINANCE:BTCUSDT", "43000"), ("AAPL", "190"), ("MSFT", "420")] {
            state
                .detector
                .observe(Observation::new(
                    Symbol::from(symbol),
                    Quote::from_trade(price.parse().unwrap(), None),
                    ObservationSource::Poll,
                ))
                .await;
        }

        let url = serve(Arc::clone(&state)).await;
        let (mut client, _) =
            tokio_tungstenite::connect_async(format!("{url}/ws/watchlist?user=alice"))
                .await
                .unwrap();

        // Stocks are listed before cryptos.
        assert_eq!(next_json(&mut client).await["symbol"], "AAPL");
        assert_eq!(next_json(&mut client).await["symbol"], "BINANCE:BTCUSDT");

        wait_for_sessions(&state, 1).await;
        state.hub.publish(&event("MSFT", "421"));
        state.hub.publish(&event("AAPL", "191"));
        let json = next_json(&mut client).await;
        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["price"], 191.0);
    }

    #[tokio::test]
    async fn set_watchlist_replaces_filter() {
        let state = test_support::state(&["AAPL", "MSFT"], InMemoryWatchlistStore::new());
        let url = serve(Arc::clone(&state)).await;
        let (mut client, _) =
            tokio_tungstenite::connect_async(format!("{url}/ws/watchlist?user=bob"))
                .await
                .unwrap();
        wait_for_sessions(&state, 1).await;

        client
            .send(WsMessage::Text(
                r#"{"action":"setWatchlist","symbols":["MSFT"]}"#.into(),
            ))
            .await
            .unwrap();
        for _ in 0..100 {
            if state.hub.stats().filtered == 1 && state.hub.publish(&event("MSFT", "1")).matched == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        state.hub.publish(&event("AAPL", "2"));
        state.hub.publish(&event("MSFT", "3"));
        loop {
            let json = next_json(&mut client).await;
            assert_eq!(json["symbol"], "MSFT");
            if json["price"] == 3.0 {
                break;
            }
        }
    }

    #[tokio::test]
    async fn malformed_client_message_gets_error_frame() {
        let state = test_support::state(&[], InMemoryWatchlistStore::new());
        let url = serve(Arc::clone(&state)).await;
        let (mut client, _) = tokio_tungstenite::connect_async(format!("{url}/ws/quotes"))
            .await
            .unwrap();

        client.send(WsMessage::Text("nonsense".into())).await.unwrap();
        let json = next_json(&mut client).await;
        assert_eq!(json["event"], "error");
    }

    #[tokio::test]
    async fn closing_the_socket_unregisters_the_session() {
        let state = test_support::state(&[], InMemoryWatchlistStore::new());
        let url = serve(Arc::clone(&state)).await;
        let (mut client, _) = tokio_tungstenite::connect_async(format!("{url}/ws/quotes"))
            .await
            .unwrap();
        wait_for_sessions(&state, 1).await;

        client.close(None).await.unwrap();
        wait_for_sessions(&state, 0).await;
    }
}
