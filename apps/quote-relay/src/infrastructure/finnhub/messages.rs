//! Finnhub Message Types
//!
//! Wire types for the Finnhub trade stream and REST API. Every inbound
//! stream frame is a JSON object discriminated by its `type` field.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::{Observation, ObservationSource, Quote, Symbol};

// =============================================================================
// Stream: Outbound
// =============================================================================

/// Subscription action on the trade stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Start receiving trades for a symbol.
    Subscribe,
    /// Stop receiving trades for a symbol.
    Unsubscribe,
}

/// Per-symbol control frame.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "subscribe", "symbol": "BINANCE:BTCUSDT"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlMessage {
    /// Action to perform.
    #[serde(rename = "type")]
    pub action: ControlAction,
    /// Target symbol.
    pub symbol: String,
}

impl ControlMessage {
    /// Subscribe frame for a symbol.
    #[must_use]
    pub fn subscribe(symbol: &Symbol) -> Self {
        Self {
            action: ControlAction::Subscribe,
            symbol: symbol.to_string(),
        }
    }

    /// Unsubscribe frame for a symbol.
    #[must_use]
    pub fn unsubscribe(symbol: &Symbol) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            symbol: symbol.to_string(),
        }
    }
}

// =============================================================================
// Stream: Inbound
// =============================================================================

/// One executed trade.
///
/// # Wire Format (JSON)
/// ```json
/// {"s": "AAPL", "p": 189.84, "v": 100, "t": 1700000000123, "c": ["1", "12"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Trade price.
    #[serde(rename = "p", with = "rust_decimal::serde::float")]
    pub price: Decimal,

    /// Trade volume.
    #[serde(
        rename = "v",
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub volume: Option<Decimal>,

    /// Trade time in unix milliseconds.
    #[serde(rename = "t")]
    pub timestamp_ms: i64,

    /// Trade condition codes.
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
}

impl TradeRecord {
    /// Trade time, if representable.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    /// Normalize into a streaming observation.
    #[must_use]
    pub fn to_observation(&self) -> Observation {
        Observation::new(
            Symbol::new(self.symbol.clone()),
            Quote::from_trade(self.price, self.timestamp()),
            ObservationSource::Stream,
        )
    }
}

/// A batch of trades, relayed verbatim to subscribers as `stockData`.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "trade", "data": [{"s": "AAPL", "p": 189.84, "v": 100, "t": 1700000000123}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFrame {
    /// Frame type (always "trade").
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Trades in the batch.
    #[serde(default)]
    pub data: Vec<TradeRecord>,
}

impl TradeFrame {
    /// Normalize every record into an observation.
    #[must_use]
    pub fn observations(&self) -> Vec<Observation> {
        self.data.iter().map(TradeRecord::to_observation).collect()
    }
}

/// Error frame sent by the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Error description.
    #[serde(default)]
    pub msg: String,
}

/// Decoded inbound stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinnhubMessage {
    /// Trade batch.
    Trade(TradeFrame),
    /// Application-level keepalive.
    Ping,
    /// Error reported by the upstream.
    Error(ErrorFrame),
    /// Any other frame type.
    Other(String),
}

// =============================================================================
// REST
// =============================================================================

/// Response of `GET /quote?symbol=`.
///
/// # Wire Format (JSON)
/// ```json
/// {"c": 189.84, "d": 1.2, "dp": 0.64, "h": 190.1, "l": 187.5, "o": 188, "pc": 188.64, "t": 1700000000}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QuoteResponse {
    /// Current price.
    #[serde(rename = "c", default)]
    pub current: Option<Decimal>,
    /// Change.
    #[serde(rename = "d", default)]
    pub change: Option<Decimal>,
    /// Percent change.
    #[serde(rename = "dp", default)]
    pub change_percent: Option<Decimal>,
    /// High of the day.
    #[serde(rename = "h", default)]
    pub high: Option<Decimal>,
    /// Low of the day.
    #[serde(rename = "l", default)]
    pub low: Option<Decimal>,
    /// Open of the day.
    #[serde(rename = "o", default)]
    pub open: Option<Decimal>,
    /// Previous close.
    #[serde(rename = "pc", default)]
    pub previous_close: Option<Decimal>,
    /// Quote time in unix seconds.
    #[serde(rename = "t", default)]
    pub timestamp: Option<i64>,
}

impl From<QuoteResponse> for Quote {
    fn from(response: QuoteResponse) -> Self {
        Self {
            price: response.current,
            change: response.change,
            change_percent: response.change_percent,
            open: response.open,
            high: response.high,
            low: response.low,
            previous_close: response.previous_close,
            timestamp: response
                .timestamp
                .filter(|secs| *secs > 0)
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }
}

/// One entry of a symbol listing (`/stock/symbol`, `/crypto/symbol`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    /// Identifier used for subscriptions and quotes.
    pub symbol: String,

    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Display form of the symbol.
    #[serde(
        rename = "displaySymbol",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub display_symbol: Option<String>,
}
