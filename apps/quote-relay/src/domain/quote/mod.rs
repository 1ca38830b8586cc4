//! Quote Domain Types
//!
//! Canonical, codec-agnostic representation of an instrument's trading
//! state. Both upstream sources (streaming trades and polled quotes) are
//! normalized into [`Observation`]s of these types before deduplication.
//!
//! # Equality
//!
//! Quote equality is value based over every field, with zero and absent
//! both meaning "no data". A poll that reports `0` for a field the stream
//! never populated is therefore not a change.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Base symbols that are always classified as cryptocurrencies.
const KNOWN_CRYPTO_BASES: &[&str] = &[
    "BTC", "ETH", "DOGE", "USDT", "XRP", "USDC", "BNB", "ADA", "TRX", "LINK", "LTC", "BCH", "SOL",
    "DOT", "MATIC", "AVAX", "SHIB", "XLM", "UNI", "ICP", "DAI", "VET", "ETC", "FIL", "THETA",
    "EOS", "LEO", "XMR", "NEO",
];

/// Base symbol that sorts ahead of every other cryptocurrency.
const LEAD_CRYPTO_BASE: &str = "BTC";

// =============================================================================
// Symbol
// =============================================================================

/// Instrument identifier, optionally venue-prefixed (`BINANCE:BTCUSDT`).
///
/// Identity is the full string. The venue-stripped [`Symbol::base`] is only
/// used for display and classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from its full identifier.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// The full identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The venue prefix, if any (`BINANCE` for `BINANCE:BTCUSDT`).
    #[must_use]
    pub fn venue(&self) -> Option<&str> {
        self.0.rsplit_once(':').map(|(venue, _)| venue)
    }

    /// The last segment after any venue prefix, upper-cased.
    #[must_use]
    pub fn base(&self) -> String {
        self.0
            .rsplit(':')
            .next()
            .unwrap_or_default()
            .to_uppercase()
    }

    /// Whether this symbol names a cryptocurrency.
    ///
    /// Venue-prefixed symbols are always crypto pairs; bare symbols are
    /// crypto only when their base is a known coin.
    #[must_use]
    pub fn is_crypto(&self) -> bool {
        self.venue().is_some() || KNOWN_CRYPTO_BASES.contains(&self.base().as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Point-in-time snapshot of an instrument's price fields.
///
/// Every field is optional. A quote fully replaces the previous one for its
/// symbol; quotes are never merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Last traded or current price.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Absolute change from the previous close.
    #[serde(default)]
    pub change: Option<Decimal>,
    /// Percentage change from the previous close.
    #[serde(default)]
    pub change_percent: Option<Decimal>,
    /// Session open.
    #[serde(default)]
    pub open: Option<Decimal>,
    /// Session high.
    #[serde(default)]
    pub high: Option<Decimal>,
    /// Session low.
    #[serde(default)]
    pub low: Option<Decimal>,
    /// Previous session close.
    #[serde(default)]
    pub previous_close: Option<Decimal>,
    /// When the upstream observed these values.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Quote {
    /// A quote carrying only a trade price and its time.
    #[must_use]
    pub fn from_trade(price: Decimal, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            price: Some(price),
            timestamp,
            ..Self::default()
        }
    }

    fn numeric_fields(&self) -> [Option<Decimal>; 7] {
        [
            self.price,
            self.change,
            self.change_percent,
            self.open,
            self.high,
            self.low,
            self.previous_close,
        ]
    }

    /// Whether every numeric field is absent or zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.numeric_fields().iter().all(|field| no_data(*field))
    }
}

fn no_data(value: Option<Decimal>) -> bool {
    value.is_none_or(|v| v.is_zero())
}

fn same_field(a: Option<Decimal>, b: Option<Decimal>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        (a, b) => no_data(a) && no_data(b),
    }
}

fn same_timestamp(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    let epoch = DateTime::<Utc>::UNIX_EPOCH;
    a.unwrap_or(epoch) == b.unwrap_or(epoch)
}

impl PartialEq for Quote {
    fn eq(&self, other: &Self) -> bool {
        self.numeric_fields()
            .into_iter()
            .zip(other.numeric_fields())
            .all(|(a, b)| same_field(a, b))
            && same_timestamp(self.timestamp, other.timestamp)
    }
}

// =============================================================================
// Display Ordering
// =============================================================================

/// Ordering used when presenting a list of quotes.
///
/// Stocks sort before cryptocurrencies, bitcoin leads the cryptocurrencies,
/// quotes with data sort before empty ones, and ties break on the base
/// symbol.
#[must_use]
pub fn display_order(a: (&Symbol, &Quote), b: (&Symbol, &Quote)) -> Ordering {
    let (a_symbol, a_quote) = a;
    let (b_symbol, b_quote) = b;
    let (a_base, b_base) = (a_symbol.base(), b_symbol.base());

    a_symbol
        .is_crypto()
        .cmp(&b_symbol.is_crypto())
        .then_with(|| {
            if a_symbol.is_crypto() {
                (b_base == LEAD_CRYPTO_BASE).cmp(&(a_base == LEAD_CRYPTO_BASE))
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| a_quote.is_empty().cmp(&b_quote.is_empty()))
        .then_with(|| a_base.cmp(&b_base))
}

// =============================================================================
// Observations and Change Events
// =============================================================================

/// Which upstream produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationSource {
    /// Streaming trade feed.
    Stream,
    /// Periodic REST quote polling.
    Poll,
}

impl ObservationSource {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Poll => "poll",
        }
    }
}

/// A quote seen for a symbol, before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Instrument the quote belongs to.
    pub symbol: Symbol,
    /// Observed values.
    pub quote: Quote,
    /// Upstream that produced it.
    pub source: ObservationSource,
}

impl Observation {
    /// Create an observation.
    #[must_use]
    pub const fn new(symbol: Symbol, quote: Quote, source: ObservationSource) -> Self {
        Self {
            symbol,
            quote,
            source,
        }
    }
}

/// An observation that differs from the cached quote for its symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Instrument whose quote changed.
    pub symbol: Symbol,
    /// The full new quote.
    pub quote: Quote,
}

/// Wire shape of a change event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteUpdate {
    /// Instrument identifier.
    pub symbol: String,
    /// Current price.
    pub price: Option<f64>,
    /// Absolute change.
    pub change: Option<f64>,
    /// Percentage change.
    pub change_percent: Option<f64>,
    /// Session open.
    pub open: Option<f64>,
    /// Session high.
    pub high: Option<f64>,
    /// Session low.
    pub low: Option<f64>,
    /// Previous close.
    pub previous_close: Option<f64>,
    /// Observation time in unix milliseconds.
    pub timestamp: Option<i64>,
}

impl From<&ChangeEvent> for QuoteUpdate {
    fn from(event: &ChangeEvent) -> Self {
        let quote = &event.quote;
        let float = |value: Option<Decimal>| value.and_then(|v| v.to_f64());
        Self {
            symbol: event.symbol.to_string(),
            price: float(quote.price),
            change: float(quote.change),
            change_percent: float(quote.change_percent),
            open: float(quote.open),
            high: float(quote.high),
            low: float(quote.low),
            previous_close: float(quote.previous_close),
            timestamp: quote.timestamp.map(|ts| ts.timestamp_millis()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
