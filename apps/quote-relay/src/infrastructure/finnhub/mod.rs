//! Finnhub Adapters
//!
//! Clients for the upstream Finnhub trade stream and REST API.

pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod rest;
pub mod stream;
pub mod symbols;

pub use rest::FinnhubRestClient;
pub use stream::{StreamClient, StreamClientConfig, StreamClientError, StreamCommand, StreamEvent};
pub use symbols::FinnhubSymbolSource;
