//! Upstream Source State
//!
//! Connection and activity tracking for each quote source. The stream
//! client and the poller update their own [`SourceState`]; the health
//! endpoints read snapshots of both.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::quote::ObservationSource;

/// Connection state of an upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying.
    Disconnected,
    /// Establishing a connection.
    Connecting,
    /// Connected and delivering data.
    Connected,
    /// Waiting before the next connection attempt.
    Reconnecting,
    /// Last attempt failed.
    Error,
}

/// Live state of one upstream source.
#[derive(Debug)]
pub struct SourceState {
    source: ObservationSource,
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
    tracked_symbols: AtomicUsize,
}

impl SourceState {
    /// Create a disconnected state for a source.
    #[must_use]
    pub const fn new(source: ObservationSource) -> Self {
        Self {
            source,
            state: RwLock::new(ConnectionState::Disconnected),
            last_connected_at: RwLock::new(None),
            error_message: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
            tracked_symbols: AtomicUsize::new(0),
        }
    }

    /// Set the connection state.
    ///
    /// Entering [`ConnectionState::Connected`] records the time, clears any
    /// error and resets the reconnect counter.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.error_message.write() = None;
            self.reconnect_attempts.store(0, Ordering::Relaxed);
        }
    }

    /// Enter the error state with a message.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.state.write() = ConnectionState::Error;
        *self.error_message.write() = Some(message.into());
    }

    /// Record one more reconnect attempt.
    pub fn record_reconnect(&self) {
        *self.state.write() = ConnectionState::Reconnecting;
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count inbound messages.
    pub fn record_messages(&self, count: u64) {
        self.messages_received.fetch_add(count, Ordering::Relaxed);
    }

    /// Number of symbols the source currently covers.
    pub fn set_tracked_symbols(&self, count: usize) {
        self.tracked_symbols.store(count, Ordering::Relaxed);
    }

    /// Which source this state describes.
    #[must_use]
    pub const fn source(&self) -> ObservationSource {
        self.source
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the source is currently delivering data.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            source: self.source.as_str(),
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            error: self.error_message.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            tracked_symbols: self.tracked_symbols.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of a [`SourceState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSnapshot {
    /// Source label.
    pub source: &'static str,
    /// Connection state.
    pub state: ConnectionState,
    /// Last time the source entered the connected state.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent error, cleared on reconnect.
    pub error: Option<String>,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Inbound messages since startup.
    pub messages_received: u64,
    /// Symbols covered by the source.
    pub tracked_symbols: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connecting_clears_error_and_attempts() {
        let state = SourceState::new(ObservationSource::Stream);
        state.set_error("handshake failed");
        state.record_reconnect();
        state.record_reconnect();
        assert_eq!(state.snapshot().reconnect_attempts, 2);
        assert_eq!(state.state(), ConnectionState::Reconnecting);

        state.set_state(ConnectionState::Connected);
        let snapshot = state.snapshot();
        assert!(state.is_connected());
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert!(snapshot.error.is_none());
        assert!(snapshot.last_connected_at.is_some());
    }

    #[test]
    fn counts_messages() {
        let state = SourceState::new(ObservationSource::Poll);
        state.record_messages(3);
        state.record_messages(2);
        state.set_tracked_symbols(10);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.messages_received, 5);
        assert_eq!(snapshot.tracked_symbols, 10);
        assert_eq!(snapshot.source, "poll");
    }
}
