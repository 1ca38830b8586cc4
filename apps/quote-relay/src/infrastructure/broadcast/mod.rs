//! Broadcast Hub
//!
//! Fans change events and relayed trade frames out to subscriber sessions.
//!
//! # Architecture
//!
//! Every session owns a bounded mpsc queue and a [`SessionFilter`]. Publishing
//! walks the session table under a read lock and uses `try_send`, so a slow
//! session loses messages instead of stalling the others. Sessions whose
//! receiver has been dropped are removed after the walk.
//!
//! Quote changes honour the session filter. Trade frames are relayed to every
//! session unfiltered.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::finnhub::messages::TradeFrame;
use crate::application::ports::ChangePublisher;
use crate::domain::quote::{ChangeEvent, Symbol};
use crate::domain::subscription::{
    PublishReport, SessionFilter, SessionId, SessionStats, new_session_id,
};
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics::{self, DeliveryKind};

// =============================================================================
// Messages
// =============================================================================

/// Message queued for a session.
#[derive(Debug, Clone)]
pub enum HubMessage {
    /// Deduplicated quote change.
    Quote(Arc<ChangeEvent>),
    /// Raw upstream trade frame.
    StockData(Arc<TradeFrame>),
}

// =============================================================================
// Configuration
// =============================================================================

/// Hub configuration.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity of each session queue.
    pub session_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            session_buffer: 256,
        }
    }
}

impl From<&BroadcastSettings> for BroadcastConfig {
    fn from(settings: &BroadcastSettings) -> Self {
        Self {
            session_buffer: settings.session_buffer.max(1),
        }
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug)]
struct SessionSlot {
    filter: SessionFilter,
    tx: mpsc::Sender<HubMessage>,
}

/// Receiving side of a registered session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    rx: mpsc::Receiver<HubMessage>,
}

impl SessionHandle {
    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Next queued message, or `None` once the session is unregistered.
    pub async fn recv(&mut self) -> Option<HubMessage> {
        self.rx.recv().await
    }

    /// Next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<HubMessage> {
        self.rx.try_recv().ok()
    }
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Registry of subscriber sessions.
///
/// # Example
///
/// ```rust
/// use quote_relay::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let session = hub.register_session();
/// assert_eq!(hub.session_count(), 1);
/// hub.unregister_session(session.id());
/// ```
#[derive(Debug, Default)]
pub struct BroadcastHub {
    config: BroadcastConfig,
    sessions: RwLock<HashMap<SessionId, SessionSlot>>,
}

impl BroadcastHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register an unfiltered session.
    #[must_use]
    pub fn register_session(&self) -> SessionHandle {
        self.register_with(SessionFilter::All)
    }

    /// Register a session with an initial filter.
    #[must_use]
    pub fn register_with(&self, filter: SessionFilter) -> SessionHandle {
        let (tx, rx) = mpsc::channel(self.config.session_buffer);
        let id = new_session_id();
        let count = {
            let mut sessions = self.sessions.write();
            sessions.insert(id, SessionSlot { filter, tx });
            sessions.len()
        };
        metrics::set_active_sessions(count);
        tracing::debug!(session_id = id, sessions = count, "Session registered");
        SessionHandle { id, rx }
    }

    /// Replace a session's filter; an empty watchlist means unfiltered.
    ///
    /// Returns `false` if the session is unknown.
    pub fn set_filter(&self, id: SessionId, watchlist: impl IntoIterator<Item = Symbol>) -> bool {
        self.replace_filter(id, SessionFilter::from_watchlist(watchlist))
    }

    /// Restrict a session to exactly these symbols, even if there are none.
    ///
    /// Returns `false` if the session is unknown.
    pub fn restrict_to(&self, id: SessionId, watchlist: impl IntoIterator<Item = Symbol>) -> bool {
        self.replace_filter(id, SessionFilter::restricted(watchlist))
    }

    fn replace_filter(&self, id: SessionId, filter: SessionFilter) -> bool {
        match self.sessions.write().get_mut(&id) {
            Some(slot) => {
                tracing::debug!(session_id = id, filtered = filter.is_filtered(), "Session filter replaced");
                slot.filter = filter;
                true
            }
            None => false,
        }
    }

    /// Remove a session. Queued messages stay readable until drained.
    pub fn unregister_session(&self, id: SessionId) {
        let (removed, count) = {
            let mut sessions = self.sessions.write();
            (sessions.remove(&id).is_some(), sessions.len())
        };
        if removed {
            metrics::set_active_sessions(count);
            tracing::debug!(session_id = id, sessions = count, "Session unregistered");
        }
    }

    /// Relay an upstream trade frame to every session.
    pub fn relay_trades(&self, frame: TradeFrame) -> PublishReport {
        let message = HubMessage::StockData(Arc::new(frame));
        let report = self.fan_out(&message, |_| true);
        metrics::record_publish(DeliveryKind::StockData, &report);
        report
    }

    fn fan_out(&self, message: &HubMessage, accepts: impl Fn(&SessionFilter) -> bool) -> PublishReport {
        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        {
            let sessions = self.sessions.read();
            for (id, slot) in sessions.iter() {
                if !accepts(&slot.filter) {
                    continue;
                }
                report.matched += 1;
                match slot.tx.try_send(message.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        report.dropped += 1;
                        tracing::trace!(session_id = id, "Session queue full, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            report.closed = closed.len();
            let count = {
                let mut sessions = self.sessions.write();
                for id in &closed {
                    sessions.remove(id);
                }
                sessions.len()
            };
            metrics::set_active_sessions(count);
            tracing::debug!(closed = closed.len(), sessions = count, "Removed closed sessions");
        }

        report
    }

    /// Session counts by filter kind.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read();
        SessionStats {
            total: sessions.len(),
            filtered: sessions.values().filter(|s| s.filter.is_filtered()).count(),
        }
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl ChangePublisher for BroadcastHub {
    fn publish(&self, event: &ChangeEvent) -> PublishReport {
        let message = HubMessage::Quote(Arc::new(event.clone()));
        let report = self.fan_out(&message, |filter| filter.matches(&event.symbol));
        metrics::record_publish(DeliveryKind::QuoteUpdate, &report);
        report
    }

    fn retire_symbols(&self, symbols: &[Symbol]) {
        if symbols.is_empty() {
            return;
        }
        let touched = self
            .sessions
            .write()
            .values_mut()
            .map(|slot| slot.filter.remove_symbols(symbols))
            .filter(|&changed| changed)
            .count();
        tracing::info!(
            symbols = symbols.len(),
            sessions = touched,
            "Retired symbols removed from session watchlists"
        );
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

// =============================================================================
// Tests
// =============================================================================
