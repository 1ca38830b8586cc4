//! Subscriber Session Types
//!
//! Domain types for subscriber sessions connected to the broadcast hub.
//!
//! # Design
//!
//! A session is either unfiltered (receives every change event) or
//! restricted to a watchlist. The "all quotes" and "my watchlist" streams
//! share one hub and differ only in this filter.

use std::collections::HashSet;

use super::quote::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a subscriber session.
pub type SessionId = u64;

/// Generate a fresh session identifier.
#[must_use]
pub fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4().as_u64_pair().0
}

/// Delivery filter of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionFilter {
    /// Every change event is delivered.
    #[default]
    All,
    /// Only events for these symbols are delivered.
    Watchlist(HashSet<Symbol>),
}

impl SessionFilter {
    /// Filter for a requested watchlist, where an empty list means
    /// "unfiltered".
    #[must_use]
    pub fn from_watchlist(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        let symbols: HashSet<Symbol> = symbols.into_iter().collect();
        if symbols.is_empty() {
            Self::All
        } else {
            Self::Watchlist(symbols)
        }
    }

    /// Filter restricted to exactly these symbols, even if there are none.
    #[must_use]
    pub fn restricted(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self::Watchlist(symbols.into_iter().collect())
    }

    /// Whether an event for this symbol should be delivered.
    #[must_use]
    pub fn matches(&self, symbol: &Symbol) -> bool {
        match self {
            Self::All => true,
            Self::Watchlist(symbols) => symbols.contains(symbol),
        }
    }

    /// Whether the session is restricted to a watchlist.
    #[must_use]
    pub const fn is_filtered(&self) -> bool {
        matches!(self, Self::Watchlist(_))
    }

    /// Drop symbols from a watchlist filter.
    ///
    /// A watchlist emptied this way stays filtered. Returns whether
    /// anything was removed.
    pub fn remove_symbols(&mut self, removed: &[Symbol]) -> bool {
        match self {
            Self::All => false,
            Self::Watchlist(symbols) => {
                let before = symbols.len();
                symbols.retain(|symbol| !removed.contains(symbol));
                symbols.len() != before
            }
        }
    }
}

// =============================================================================
// Delivery Reporting
// =============================================================================

/// Outcome of fanning one message out to the sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Sessions whose filter accepted the message.
    pub matched: usize,
    /// Sessions the message was queued for.
    pub delivered: usize,
    /// Sessions whose queue was full.
    pub dropped: usize,
    /// Sessions found closed and removed.
    pub closed: usize,
}

/// Session counts by filter kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// All connected sessions.
    pub total: usize,
    /// Sessions restricted to a watchlist.
    pub filtered: usize,
}

// =============================================================================
// Tests
// =============================================================================
