//! Symbol Registry
//!
//! The ordered, bounded set of symbols the relay tracks. The registry is
//! loaded once at startup and only grows during a process lifetime, except
//! when the bootstrap collaborator supplies a wholesale replacement.

use std::collections::HashSet;

use parking_lot::RwLock;

use super::quote::Symbol;

// =============================================================================
// Registry Diff
// =============================================================================

/// Result of replacing the registry contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    /// Symbols that were not tracked before, in registry order.
    pub added: Vec<Symbol>,
    /// Symbols that are no longer tracked.
    pub removed: Vec<Symbol>,
}

impl RegistryDiff {
    /// Check if the replacement changed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// =============================================================================
// Symbol Registry
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    ordered: Vec<Symbol>,
    members: HashSet<Symbol>,
}

impl RegistryState {
    fn push(&mut self, symbol: Symbol) -> bool {
        if self.members.insert(symbol.clone()) {
            self.ordered.push(symbol);
            true
        } else {
            false
        }
    }
}

/// Thread-safe registry of tracked symbols.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    state: RwLock<RegistryState>,
}

impl SymbolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from an ordered list, dropping duplicates.
    #[must_use]
    pub fn from_symbols(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        let registry = Self::new();
        registry.extend(symbols);
        registry
    }

    /// Append symbols, returning the ones that were newly tracked.
    pub fn extend(&self, symbols: impl IntoIterator<Item = Symbol>) -> Vec<Symbol> {
        let mut state = self.state.write();
        symbols
            .into_iter()
            .filter(|symbol| state.push(symbol.clone()))
            .collect()
    }

    /// Replace the whole registry with a fresh bootstrap result.
    pub fn replace(&self, symbols: impl IntoIterator<Item = Symbol>) -> RegistryDiff {
        let mut next = RegistryState::default();
        for symbol in symbols {
            next.push(symbol);
        }

        let mut state = self.state.write();
        let added = next
            .ordered
            .iter()
            .filter(|symbol| !state.members.contains(*symbol))
            .cloned()
            .collect();
        let removed = state
            .ordered
            .iter()
            .filter(|symbol| !next.members.contains(*symbol))
            .cloned()
            .collect();
        *state = next;

        RegistryDiff { added, removed }
    }

    /// Check if a symbol is tracked.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.state.read().members.contains(symbol)
    }

    /// Tracked symbols in registry order.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.state.read().ordered.clone()
    }

    /// Tracked stock symbols in registry order.
    #[must_use]
    pub fn stocks(&self) -> Vec<Symbol> {
        self.filtered(|symbol| !symbol.is_crypto())
    }

    /// Tracked cryptocurrency symbols in registry order.
    #[must_use]
    pub fn cryptos(&self) -> Vec<Symbol> {
        self.filtered(Symbol::is_crypto)
    }

    fn filtered(&self, keep: impl Fn(&Symbol) -> bool) -> Vec<Symbol> {
        self.state
            .read()
            .ordered
            .iter()
            .filter(|symbol| keep(symbol))
            .cloned()
            .collect()
    }

    /// Number of tracked symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().ordered.len()
    }

    /// Check if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
