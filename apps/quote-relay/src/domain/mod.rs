//! Domain Layer - Core quote types and business rules.
//!
//! This layer contains the instrument, quote and session types shared by
//! every other layer. Nothing here performs I/O.

/// Symbols, quotes, observations and change events.
pub mod quote;

/// The bounded set of tracked instrument symbols.
pub mod registry;

/// Connection state shared by the upstream sources.
pub mod streaming;

/// Subscriber session identity and watchlist filters.
pub mod subscription;
