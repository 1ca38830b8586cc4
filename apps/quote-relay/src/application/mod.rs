//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the ingestion pipeline services and the port
//! interfaces that define how they reach external systems.

/// Port interfaces for external systems (cache, quote API, watchlists).
pub mod ports;

/// Change detection, polling and the merge pipeline.
pub mod services;
