//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    ApiKey, BootstrapSettings, BroadcastSettings, CacheSettings, ConfigError, FinnhubSettings,
    PollingSettings, RelayConfig, ServerSettings, StreamSettings,
};
