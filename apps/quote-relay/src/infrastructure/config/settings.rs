//! Relay Configuration Settings
//!
//! Configuration types for the quote relay, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Finnhub API key.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Get the raw key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Upstream Finnhub endpoints and credential.
#[derive(Debug, Clone)]
pub struct FinnhubSettings {
    /// API key used by both the stream and the REST API.
    pub api_key: ApiKey,
    /// Streaming endpoint, without the token parameter.
    pub ws_url: String,
    /// REST base URL.
    pub api_url: String,
}

/// Streaming connection resilience settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket ping interval.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.1,
            max_reconnect_attempts: 0,
        }
    }
}

/// Polling fallback settings.
#[derive(Debug, Clone)]
pub struct PollingSettings {
    /// Time between polling cycles.
    pub interval: Duration,
    /// Timeout for a single quote request.
    pub request_timeout: Duration,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            request_timeout: Duration::from_millis(5000),
        }
    }
}

/// Quote cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Redis connection URL; the in-process store is used when unset.
    pub redis_url: Option<String>,
    /// Freshness window of a cached quote.
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl: Duration::from_secs(10),
        }
    }
}

/// Symbol bootstrap settings.
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    /// Symbols taken from each asset class.
    pub per_class: usize,
    /// Exchange code for the stock listing.
    pub stock_exchange: String,
    /// Exchange code for the crypto listing.
    pub crypto_exchange: String,
    /// Directory holding the cached listings.
    pub cache_dir: PathBuf,
    /// Age after which the cached listings are refetched.
    pub max_age: Duration,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            per_class: 5,
            stock_exchange: "US".to_string(),
            crypto_exchange: "BINANCE".to_string(),
            cache_dir: PathBuf::from("."),
            max_age: Duration::from_secs(86_400),
        }
    }
}

/// Subscriber fan-out settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Queue capacity of each subscriber session.
    pub session_buffer: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            session_buffer: 256,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP and subscriber WebSocket port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream endpoints and credential.
    pub finnhub: FinnhubSettings,
    /// Streaming connection settings.
    pub stream: StreamSettings,
    /// Polling fallback settings.
    pub polling: PollingSettings,
    /// Quote cache settings.
    pub cache: CacheSettings,
    /// Symbol bootstrap settings.
    pub bootstrap: BootstrapSettings,
    /// Subscriber fan-out settings.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// JSON file backing the watchlist store.
    pub watchlist_file: Option<PathBuf>,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `FINNHUB_API_KEY` is missing or empty, or if a
    /// poll, heartbeat or cache duration is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `FINNHUB_API_KEY` is missing or empty, or if a
    /// poll, heartbeat or cache duration is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("FINNHUB_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("FINNHUB_API_KEY".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("FINNHUB_API_KEY".to_string()));
        }

        let finnhub = FinnhubSettings {
            api_key: ApiKey::new(api_key.trim().to_string()),
            ws_url: non_empty(&lookup, "FINNHUB_WS_URL")
                .unwrap_or_else(|| "wss://ws.finnhub.io".to_string()),
            api_url: non_empty(&lookup, "FINNHUB_API_URL")
                .unwrap_or_else(|| "https://finnhub.io/api/v1".to_string()),
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            heartbeat_interval: non_zero(
                "RELAY_HEARTBEAT_INTERVAL_SECS",
                parse_duration_secs(
                    &lookup,
                    "RELAY_HEARTBEAT_INTERVAL_SECS",
                    stream_defaults.heartbeat_interval,
                ),
            )?,
            heartbeat_timeout: non_zero(
                "RELAY_HEARTBEAT_TIMEOUT_SECS",
                parse_duration_secs(
                    &lookup,
                    "RELAY_HEARTBEAT_TIMEOUT_SECS",
                    stream_defaults.heartbeat_timeout,
                ),
            )?,
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "RELAY_RECONNECT_DELAY_INITIAL_MS",
                stream_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "RELAY_RECONNECT_DELAY_MAX_SECS",
                stream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "RELAY_RECONNECT_DELAY_MULTIPLIER",
                stream_defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: parse_or(
                &lookup,
                "RELAY_RECONNECT_JITTER",
                stream_defaults.reconnect_jitter,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "RELAY_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            ),
        };

        let polling_defaults = PollingSettings::default();
        let polling = PollingSettings {
            interval: non_zero(
                "POLL_INTERVAL_MS",
                parse_duration_millis(&lookup, "POLL_INTERVAL_MS", polling_defaults.interval),
            )?,
            request_timeout: non_zero(
                "POLL_REQUEST_TIMEOUT_MS",
                parse_duration_millis(
                    &lookup,
                    "POLL_REQUEST_TIMEOUT_MS",
                    polling_defaults.request_timeout,
                ),
            )?,
        };

        let cache = CacheSettings {
            redis_url: non_empty(&lookup, "REDIS_URL"),
            ttl: non_zero(
                "QUOTE_CACHE_TTL_SECS",
                parse_duration_secs(&lookup, "QUOTE_CACHE_TTL_SECS", CacheSettings::default().ttl),
            )?,
        };

        let bootstrap_defaults = BootstrapSettings::default();
        let bootstrap = BootstrapSettings {
            per_class: parse_or(&lookup, "SYMBOLS_PER_CLASS", bootstrap_defaults.per_class),
            stock_exchange: non_empty(&lookup, "STOCK_EXCHANGE")
                .unwrap_or(bootstrap_defaults.stock_exchange),
            crypto_exchange: non_empty(&lookup, "CRYPTO_EXCHANGE")
                .unwrap_or(bootstrap_defaults.crypto_exchange),
            cache_dir: non_empty(&lookup, "SYMBOL_CACHE_DIR")
                .map_or(bootstrap_defaults.cache_dir, PathBuf::from),
            max_age: parse_duration_secs(
                &lookup,
                "SYMBOL_CACHE_MAX_AGE_SECS",
                bootstrap_defaults.max_age,
            ),
        };

        let broadcast = BroadcastSettings {
            session_buffer: parse_or(
                &lookup,
                "RELAY_SESSION_BUFFER",
                BroadcastSettings::default().session_buffer,
            )
            .max(1),
        };

        let server = ServerSettings {
            port: parse_or(&lookup, "PORT", ServerSettings::default().port),
        };

        Ok(Self {
            finnhub,
            stream,
            polling,
            cache,
            bootstrap,
            broadcast,
            server,
            watchlist_file: non_empty(&lookup, "WATCHLIST_FILE").map(PathBuf::from),
        })
    }

    /// Streaming URL including the token query parameter.
    #[must_use]
    pub fn stream_url_with_token(&self) -> String {
        format!(
            "{}?token={}",
            self.finnhub.ws_url.trim_end_matches('/'),
            self.finnhub.api_key.expose()
        )
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Duration setting must be greater than zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroDuration(String),
}

fn non_zero(key: &str, duration: Duration) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::ZeroDuration(key.to_string()));
    }
    Ok(duration)
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_api_key_is_fatal() {
        assert!(matches!(
            config_from(&[]),
            Err(ConfigError::MissingEnvVar(key)) if key == "FINNHUB_API_KEY"
        ));
    }

    #[test]
    fn blank_api_key_is_fatal() {
        assert!(matches!(
            config_from(&[("FINNHUB_API_KEY", "  ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = config_from(&[("FINNHUB_API_KEY", "abc")]).unwrap();
        assert_eq!(config.finnhub.ws_url, "wss://ws.finnhub.io");
        assert_eq!(config.finnhub.api_url, "https://finnhub.io/api/v1");
        assert_eq!(config.cache.ttl, Duration::from_secs(10));
        assert!(config.cache.redis_url.is_none());
        assert_eq!(config.polling.interval, Duration::from_millis(3000));
        assert_eq!(config.polling.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.bootstrap.per_class, 5);
        assert_eq!(config.bootstrap.stock_exchange, "US");
        assert_eq!(config.bootstrap.crypto_exchange, "BINANCE");
        assert_eq!(config.bootstrap.max_age, Duration::from_secs(86_400));
        assert_eq!(config.broadcast.session_buffer, 256);
        assert_eq!(config.server.port, 8000);
        assert!(config.watchlist_file.is_none());
    }

    #[test]
    fn overrides_apply() {
        let config = config_from(&[
            ("FINNHUB_API_KEY", "abc"),
            ("REDIS_URL", "redis://cache:6379"),
            ("POLL_INTERVAL_MS", "1000"),
            ("SYMBOLS_PER_CLASS", "10"),
            ("PORT", "9000"),
            ("RELAY_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("WATCHLIST_FILE", "/etc/relay/watchlists.json"),
        ])
        .unwrap();
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.polling.interval, Duration::from_millis(1000));
        assert_eq!(config.bootstrap.per_class, 10);
        assert_eq!(config.server.port, 9000);
        assert!((config.stream.reconnect_delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(
            config.watchlist_file,
            Some(PathBuf::from("/etc/relay/watchlists.json"))
        );
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let config = config_from(&[("FINNHUB_API_KEY", "abc"), ("PORT", "not-a-port")]).unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test_case("POLL_INTERVAL_MS" ; "poll interval")]
    #[test_case("POLL_REQUEST_TIMEOUT_MS" ; "poll request timeout")]
    #[test_case("RELAY_HEARTBEAT_INTERVAL_SECS" ; "heartbeat interval")]
    #[test_case("RELAY_HEARTBEAT_TIMEOUT_SECS" ; "heartbeat timeout")]
    #[test_case("QUOTE_CACHE_TTL_SECS" ; "cache ttl")]
    fn zero_duration_is_rejected(key: &str) {
        let result = config_from(&[("FINNHUB_API_KEY", "abc"), (key, "0")]);
        assert!(matches!(result, Err(ConfigError::ZeroDuration(k)) if k == key));
    }

    #[test]
    fn stream_url_carries_token() {
        let config = config_from(&[("FINNHUB_API_KEY", "abc")]).unwrap();
        assert_eq!(config.stream_url_with_token(), "wss://ws.finnhub.io?token=abc");
    }

    #[test]
    fn api_key_redacted_debug() {
        let config = config_from(&[("FINNHUB_API_KEY", "secret-key-123")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-key-123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn stream_settings_defaults() {
        let settings = StreamSettings::default();
        assert_eq!(settings.reconnect_delay_initial, Duration::from_millis(500));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert!((settings.reconnect_jitter - 0.1).abs() < f64::EPSILON);
        assert_eq!(settings.max_reconnect_attempts, 0);
    }
}
