//! Symbol Bootstrap
//!
//! Supplies the tracked symbol list from the Finnhub stock and crypto
//! listings. Listings are cached on disk next to a timestamp file and only
//! refetched once the cache is older than the configured age. When a
//! refetch fails, whatever is on disk is used.
//!
//! The registry receives the first N stocks followed by the first N
//! cryptocurrencies, in listing order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::messages::SymbolRecord;
use super::rest::FinnhubRestClient;
use crate::application::ports::{BootstrapError, SymbolSource};
use crate::domain::quote::Symbol;
use crate::infrastructure::config::BootstrapSettings;

const STOCKS_FILE: &str = "stock_symbols.json";
const CRYPTO_FILE: &str = "crypto_symbols.json";
const TIMESTAMP_FILE: &str = "symbols_timestamp.json";

#[derive(Debug, Serialize, Deserialize)]
struct CacheStamp {
    fetched_at: DateTime<Utc>,
}

/// Finnhub-backed symbol source with an on-disk cache.
#[derive(Debug, Clone)]
pub struct FinnhubSymbolSource {
    client: Arc<FinnhubRestClient>,
    settings: BootstrapSettings,
}

impl FinnhubSymbolSource {
    /// Create a symbol source.
    #[must_use]
    pub const fn new(client: Arc<FinnhubRestClient>, settings: BootstrapSettings) -> Self {
        Self { client, settings }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.settings.cache_dir.join(file)
    }

    /// Age of the on-disk listings, or `None` when there is no usable stamp.
    async fn cache_age(&self) -> Option<Duration> {
        let raw = tokio::fs::read(self.path(TIMESTAMP_FILE)).await.ok()?;
        let stamp: CacheStamp = serde_json::from_slice(&raw).ok()?;
        (Utc::now() - stamp.fetched_at).to_std().ok()
    }

    /// Fetch both listings and overwrite the on-disk cache.
    ///
    /// # Errors
    ///
    /// Returns an error if either listing cannot be fetched or written.
    pub async fn refresh_cache(&self) -> Result<(), BootstrapError> {
        let stocks = self
            .client
            .stock_symbols(&self.settings.stock_exchange)
            .await?;
        let cryptos = self
            .client
            .crypto_symbols(&self.settings.crypto_exchange)
            .await?;

        tokio::fs::create_dir_all(&self.settings.cache_dir).await?;
        write_json(&self.path(STOCKS_FILE), &stocks).await?;
        write_json(&self.path(CRYPTO_FILE), &cryptos).await?;
        write_json(
            &self.path(TIMESTAMP_FILE),
            &CacheStamp {
                fetched_at: Utc::now(),
            },
        )
        .await?;

        tracing::info!(
            stocks = stocks.len(),
            cryptos = cryptos.len(),
            dir = %self.settings.cache_dir.display(),
            "Symbol listings cached"
        );
        Ok(())
    }

    async fn read_listing(&self, file: &str) -> Vec<Symbol> {
        let path = self.path(file);
        let records: Vec<SymbolRecord> = match tokio::fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Symbol listing is malformed");
                    return Vec::new();
                }
            },
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Symbol listing unavailable");
                return Vec::new();
            }
        };

        records
            .into_iter()
            .map(|record| Symbol::new(record.symbol))
            .take(self.settings.per_class)
            .collect()
    }
}

async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), BootstrapError> {
    let raw = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, raw).await?;
    Ok(())
}

#[async_trait]
impl SymbolSource for FinnhubSymbolSource {
    async fn load_symbols(&self) -> Result<Vec<Symbol>, BootstrapError> {
        let stale = self
            .cache_age()
            .await
            .is_none_or(|age| age > self.settings.max_age);

        if stale {
            if let Err(e) = self.refresh_cache().await {
                tracing::warn!(error = %e, "Symbol listing refresh failed, using cached listings");
            }
        } else {
            tracing::debug!("Symbol listings are fresh");
        }

        let mut symbols = self.read_listing(STOCKS_FILE).await;
        symbols.extend(self.read_listing(CRYPTO_FILE).await);

        if symbols.is_empty() {
            return Err(BootstrapError::NoSymbols);
        }
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::infrastructure::config::ApiKey;

    fn settings(dir: &TempDir, per_class: usize) -> BootstrapSettings {
        BootstrapSettings {
            per_class,
            cache_dir: dir.path().to_path_buf(),
            ..BootstrapSettings::default()
        }
    }

    fn source(server_uri: &str, settings: BootstrapSettings) -> FinnhubSymbolSource {
        let client = FinnhubRestClient::new(
            server_uri,
            ApiKey::new("test-key".to_string()),
            Duration::from_secs(2),
        )
        .unwrap();
        FinnhubSymbolSource::new(Arc::new(client), settings)
    }

    async fn mount_listings(server: &MockServer, expected_calls: u64) {
        Mock::given(path("/stock/symbol"))
            .and(query_param("exchange", "US"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "AAPL"}, {"symbol": "MSFT"}, {"symbol": "TSLA"}
            ])))
            .expect(expected_calls)
            .mount(server)
            .await;
        Mock::given(path("/crypto/symbol"))
            .and(query_param("exchange", "BINANCE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BINANCE:BTCUSDT"}, {"symbol": "BINANCE:ETHUSDT"}, {"symbol": "BINANCE:SOLUSDT"}
            ])))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetches_and_takes_first_n_of_each_class() {
        let server = MockServer::start().await;
        mount_listings(&server, 1).await;
        let dir = TempDir::new().unwrap();

        let symbols = source(&server.uri(), settings(&dir, 2))
            .load_symbols()
            .await
            .unwrap();
        let raw: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
        assert_eq!(raw, ["AAPL", "MSFT", "BINANCE:BTCUSDT", "BINANCE:ETHUSDT"]);
        assert!(dir.path().join(STOCKS_FILE).exists());
        assert!(dir.path().join(TIMESTAMP_FILE).exists());
    }

    #[tokio::test]
    async fn fresh_cache_skips_fetch() {
        let server = MockServer::start().await;
        mount_listings(&server, 1).await;
        let dir = TempDir::new().unwrap();

        let source = source(&server.uri(), settings(&dir, 5));
        let first = source.load_symbols().await.unwrap();
        let second = source.load_symbols().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[tokio::test]
    async fn stale_cache_is_refetched() {
        let server = MockServer::start().await;
        mount_listings(&server, 2).await;
        let dir = TempDir::new().unwrap();

        let mut settings = settings(&dir, 5);
        settings.max_age = Duration::ZERO;
        let source = source(&server.uri(), settings);
        source.load_symbols().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        source.load_symbols().await.unwrap();
    }

    #[tokio::test]
    async fn failed_fetch_falls_back_to_disk() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(
            dir.path().join(STOCKS_FILE),
            serde_json::to_vec(&json!([{"symbol": "NVDA"}])).unwrap(),
        )
        .await
        .unwrap();

        let server = MockServer::start().await;
        Mock::given(path("/stock/symbol"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let symbols = source(&server.uri(), settings(&dir, 5))
            .load_symbols()
            .await
            .unwrap();
        assert_eq!(symbols, vec![Symbol::from("NVDA")]);
    }

    #[tokio::test]
    async fn nothing_available_is_an_error() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let result = source(&server.uri(), settings(&dir, 5)).load_symbols().await;
        assert!(matches!(result, Err(BootstrapError::NoSymbols)));
    }
}
