//! Finnhub REST Client
//!
//! Request/response access to the quote and symbol listing endpoints. The
//! API key travels in the `X-Finnhub-Token` header so it never appears in
//! logged URLs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::messages::{QuoteResponse, SymbolRecord};
use crate::application::ports::{QuoteApi, QuoteApiError};
use crate::domain::quote::{Quote, Symbol};
use crate::infrastructure::config::ApiKey;

const TOKEN_HEADER: &str = "X-Finnhub-Token";

/// HTTP client for the Finnhub REST API.
#[derive(Debug, Clone)]
pub struct FinnhubRestClient {
    client: Client,
    base_url: String,
    api_key: ApiKey,
}

impl FinnhubRestClient {
    /// Create a client for a base URL such as `https://finnhub.io/api/v1`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: ApiKey, timeout: Duration) -> Result<Self, QuoteApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuoteApiError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, QuoteApiError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .header(TOKEN_HEADER, self.api_key.expose())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QuoteApiError::Http(format!("timeout requesting {path}"))
                } else {
                    QuoteApiError::Http(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(QuoteApiError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuoteApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| QuoteApiError::Http(e.without_url().to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| QuoteApiError::Decode(e.to_string()))
    }

    /// List the stock symbols of an exchange.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is malformed.
    pub async fn stock_symbols(&self, exchange: &str) -> Result<Vec<SymbolRecord>, QuoteApiError> {
        self.get_json("/stock/symbol", &[("exchange", exchange)])
            .await
    }

    /// List the crypto pairs of an exchange.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is malformed.
    pub async fn crypto_symbols(&self, exchange: &str) -> Result<Vec<SymbolRecord>, QuoteApiError> {
        self.get_json("/crypto/symbol", &[("exchange", exchange)])
            .await
    }
}

#[async_trait]
impl QuoteApi for FinnhubRestClient {
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, QuoteApiError> {
        let response: QuoteResponse = self
            .get_json("/quote", &[("symbol", symbol.as_str())])
            .await?;
        Ok(response.into())
    }
}
