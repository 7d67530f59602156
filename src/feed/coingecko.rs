//! CoinGecko price source.
//!
//! API: `https://api.coingecko.com/api/v3/simple/price`
//! Auth: none for the public tier; an optional demo key is sent as the
//! `x-cg-demo-api-key` header.
//! Rate limit: roughly 30 req/min on the public tier, far above one
//! request per refresh interval.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{PriceQuote, PriceSource};
use crate::types::OracleError;

/// Public API base.
pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

const SOURCE_NAME: &str = "coingecko";

/// `{ "<coin>": { "<vs>": price, "<vs>_24h_change": pct } }`
type SimplePriceResponse = HashMap<String, HashMap<String, Option<f64>>>;

pub struct CoinGeckoSource {
    http: Client,
    base_url: String,
    coin_id: String,
    vs_currency: String,
    api_key: Option<SecretString>,
}

impl CoinGeckoSource {
    pub fn new(
        base_url: impl Into<String>,
        coin_id: impl Into<String>,
        vs_currency: impl Into<String>,
        timeout: Duration,
        api_key: Option<SecretString>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("TOWN-ORACLE/0.1.0")
            .build()
            .context("Failed to build CoinGecko HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            coin_id: coin_id.into(),
            vs_currency: vs_currency.into(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies={}&include_24hr_change=true",
            self.base_url, self.coin_id, self.vs_currency
        )
    }

    /// Pull the quote for the tracked coin out of a `simple/price` body.
    fn parse_quote(&self, body: &SimplePriceResponse) -> Result<PriceQuote> {
        let malformed = |message: String| OracleError::PriceSource {
            source_name: SOURCE_NAME.to_string(),
            message,
        };

        let coin = body
            .get(&self.coin_id)
            .ok_or_else(|| malformed(format!("no entry for {}", self.coin_id)))?;
        let price = coin
            .get(&self.vs_currency)
            .copied()
            .flatten()
            .ok_or_else(|| malformed(format!("no {} price", self.vs_currency)))?;
        let change_24h = coin
            .get(&format!("{}_24h_change", self.vs_currency))
            .copied()
            .flatten()
            .unwrap_or(0.0);

        let quote = PriceQuote { price, change_24h };
        if !quote.is_valid() {
            return Err(malformed(format!("unusable price {price}")).into());
        }
        Ok(quote)
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn fetch_quote(&self) -> Result<PriceQuote> {
        let url = self.url();
        let mut req = self.http.get(&url);
        if let Some(key) = &self.api_key {
            req = req.header("x-cg-demo-api-key", key.expose_secret().as_str());
        }

        let resp = req.send().await.context("CoinGecko request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!(OracleError::PriceSource {
                source_name: SOURCE_NAME.to_string(),
                message: format!("HTTP {status}"),
            });
        }

        let body: SimplePriceResponse = resp
            .json()
            .await
            .context("Failed to parse CoinGecko response")?;
        let quote = self.parse_quote(&body)?;

        debug!(coin = %self.coin_id, price = quote.price, "CoinGecko quote");
        Ok(quote)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
