//! Scripted price source for integration testing.
//!
//! Serves a fixed queue of quotes in order, then fails every call, so a
//! test controls exactly which prices the feed records.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use town_oracle::feed::{PriceQuote, PriceSource};

#[derive(Clone, Default)]
pub struct ScriptedSource {
    quotes: Arc<Mutex<VecDeque<PriceQuote>>>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a quote with a flat 24h change.
    pub fn push_price(&self, price: f64) {
        self.push(PriceQuote {
            price,
            change_24h: 0.0,
        });
    }

    pub fn push(&self, quote: PriceQuote) {
        self.quotes.lock().unwrap().push_back(quote);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    async fn fetch_quote(&self) -> Result<PriceQuote> {
        *self.calls.lock().unwrap() += 1;
        self.quotes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_in_order_then_fails() {
        let source = ScriptedSource::new();
        source.push_price(1.0);
        source.push_price(2.0);

        assert_eq!(source.fetch_quote().await.unwrap().price, 1.0);
        assert_eq!(source.fetch_quote().await.unwrap().price, 2.0);
        assert!(source.fetch_quote().await.is_err());
        assert_eq!(source.calls(), 3);
    }
}
