//! Price feed.
//!
//! Maintains a single bounded, continuously refreshed price series for one
//! instrument and derives the statistics the signal tools consume. The feed
//! never surfaces a fetch failure: it degrades to the last known good price,
//! or to the configured fallback when nothing has been fetched yet.

pub mod coingecko;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default rolling window size.
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Price served before the first successful fetch.
pub const DEFAULT_FALLBACK_PRICE: f64 = 97_000.0;

/// Default refresh cadence.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// Window scanned for local extrema.
const SUPPORT_RESISTANCE_WINDOW: usize = 50;

// ---------------------------------------------------------------------------
// Price source
// ---------------------------------------------------------------------------

/// A single reading from the external price source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    /// Source-reported 24h percent change
    pub change_24h: f64,
}

impl PriceQuote {
    /// Whether the quote is usable (finite, positive price).
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0 && self.change_24h.is_finite()
    }
}

/// Abstraction over the external price source for the tracked instrument.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the latest price and 24h change.
    async fn fetch_quote(&self) -> Result<PriceQuote>;
}

// ---------------------------------------------------------------------------
// Derived readings
// ---------------------------------------------------------------------------

/// Trend classification from the 5- and 20-period averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendPattern {
    StrongUptrend,
    WeakUptrend,
    StrongDowntrend,
    WeakDowntrend,
    Sideways,
    InsufficientData,
}

impl TrendPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendPattern::StrongUptrend => "strong_uptrend",
            TrendPattern::WeakUptrend => "weak_uptrend",
            TrendPattern::StrongDowntrend => "strong_downtrend",
            TrendPattern::WeakDowntrend => "weak_downtrend",
            TrendPattern::Sideways => "sideways",
            TrendPattern::InsufficientData => "insufficient_data",
        }
    }
}

impl fmt::Display for TrendPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Support and resistance levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub support: f64,
    pub resistance: f64,
}

// ---------------------------------------------------------------------------
// Rolling history
// ---------------------------------------------------------------------------

/// Bounded FIFO price history plus the statistics derived from it.
///
/// This is a plain value: the feed owns one behind a lock and hands out
/// clones as snapshots for the tools.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    samples: VecDeque<f64>,
    capacity: usize,
    fallback_price: f64,
    last_good: Option<f64>,
    change_24h: f64,
    updated_at: Option<DateTime<Utc>>,
    sample_interval_secs: u64,
}

impl PriceHistory {
    pub fn new(capacity: usize, fallback_price: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            fallback_price,
            last_good: None,
            change_24h: 0.0,
            updated_at: None,
            sample_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }

    /// Build a history from existing samples (oldest first). The last
    /// sample becomes the last known good price.
    pub fn from_samples(samples: &[f64], capacity: usize, fallback_price: f64) -> Self {
        let mut history = Self::new(capacity, fallback_price);
        for &p in samples {
            history.push(p);
        }
        history
    }

    /// Set the sampling cadence used to convert wall-clock spans to periods.
    pub fn with_sample_interval(mut self, secs: u64) -> Self {
        self.sample_interval_secs = secs.max(1);
        self
    }

    /// Append a price, evicting the oldest sample when full.
    pub fn push(&mut self, price: f64) {
        self.samples.push_back(price);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.last_good = Some(price);
    }

    /// Record a successful quote.
    pub fn record(&mut self, quote: PriceQuote, at: DateTime<Utc>) {
        self.push(quote.price);
        self.change_24h = quote.change_24h;
        self.updated_at = Some(at);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether at least one real price has been observed.
    pub fn has_observation(&self) -> bool {
        self.last_good.is_some()
    }

    /// Last known good price, or the fallback constant.
    pub fn current_price(&self) -> f64 {
        self.last_good.unwrap_or(self.fallback_price)
    }

    /// Source-reported 24h change from the latest successful fetch.
    pub fn change_24h(&self) -> f64 {
        self.change_24h
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    /// Number of samples that make up one hour at the current cadence.
    pub fn periods_per_hour(&self) -> usize {
        self.periods_for_minutes(60)
    }

    /// Samples spanning `minutes` of wall-clock time, at least one.
    pub fn periods_for_minutes(&self, minutes: u64) -> usize {
        ((minutes * 60 / self.sample_interval_secs.max(1)) as usize).max(1)
    }

    /// Full rolling window, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// The last `n` samples, oldest first. Caller guarantees `n <= len`.
    fn tail(&self, n: usize) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().skip(self.samples.len() - n).copied()
    }

    /// Mean of the last `n` samples, taken as offsets from the window's
    /// first sample so a constant window returns that value exactly.
    /// Caller guarantees `0 < n <= len`.
    fn window_mean(&self, n: usize) -> f64 {
        let mut window = self.tail(n);
        let Some(first) = window.next() else {
            return self.current_price();
        };
        first + window.map(|p| p - first).sum::<f64>() / n as f64
    }

    /// Price `n` samples back from the most recent one.
    pub fn price_n_periods_ago(&self, n: usize) -> Option<f64> {
        let len = self.samples.len();
        if len < n + 1 {
            return None;
        }
        self.samples.get(len - 1 - n).copied()
    }

    /// Percent change over `periods` samples; 0 with insufficient history.
    pub fn percent_change(&self, periods: usize) -> f64 {
        let (Some(latest), Some(old)) = (self.latest(), self.price_n_periods_ago(periods)) else {
            return 0.0;
        };
        if old == 0.0 {
            return 0.0;
        }
        (latest - old) / old * 100.0
    }

    /// Mean of the last `periods` samples; the current price when the
    /// history is shorter than the window.
    pub fn moving_average(&self, periods: usize) -> f64 {
        if periods == 0 || self.samples.len() < periods {
            return self.current_price();
        }
        self.window_mean(periods)
    }

    /// Mean of the last `periods` samples, shrinking the window to what is
    /// available. The current price on an empty history.
    pub fn trailing_mean(&self, periods: usize) -> f64 {
        let n = periods.min(self.samples.len());
        if n == 0 {
            return self.current_price();
        }
        self.window_mean(n)
    }

    /// Relative Strength Index over the last `periods` deltas.
    pub fn rsi(&self, periods: usize) -> f64 {
        let len = self.samples.len();
        if periods == 0 || len < periods + 1 {
            return 50.0;
        }

        let mut gains = 0.0;
        let mut losses = 0.0;
        for i in (len - periods)..len {
            let change = self.samples[i] - self.samples[i - 1];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }

        let avg_gain = gains / periods as f64;
        let avg_loss = losses / periods as f64;
        if avg_loss == 0.0 {
            return 100.0;
        }
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }

    /// Population standard deviation of the last `periods` samples as a
    /// percent of their mean.
    pub fn volatility(&self, periods: usize) -> f64 {
        if periods == 0 || self.samples.len() < periods {
            return 0.0;
        }
        let mean = self.window_mean(periods);
        if mean == 0.0 {
            return 0.0;
        }
        let variance = self
            .tail(periods)
            .map(|p| (p - mean).powi(2))
            .sum::<f64>()
            / periods as f64;
        variance.sqrt() / mean * 100.0
    }

    /// Classify the recent trend from the 5- and 20-period averages.
    pub fn detect_pattern(&self) -> TrendPattern {
        if self.samples.len() < 20 {
            return TrendPattern::InsufficientData;
        }
        let ma20 = self.window_mean(20);
        let ma5 = self.window_mean(5);
        let current = self.latest().unwrap_or(ma5);

        if ma5 > ma20 && current > ma5 {
            TrendPattern::StrongUptrend
        } else if ma5 > ma20 && current < ma5 {
            TrendPattern::WeakUptrend
        } else if ma5 < ma20 && current < ma5 {
            TrendPattern::StrongDowntrend
        } else if ma5 < ma20 && current > ma5 {
            TrendPattern::WeakDowntrend
        } else {
            TrendPattern::Sideways
        }
    }

    /// Lowest local minimum and highest local maximum of the last 50
    /// samples, with ±5% fallbacks.
    pub fn support_resistance(&self) -> Levels {
        let current = self.current_price();
        let fallback = Levels {
            support: current * 0.95,
            resistance: current * 1.05,
        };
        if self.samples.len() < SUPPORT_RESISTANCE_WINDOW {
            return fallback;
        }

        let recent: Vec<f64> = self.tail(SUPPORT_RESISTANCE_WINDOW).collect();
        let mut support: Option<f64> = None;
        let mut resistance: Option<f64> = None;
        for w in recent.windows(3) {
            let (prev, p, next) = (w[0], w[1], w[2]);
            if p < prev && p < next {
                support = Some(support.map_or(p, |s: f64| s.min(p)));
            }
            if p > prev && p > next {
                resistance = Some(resistance.map_or(p, |r: f64| r.max(p)));
            }
        }

        Levels {
            support: support.unwrap_or(fallback.support),
            resistance: resistance.unwrap_or(fallback.resistance),
        }
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Tunables for a [`PriceFeed`].
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub capacity: usize,
    pub fallback_price: f64,
    pub refresh_interval: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
            fallback_price: DEFAULT_FALLBACK_PRICE,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        }
    }
}

/// The authoritative price series, shared by the refresh loop (sole writer)
/// and every reader.
pub struct PriceFeed {
    source: Arc<dyn PriceSource>,
    state: RwLock<PriceHistory>,
    refresh_interval: Duration,
}

impl PriceFeed {
    pub fn new(source: Arc<dyn PriceSource>, settings: FeedSettings) -> Self {
        let history = PriceHistory::new(settings.capacity, settings.fallback_price)
            .with_sample_interval(settings.refresh_interval.as_secs());
        Self {
            source,
            state: RwLock::new(history),
            refresh_interval: settings.refresh_interval,
        }
    }

    /// Build a feed over a pre-filled history (replay and tests).
    pub fn with_history(source: Arc<dyn PriceSource>, history: PriceHistory) -> Self {
        let refresh_interval = history.sample_interval();
        Self {
            source,
            state: RwLock::new(history),
            refresh_interval,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Fetch the latest quote and append it to the history.
    ///
    /// On failure the last known good price (or the fallback) is returned
    /// with a zero change; the error is only logged.
    pub async fn refresh(&self) -> PriceQuote {
        match self.source.fetch_quote().await {
            Ok(quote) if quote.is_valid() => {
                let mut state = self.state.write().await;
                state.record(quote, Utc::now());
                debug!(
                    price = quote.price,
                    change_24h = quote.change_24h,
                    samples = state.len(),
                    "Price refreshed"
                );
                quote
            }
            Ok(quote) => {
                warn!(price = quote.price, "Discarding malformed price quote");
                self.stale_quote().await
            }
            Err(e) => {
                warn!(error = %e, "Price fetch failed, serving last known price");
                self.stale_quote().await
            }
        }
    }

    async fn stale_quote(&self) -> PriceQuote {
        PriceQuote {
            price: self.current_price().await,
            change_24h: 0.0,
        }
    }

    /// A consistent copy of the current state for analysis.
    pub async fn snapshot(&self) -> PriceHistory {
        self.state.read().await.clone()
    }

    pub async fn has_observation(&self) -> bool {
        self.state.read().await.has_observation()
    }

    pub async fn current_price(&self) -> f64 {
        self.state.read().await.current_price()
    }

    pub async fn history(&self) -> Vec<f64> {
        self.state.read().await.samples()
    }

    pub async fn price_n_periods_ago(&self, n: usize) -> Option<f64> {
        self.state.read().await.price_n_periods_ago(n)
    }

    pub async fn percent_change(&self, periods: usize) -> f64 {
        self.state.read().await.percent_change(periods)
    }

    pub async fn moving_average(&self, periods: usize) -> f64 {
        self.state.read().await.moving_average(periods)
    }

    pub async fn rsi(&self, periods: usize) -> f64 {
        self.state.read().await.rsi(periods)
    }

    pub async fn volatility(&self, periods: usize) -> f64 {
        self.state.read().await.volatility(periods)
    }

    pub async fn detect_pattern(&self) -> TrendPattern {
        self.state.read().await.detect_pattern()
    }

    pub async fn support_resistance(&self) -> Levels {
        self.state.read().await.support_resistance()
    }
}

/// Refresh the feed on its interval for the lifetime of the process.
///
/// The first refresh runs one interval after spawning; callers seed the
/// feed with an initial [`PriceFeed::refresh`] beforehand.
pub fn spawn_refresh_loop(feed: Arc<PriceFeed>) -> JoinHandle<()> {
    let period = feed.refresh_interval();
    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Price refresh loop started");
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            feed.refresh().await;
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
