//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (or the file named by `TOWN_ORACLE_CONFIG`) and
//! deserializes into strongly-typed structs. Every field has a default, so
//! a missing section or an empty file yields the stock town. Secrets are
//! referenced by env-var name in the config and resolved at runtime.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::engine::scheduler::{
    SchedulerSettings, DEFAULT_MAX_CONCURRENT_PREDICTIONS, DEFAULT_ROUND_DURATION_SECS,
    DEFAULT_TICK_INTERVAL_SECS,
};
use crate::engine::predictor::DEFAULT_TOOL_TIMEOUT_MS;
use crate::feed::coingecko::DEFAULT_BASE_URL;
use crate::feed::{
    FeedSettings, DEFAULT_FALLBACK_PRICE, DEFAULT_HISTORY_CAPACITY, DEFAULT_REFRESH_INTERVAL_SECS,
};
use crate::storage::DEFAULT_DATABASE_URL;
use crate::strategy::Strategy;
use crate::types::{AgentProfile, OracleError};

/// Env var overriding the config file path.
pub const CONFIG_PATH_ENV: &str = "TOWN_ORACLE_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub rounds: RoundsConfig,
    pub storage: StorageConfig,
    pub dashboard: DashboardConfig,
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    pub coin_id: String,
    pub vs_currency: String,
    pub refresh_interval_secs: u64,
    pub history_capacity: usize,
    pub fallback_price: f64,
    pub request_timeout_secs: u64,
    /// Name of the env var holding a CoinGecko demo key.
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RoundsConfig {
    pub round_duration_secs: u64,
    pub tick_interval_secs: u64,
    pub tool_timeout_ms: u64,
    pub max_concurrent_predictions: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
    /// Recent events kept for `/api/events`.
    pub event_buffer: usize,
}

/// One seeded agent.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    /// Strategy identifier; unknown values fall back to `ai_analysis`.
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            rounds: RoundsConfig::default(),
            storage: StorageConfig::default(),
            dashboard: DashboardConfig::default(),
            agents: default_agents(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            coin_id: "bitcoin".to_string(),
            vs_currency: "usd".to_string(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            fallback_price: DEFAULT_FALLBACK_PRICE,
            request_timeout_secs: 10,
            api_key_env: None,
        }
    }
}

impl Default for RoundsConfig {
    fn default() -> Self {
        Self {
            round_duration_secs: DEFAULT_ROUND_DURATION_SECS,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            max_concurrent_predictions: DEFAULT_MAX_CONCURRENT_PREDICTIONS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            event_buffer: 200,
        }
    }
}

/// The town's stock roster, one agent per strategy.
pub fn default_agents() -> Vec<AgentConfig> {
    [
        ("chart-master", "ChartMaster", "technical"),
        ("satoshi-oracle", "SatoshiOracle", "onchain"),
        ("momentum-maven", "MomentumMaven", "momentum"),
        ("mean-reversion-mike", "MeanReversionMike", "mean_reversion"),
        ("cycle-sarah", "CycleSarah", "cycle"),
        ("sentiment-sam", "SentimentSam", "sentiment"),
        ("macro-mary", "MacroMary", "macro"),
        ("ai-brain", "AIBrain", "ai_analysis"),
    ]
    .into_iter()
    .map(|(id, name, strategy)| AgentConfig {
        id: id.to_string(),
        name: name.to_string(),
        strategy: Some(strategy.to_string()),
        enabled: true,
    })
    .collect()
}

impl AgentConfig {
    pub fn to_profile(&self) -> AgentProfile {
        AgentProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            strategy: Strategy::from_identifier(self.strategy.as_deref()),
            enabled: self.enabled,
        }
    }
}

impl FeedConfig {
    pub fn settings(&self) -> FeedSettings {
        FeedSettings {
            capacity: self.history_capacity,
            fallback_price: self.fallback_price,
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The demo API key, if an env var is configured and set.
    pub fn api_key(&self) -> Option<SecretString> {
        let env = self.api_key_env.as_deref()?;
        AppConfig::resolve_env(env).ok().map(SecretString::new)
    }
}

impl RoundsConfig {
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            round_duration: Duration::from_secs(self.round_duration_secs),
            max_concurrent_predictions: self.max_concurrent_predictions,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load from `TOWN_ORACLE_CONFIG` or `config.toml`, falling back to the
    /// defaults when the file does not exist.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        if Path::new(&path).exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> { Err(OracleError::Config(msg.to_string()).into()) };

        if self.feed.refresh_interval_secs == 0 {
            return invalid("feed.refresh_interval_secs must be > 0");
        }
        if self.feed.history_capacity == 0 {
            return invalid("feed.history_capacity must be > 0");
        }
        if !(self.feed.fallback_price.is_finite() && self.feed.fallback_price > 0.0) {
            return invalid("feed.fallback_price must be positive");
        }
        if self.feed.request_timeout_secs == 0 {
            return invalid("feed.request_timeout_secs must be > 0");
        }
        if self.rounds.round_duration_secs == 0 {
            return invalid("rounds.round_duration_secs must be > 0");
        }
        if self.rounds.tick_interval_secs == 0 {
            return invalid("rounds.tick_interval_secs must be > 0");
        }
        if self.rounds.tool_timeout_ms == 0 {
            return invalid("rounds.tool_timeout_ms must be > 0");
        }
        if self.rounds.max_concurrent_predictions == 0 {
            return invalid("rounds.max_concurrent_predictions must be > 0");
        }
        if self.dashboard.event_buffer == 0 {
            return invalid("dashboard.event_buffer must be > 0");
        }

        let mut ids = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return invalid("agent id must not be empty");
            }
            if !ids.insert(agent.id.as_str()) {
                return Err(OracleError::Config(format!("duplicate agent id: {}", agent.id)).into());
            }
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
