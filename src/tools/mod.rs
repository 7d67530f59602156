//! Signal tool registry.
//!
//! A fixed catalog of named analysis functions. Each reads a snapshot of the
//! price feed and returns a typed [`Signal`] with a confidence and a one-line
//! rationale. The bullish/bearish reading of a signal is an exhaustive match
//! in [`Signal::bias`], so what counts as a vote is auditable in one place.

pub mod market;
pub mod technical;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::feed::{PriceHistory, TrendPattern};
use crate::types::{Direction, OracleError};

/// Catalog names, as referenced by the strategy mapping.
pub mod names {
    pub const RSI: &str = "analyze_rsi";
    pub const MOMENTUM: &str = "analyze_momentum";
    pub const VOLATILITY: &str = "analyze_volatility";
    pub const SUPPORT_RESISTANCE: &str = "analyze_support_resistance";
    pub const MOVING_AVERAGES: &str = "analyze_moving_averages";
    pub const CYCLES: &str = "analyze_cycles";
    pub const ONCHAIN: &str = "analyze_onchain";
    pub const SENTIMENT: &str = "analyze_sentiment";
    pub const MEAN_REVERSION: &str = "analyze_mean_reversion";
    pub const MACRO: &str = "analyze_macro";
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// How a signal votes in the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsiZone {
    Overbought,
    Oversold,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossoverSignal {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

impl fmt::Display for CrossoverSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CrossoverSignal::StrongBullish => "strong bullish",
            CrossoverSignal::Bullish => "bullish",
            CrossoverSignal::Neutral => "neutral",
            CrossoverSignal::Bearish => "bearish",
            CrossoverSignal::StrongBearish => "strong bearish",
        })
    }
}

/// Network-health and macro outlook labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outlook {
    StrongBullish,
    ShortTermBullish,
    Bullish,
    Neutral,
    Bearish,
    ShortTermBearish,
    StrongBearish,
}

impl fmt::Display for Outlook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outlook::StrongBullish => "strong bullish",
            Outlook::ShortTermBullish => "short-term bullish",
            Outlook::Bullish => "bullish",
            Outlook::Neutral => "neutral",
            Outlook::Bearish => "bearish",
            Outlook::ShortTermBearish => "short-term bearish",
            Outlook::StrongBearish => "strong bearish",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    FearOfMissingOut,
    FearUncertaintyDoubt,
    Calm,
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mood::FearOfMissingOut => "fear_of_missing_out",
            Mood::FearUncertaintyDoubt => "fear_uncertainty_doubt",
            Mood::Calm => "calm",
        })
    }
}

/// Typed judgment produced by one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    Oscillator { rsi: f64, zone: RsiZone },
    Directional {
        change_1: f64,
        change_5: f64,
        change_15: f64,
        momentum: f64,
        direction: Direction,
    },
    Pattern { volatility: f64, pattern: TrendPattern },
    Levels {
        support: f64,
        resistance: f64,
        distance_to_support_pct: f64,
        distance_to_resistance_pct: f64,
    },
    Crossover {
        ma5: f64,
        ma20: f64,
        ma50: f64,
        signal: CrossoverSignal,
    },
    Cycle { hour: u32, day_of_week: u32, note: String },
    NetworkHealth { change_1h: f64, change_24h: f64, health: Outlook },
    Sentiment { mood: Mood, change_1h: f64 },
    Deviation {
        percent: f64,
        ma20: f64,
        expected_reversion: Option<Direction>,
    },
    Macro { change_24h: f64, change_7d: f64, outlook: Outlook },
}

impl Signal {
    /// Vote of this signal in the aggregate.
    ///
    /// Only oscillator zones, momentum direction, MA crossovers and mean
    /// reversion expectations vote. The remaining signals are advisory.
    pub fn bias(&self) -> Bias {
        match self {
            // Overbought votes bearish only. The older string-matched label
            // hit both marker sets and cancelled out, so this shifts margins.
            Signal::Oscillator { zone, .. } => match zone {
                RsiZone::Oversold => Bias::Bullish,
                RsiZone::Overbought => Bias::Bearish,
                RsiZone::Neutral => Bias::Neutral,
            },
            Signal::Directional { direction, .. } => match direction {
                Direction::Up => Bias::Bullish,
                Direction::Down => Bias::Bearish,
                Direction::Flat => Bias::Neutral,
            },
            Signal::Crossover { signal, .. } => match signal {
                CrossoverSignal::StrongBullish | CrossoverSignal::Bullish => Bias::Bullish,
                CrossoverSignal::StrongBearish | CrossoverSignal::Bearish => Bias::Bearish,
                CrossoverSignal::Neutral => Bias::Neutral,
            },
            Signal::Deviation { expected_reversion, .. } => match expected_reversion {
                Some(Direction::Up) => Bias::Bullish,
                Some(Direction::Down) => Bias::Bearish,
                Some(Direction::Flat) | None => Bias::Neutral,
            },
            Signal::Pattern { .. }
            | Signal::Levels { .. }
            | Signal::Cycle { .. }
            | Signal::NetworkHealth { .. }
            | Signal::Sentiment { .. }
            | Signal::Macro { .. } => Bias::Neutral,
        }
    }
}

/// Output of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub signal: Signal,
    /// Conventionally in [0, 1]
    pub confidence: f64,
    pub reasoning: String,
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// Everything a tool may read.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub history: PriceHistory,
    pub current_price: f64,
    pub now: DateTime<Utc>,
}

impl ToolContext {
    pub fn new(history: PriceHistory, now: DateTime<Utc>) -> Self {
        let current_price = history.current_price();
        Self {
            history,
            current_price,
            now,
        }
    }
}

/// A named analysis function.
#[async_trait]
pub trait SignalTool: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(&self, ctx: &ToolContext) -> Result<ToolResult>;
}

/// Adapter turning a pure function into a [`SignalTool`].
pub struct FnTool {
    name: &'static str,
    func: fn(&ToolContext) -> Result<ToolResult>,
}

impl FnTool {
    pub const fn new(name: &'static str, func: fn(&ToolContext) -> Result<ToolResult>) -> Self {
        Self { name, func }
    }
}

#[async_trait]
impl SignalTool for FnTool {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn analyze(&self, ctx: &ToolContext) -> Result<ToolResult> {
        let result = (self.func)(ctx)?;
        if !result.confidence.is_finite() {
            return Err(OracleError::Tool {
                tool: self.name.to_string(),
                message: format!("non-finite confidence {}", result.confidence),
            }
            .into());
        }
        Ok(result)
    }
}

/// Reject a reading that cannot be reasoned about.
pub(crate) fn ensure_finite(tool: &str, label: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(OracleError::Tool {
            tool: tool.to_string(),
            message: format!("{label} is not finite"),
        }
        .into())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name → tool lookup.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn SignalTool>>,
}

impl ToolRegistry {
    /// An empty registry (tests and custom catalogs).
    pub fn empty() -> Self {
        Self::default()
    }

    /// The full built-in catalog.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for tool in technical::catalog().into_iter().chain(market::catalog()) {
            registry.register(Arc::new(tool));
        }
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn SignalTool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SignalTool>> {
        self.tools.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_complete() {
        let registry = ToolRegistry::builtin();
        assert_eq!(registry.len(), 10);
        for name in [
            names::RSI,
            names::MOMENTUM,
            names::VOLATILITY,
            names::SUPPORT_RESISTANCE,
            names::MOVING_AVERAGES,
            names::CYCLES,
            names::ONCHAIN,
            names::SENTIMENT,
            names::MEAN_REVERSION,
            names::MACRO,
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        assert!(registry.get("analyze_tea_leaves").is_none());
    }

    #[test]
    fn test_bias_of_voting_signals() {
        let overbought = Signal::Oscillator { rsi: 80.0, zone: RsiZone::Overbought };
        let oversold = Signal::Oscillator { rsi: 20.0, zone: RsiZone::Oversold };
        assert_eq!(overbought.bias(), Bias::Bearish);
        assert_eq!(oversold.bias(), Bias::Bullish);

        let revert_up = Signal::Deviation {
            percent: -6.0,
            ma20: 100.0,
            expected_reversion: Some(Direction::Up),
        };
        assert_eq!(revert_up.bias(), Bias::Bullish);

        let weak_bear = Signal::Crossover {
            ma5: 1.0,
            ma20: 2.0,
            ma50: 3.0,
            signal: CrossoverSignal::Bearish,
        };
        assert_eq!(weak_bear.bias(), Bias::Bearish);
    }

    #[test]
    fn test_advisory_signals_do_not_vote() {
        let macro_bull = Signal::Macro {
            change_24h: 3.0,
            change_7d: 12.0,
            outlook: Outlook::StrongBullish,
        };
        let fomo = Signal::Sentiment { mood: Mood::FearOfMissingOut, change_1h: 2.0 };
        assert_eq!(macro_bull.bias(), Bias::Neutral);
        assert_eq!(fomo.bias(), Bias::Neutral);
    }

    #[test]
    fn test_signal_serializes_with_kind_tag() {
        let s = Signal::Oscillator { rsi: 55.0, zone: RsiZone::Neutral };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["kind"], "oscillator");
        assert_eq!(json["zone"], "neutral");
    }

    #[tokio::test]
    async fn test_fn_tool_rejects_non_finite_confidence() {
        fn broken(_: &ToolContext) -> Result<ToolResult> {
            Ok(ToolResult {
                signal: Signal::Oscillator { rsi: 50.0, zone: RsiZone::Neutral },
                confidence: f64::NAN,
                reasoning: String::new(),
            })
        }
        let tool = FnTool::new("broken", broken);
        let ctx = ToolContext::new(PriceHistory::new(10, 100.0), Utc::now());
        assert!(tool.analyze(&ctx).await.is_err());
    }
}
