//! Strategy → tool mapping.
//!
//! Each agent specialises through a strategy identifier; the strategy
//! selects an ordered subset of the signal tool catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::tools::names;

/// Prediction strategy identifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Technical,
    Sentiment,
    Onchain,
    Momentum,
    MeanReversion,
    Cycle,
    Macro,
    #[default]
    AiAnalysis,
}

impl Strategy {
    /// All known strategies (useful for iteration).
    pub const ALL: &'static [Strategy] = &[
        Strategy::Technical,
        Strategy::Sentiment,
        Strategy::Onchain,
        Strategy::Momentum,
        Strategy::MeanReversion,
        Strategy::Cycle,
        Strategy::Macro,
        Strategy::AiAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Technical => "technical",
            Strategy::Sentiment => "sentiment",
            Strategy::Onchain => "onchain",
            Strategy::Momentum => "momentum",
            Strategy::MeanReversion => "mean_reversion",
            Strategy::Cycle => "cycle",
            Strategy::Macro => "macro",
            Strategy::AiAnalysis => "ai_analysis",
        }
    }

    /// Resolve an identifier, falling back to `ai_analysis` for unknown or
    /// missing values.
    pub fn from_identifier(identifier: Option<&str>) -> Self {
        match identifier {
            Some(s) => s.parse().unwrap_or_else(|_| {
                warn!(strategy = s, "Unknown strategy, using ai_analysis");
                Strategy::AiAnalysis
            }),
            None => Strategy::AiAnalysis,
        }
    }

    /// The ordered tool list for this strategy.
    pub fn tools(&self) -> &'static [&'static str] {
        match self {
            Strategy::Technical => &[
                names::RSI,
                names::MOMENTUM,
                names::MOVING_AVERAGES,
                names::SUPPORT_RESISTANCE,
                names::VOLATILITY,
            ],
            Strategy::Sentiment => &[names::SENTIMENT, names::MOMENTUM, names::CYCLES],
            Strategy::Onchain => &[names::ONCHAIN, names::MOMENTUM, names::VOLATILITY],
            Strategy::Momentum => &[names::MOMENTUM, names::MOVING_AVERAGES, names::RSI],
            Strategy::MeanReversion => &[names::MEAN_REVERSION, names::SUPPORT_RESISTANCE],
            Strategy::Cycle => &[names::CYCLES, names::MOMENTUM, names::SUPPORT_RESISTANCE],
            Strategy::Macro => &[names::MACRO, names::ONCHAIN, names::MOMENTUM],
            Strategy::AiAnalysis => &[
                names::RSI,
                names::MOMENTUM,
                names::VOLATILITY,
                names::SUPPORT_RESISTANCE,
                names::MOVING_AVERAGES,
                names::ONCHAIN,
            ],
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = crate::types::OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "technical" => Ok(Strategy::Technical),
            "sentiment" => Ok(Strategy::Sentiment),
            "onchain" | "on_chain" => Ok(Strategy::Onchain),
            "momentum" => Ok(Strategy::Momentum),
            "mean_reversion" => Ok(Strategy::MeanReversion),
            "cycle" => Ok(Strategy::Cycle),
            "macro" => Ok(Strategy::Macro),
            "ai_analysis" => Ok(Strategy::AiAnalysis),
            _ => Err(crate::types::OracleError::UnknownStrategy(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    #[test]
    fn test_unknown_strategy_falls_back() {
        assert_eq!(Strategy::from_identifier(Some("astrology")), Strategy::AiAnalysis);
        assert_eq!(Strategy::from_identifier(None), Strategy::AiAnalysis);
        assert_eq!(
            Strategy::from_identifier(Some("astrology")).tools(),
            Strategy::AiAnalysis.tools()
        );
    }

    #[test]
    fn test_identifiers_round_trip() {
        for s in Strategy::ALL {
            assert_eq!(s.as_str().parse::<Strategy>().unwrap(), *s);
            let json = serde_json::to_string(s).unwrap();
            assert_eq!(json, format!("\"{}\"", s.as_str()));
        }
    }

    #[test]
    fn test_momentum_tool_order() {
        assert_eq!(
            Strategy::Momentum.tools(),
            &["analyze_momentum", "analyze_moving_averages", "analyze_rsi"]
        );
    }

    #[test]
    fn test_ai_analysis_is_broadest() {
        let broadest = Strategy::AiAnalysis.tools().len();
        assert!(Strategy::ALL.iter().all(|s| s.tools().len() <= broadest));
    }

    #[test]
    fn test_every_mapped_tool_is_registered() {
        let registry = ToolRegistry::builtin();
        for s in Strategy::ALL {
            for tool in s.tools() {
                assert!(registry.get(tool).is_some(), "{tool} missing for {s}");
            }
        }
    }
}
