//! Shared types for the town oracle.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the feed, tool, engine and
//! storage modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::strategy::Strategy;

// ---------------------------------------------------------------------------
// Resolution constants
// ---------------------------------------------------------------------------

/// A resolved prediction is correct when it lands within this fraction of
/// the realized price.
pub const CORRECT_TOLERANCE: f64 = 0.02;

/// Vote weight recorded on a correct resolution.
pub const CORRECT_VOTE_WEIGHT: u32 = 2;

/// Vote weight recorded on an incorrect resolution.
pub const INCORRECT_VOTE_WEIGHT: u32 = 1;

/// Percent move (either way) below which a realized move counts as flat.
pub const FLAT_BAND_PCT: f64 = 0.1;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Price direction, predicted or realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    /// Classify a percent change using the ±0.1% flat band.
    pub fn from_change_pct(change_pct: f64) -> Self {
        if change_pct > FLAT_BAND_PCT {
            Direction::Up
        } else if change_pct < -FLAT_BAND_PCT {
            Direction::Down
        } else {
            Direction::Flat
        }
    }

    /// Direction of the move from `from` to `to`. A non-positive base is flat.
    pub fn between(from: f64, to: f64) -> Self {
        if from <= 0.0 {
            return Direction::Flat;
        }
        Self::from_change_pct((to - from) / from * 100.0)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "flat" => Ok(Direction::Flat),
            _ => Err(anyhow::anyhow!("Unknown direction: {s}")),
        }
    }
}

/// Resolution state of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Correct,
    Incorrect,
    Pending,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Correct => "correct",
            Outcome::Incorrect => "incorrect",
            Outcome::Pending => "pending",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "correct" => Ok(Outcome::Correct),
            "incorrect" => Ok(Outcome::Incorrect),
            "pending" => Ok(Outcome::Pending),
            _ => Err(anyhow::anyhow!("Unknown outcome: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Prediction record
// ---------------------------------------------------------------------------

/// A forecast made by one agent for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Price at prediction time
    pub current_price: f64,
    /// Projected price
    pub predicted_price: f64,
    pub prediction_direction: Direction,
    /// `None` until resolved ("pending")
    pub actual_direction: Option<Direction>,
    pub outcome: Outcome,
    /// Mean confidence of the tools that contributed
    pub confidence: f64,
    /// Joined tool rationale, capped at 500 characters
    pub reasoning: String,
}

impl fmt::Display for PredictionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actual = self
            .actual_direction
            .map(|d| d.as_str())
            .unwrap_or("pending");
        write!(
            f,
            "{} ${:.2} → ${:.2} (conf={:.0}%) actual={} outcome={}",
            self.prediction_direction,
            self.current_price,
            self.predicted_price,
            self.confidence * 100.0,
            actual,
            self.outcome,
        )
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// An agent as the prediction core sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub strategy: Strategy,
    pub enabled: bool,
}

impl fmt::Display for AgentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({})", self.name, self.id, self.strategy)
    }
}

/// An agent plus the accuracy counters maintained by resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub profile: AgentProfile,
    pub total_predictions: u64,
    pub correct_predictions: u64,
}

impl AgentSummary {
    /// Accuracy as a percentage. Returns 0.0 if nothing has resolved.
    pub fn accuracy(&self) -> f64 {
        if self.total_predictions == 0 {
            0.0
        } else {
            (self.correct_predictions as f64 / self.total_predictions as f64) * 100.0
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Per-agent result of resolving one prediction in a round batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrediction {
    pub prediction_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub predicted_price: f64,
    pub actual_price: f64,
    pub actual_direction: Direction,
    pub is_correct: bool,
    pub vote_weight: u32,
}

/// Judge a predicted price against the realized one.
///
/// Returns the correctness flag and the vote weight to record.
pub fn judge_prediction(predicted_price: f64, actual_price: f64) -> (bool, u32) {
    if actual_price <= 0.0 || !actual_price.is_finite() || !predicted_price.is_finite() {
        return (false, INCORRECT_VOTE_WEIGHT);
    }
    let miss = (predicted_price - actual_price).abs() / actual_price;
    if miss < CORRECT_TOLERANCE {
        (true, CORRECT_VOTE_WEIGHT)
    } else {
        (false, INCORRECT_VOTE_WEIGHT)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Price source error ({source_name}): {message}")]
    PriceSource { source_name: String, message: String },

    #[error("Tool error ({tool}): {message}")]
    Tool { tool: String, message: String },

    #[error("Tool timed out after {timeout_ms}ms: {tool}")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
