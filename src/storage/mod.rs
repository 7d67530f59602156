//! Persistence layer.
//!
//! Predictions are keyed by (round, agent). Resolution mutates the existing
//! rows for a round in a single batch and returns per-agent outcomes for
//! broadcast. The vote-weight aggregates are pure reads over resolved rows.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentProfile, AgentSummary, PredictionRecord, ResolvedPrediction};

pub use sqlite::SqliteStore;

/// Default SQLite database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://town_oracle.db";

/// A persisted prediction with its round key and resolution details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrediction {
    pub round: u64,
    pub agent_id: String,
    pub record: PredictionRecord,
    /// Price the round was resolved against
    pub actual_price: Option<f64>,
    pub vote_weight: Option<u32>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Storage backend for agents and predictions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Persist a new pending prediction for `(round, agent_id)`.
    ///
    /// Returns `false` when the agent already has a prediction for the
    /// round; the existing row is left untouched.
    async fn insert_prediction(
        &self,
        round: u64,
        agent_id: &str,
        record: &PredictionRecord,
    ) -> Result<bool>;

    /// Resolve every pending prediction of `round` against `actual_price`.
    ///
    /// Already-resolved rows are not touched, so a second call for the same
    /// round returns an empty list.
    async fn resolve_predictions_for_round(
        &self,
        round: u64,
        actual_price: f64,
    ) -> Result<Vec<ResolvedPrediction>>;

    /// Sum of recorded vote weights over the agent's correct predictions.
    async fn sum_correct_vote_weight(&self, agent_id: &str) -> Result<u64>;

    /// Number of the agent's correct predictions.
    async fn count_correct(&self, agent_id: &str) -> Result<u64>;

    async fn list_enabled_agents(&self) -> Result<Vec<AgentProfile>>;

    /// Every agent with its accuracy counters.
    async fn list_agents(&self) -> Result<Vec<AgentSummary>>;

    /// Insert an agent or update its name, strategy and enabled flag.
    async fn upsert_agent(&self, agent: &AgentProfile) -> Result<()>;

    async fn predictions_for_round(&self, round: u64) -> Result<Vec<StoredPrediction>>;

    /// Most recent predictions of one agent, newest first.
    async fn recent_predictions_for_agent(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredPrediction>>;
}
