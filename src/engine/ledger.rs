//! Reputation ledger: voting weight and correct-prediction counts, read
//! from persisted predictions. The ledger never writes.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::storage::PredictionStore;
use crate::strategy::Strategy;

/// Weight every agent holds before any correct prediction.
pub const BASELINE_VOTE_WEIGHT: u64 = 1;

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    pub agent_id: String,
    pub name: String,
    pub strategy: Strategy,
    pub enabled: bool,
    pub vote_weight: u64,
    pub correct_predictions: u64,
    pub total_predictions: u64,
    /// Percent of resolved predictions that were correct
    pub accuracy: f64,
}

#[derive(Clone)]
pub struct ReputationLedger {
    store: Arc<dyn PredictionStore>,
}

impl ReputationLedger {
    pub fn new(store: Arc<dyn PredictionStore>) -> Self {
        Self { store }
    }

    /// 1 + the recorded weight of every correct prediction.
    pub async fn vote_weight(&self, agent_id: &str) -> Result<u64> {
        let earned = self.store.sum_correct_vote_weight(agent_id).await?;
        Ok(BASELINE_VOTE_WEIGHT + earned)
    }

    pub async fn correct_prediction_count(&self, agent_id: &str) -> Result<u64> {
        self.store.count_correct(agent_id).await
    }

    /// Every agent ranked by voting weight, then accuracy.
    pub async fn standings(&self) -> Result<Vec<Standing>> {
        let agents = self.store.list_agents().await?;
        let mut standings = Vec::with_capacity(agents.len());
        for summary in agents {
            let vote_weight = self.vote_weight(&summary.profile.id).await?;
            let accuracy = summary.accuracy();
            standings.push(Standing {
                agent_id: summary.profile.id,
                name: summary.profile.name,
                strategy: summary.profile.strategy,
                enabled: summary.profile.enabled,
                vote_weight,
                correct_predictions: summary.correct_predictions,
                total_predictions: summary.total_predictions,
                accuracy,
            });
        }

        standings.sort_by(|a, b| {
            b.vote_weight
                .cmp(&a.vote_weight)
                .then_with(|| b.accuracy.total_cmp(&a.accuracy))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(standings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockPredictionStore;
    use crate::types::{AgentProfile, AgentSummary};
    use mockall::predicate::eq;

    fn summary(id: &str, total: u64, correct: u64) -> AgentSummary {
        AgentSummary {
            profile: AgentProfile {
                id: id.into(),
                name: id.to_uppercase(),
                strategy: Strategy::Technical,
                enabled: true,
            },
            total_predictions: total,
            correct_predictions: correct,
        }
    }

    #[tokio::test]
    async fn test_new_agent_has_baseline_weight() {
        let mut store = MockPredictionStore::new();
        store.expect_sum_correct_vote_weight().returning(|_| Ok(0));
        let ledger = ReputationLedger::new(Arc::new(store));
        assert_eq!(ledger.vote_weight("fresh").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_weight_adds_recorded_weights() {
        let mut store = MockPredictionStore::new();
        store
            .expect_sum_correct_vote_weight()
            .with(eq("veteran"))
            .returning(|_| Ok(6));
        store.expect_count_correct().with(eq("veteran")).returning(|_| Ok(3));
        let ledger = ReputationLedger::new(Arc::new(store));
        assert_eq!(ledger.vote_weight("veteran").await.unwrap(), 7);
        assert_eq!(ledger.correct_prediction_count("veteran").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let mut store = MockPredictionStore::new();
        store
            .expect_sum_correct_vote_weight()
            .returning(|_| Err(anyhow::anyhow!("database is locked")));
        let ledger = ReputationLedger::new(Arc::new(store));
        assert!(ledger.vote_weight("a").await.is_err());
    }

    #[tokio::test]
    async fn test_standings_sorted_by_weight() {
        let mut store = MockPredictionStore::new();
        store
            .expect_list_agents()
            .returning(|| Ok(vec![summary("low", 4, 1), summary("high", 4, 3), summary("mid", 2, 2)]));
        store.expect_sum_correct_vote_weight().returning(|id| {
            Ok(match id {
                "high" => 6,
                "mid" => 4,
                _ => 2,
            })
        });
        let ledger = ReputationLedger::new(Arc::new(store));

        let standings = ledger.standings().await.unwrap();
        let order: Vec<&str> = standings.iter().map(|s| s.agent_id.as_str()).collect();
        assert_eq!(order, vec!["high", "mid", "low"]);
        assert_eq!(standings[0].vote_weight, 7);
        assert!((standings[0].accuracy - 75.0).abs() < 1e-9);
    }
}
