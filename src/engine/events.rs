//! Round events and the broadcast collaborator.
//!
//! The scheduler emits one event per stored prediction and one per resolved
//! prediction. Transport is the sink's business; the default sink logs and
//! fans out over a `tokio::sync::broadcast` channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::types::{AgentProfile, Direction, PredictionRecord, ResolvedPrediction};

/// Reasoning carried on a `prediction_made` event is cut to this many chars.
pub const EVENT_REASONING_LIMIT: usize = 200;

/// Default broadcast channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    PredictionMade {
        round: u64,
        agent_id: String,
        agent_name: String,
        current_price: f64,
        predicted_price: f64,
        direction: Direction,
        confidence: f64,
        reasoning: String,
        timestamp: DateTime<Utc>,
    },
    PredictionResolved {
        round: u64,
        agent_id: String,
        agent_name: String,
        is_correct: bool,
        /// Weight recorded on this prediction
        vote_weight: u32,
        /// Agent's voting weight after this resolution, when it could be read
        total_vote_weight: Option<u64>,
        predicted_price: f64,
        actual_price: f64,
        actual_direction: Direction,
    },
}

impl RoundEvent {
    pub fn prediction_made(round: u64, agent: &AgentProfile, record: &PredictionRecord) -> Self {
        RoundEvent::PredictionMade {
            round,
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            current_price: record.current_price,
            predicted_price: record.predicted_price,
            direction: record.prediction_direction,
            confidence: record.confidence,
            reasoning: record.reasoning.chars().take(EVENT_REASONING_LIMIT).collect(),
            timestamp: record.timestamp,
        }
    }

    pub fn prediction_resolved(
        round: u64,
        resolved: &ResolvedPrediction,
        total_vote_weight: Option<u64>,
    ) -> Self {
        RoundEvent::PredictionResolved {
            round,
            agent_id: resolved.agent_id.clone(),
            agent_name: resolved.agent_name.clone(),
            is_correct: resolved.is_correct,
            vote_weight: resolved.vote_weight,
            total_vote_weight,
            predicted_price: resolved.predicted_price,
            actual_price: resolved.actual_price,
            actual_direction: resolved.actual_direction,
        }
    }

    pub fn round(&self) -> u64 {
        match self {
            RoundEvent::PredictionMade { round, .. } | RoundEvent::PredictionResolved { round, .. } => {
                *round
            }
        }
    }

    pub fn agent_id(&self) -> &str {
        match self {
            RoundEvent::PredictionMade { agent_id, .. }
            | RoundEvent::PredictionResolved { agent_id, .. } => agent_id,
        }
    }
}

/// Write-only event destination.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RoundEvent);
}

/// Logs every event and publishes it to broadcast subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<RoundEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: RoundEvent) {
        match &event {
            RoundEvent::PredictionMade {
                round,
                agent_name,
                predicted_price,
                direction,
                ..
            } => info!(
                round,
                agent = %agent_name,
                direction = %direction,
                predicted = format!("${predicted_price:.2}"),
                "Prediction made"
            ),
            RoundEvent::PredictionResolved {
                round,
                agent_name,
                is_correct,
                vote_weight,
                actual_price,
                ..
            } => info!(
                round,
                agent = %agent_name,
                correct = is_correct,
                vote_weight,
                actual = format!("${actual_price:.2}"),
                "Prediction resolved"
            ),
        }

        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}
