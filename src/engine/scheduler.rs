//! Round scheduler.
//!
//! An explicit state machine driven by [`RoundScheduler::tick`]. The round
//! number is derived from wall-clock time; the scheduler only remembers the
//! last round it opened. When a later round is observed, the open round is
//! resolved in one batch and the new round's predictions are fanned out.
//! Rounds that pass entirely while the scheduler is not ticking are never
//! opened or resolved. No round opens before the feed has observed a real
//! price.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::events::{EventSink, RoundEvent};
use super::ledger::ReputationLedger;
use super::predictor::PredictionEngine;
use crate::storage::PredictionStore;
use crate::types::AgentProfile;

pub const DEFAULT_ROUND_DURATION_SECS: u64 = 300;
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_CONCURRENT_PREDICTIONS: usize = 4;

/// Round containing `now`: `floor(now_ms / duration_ms)`.
pub fn round_for(now: DateTime<Utc>, round_duration: Duration) -> u64 {
    let duration_ms = (round_duration.as_millis() as u64).max(1);
    now.timestamp_millis().max(0) as u64 / duration_ms
}

/// Wall-clock bounds of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoundWindow {
    pub round: u64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl RoundWindow {
    pub fn of(round: u64, round_duration: Duration) -> Option<Self> {
        let duration_ms = (round_duration.as_millis() as i64).max(1);
        let start_ms = i64::try_from(round).ok()?.checked_mul(duration_ms)?;
        Some(Self {
            round,
            starts_at: DateTime::<Utc>::from_timestamp_millis(start_ms)?,
            ends_at: DateTime::<Utc>::from_timestamp_millis(start_ms.checked_add(duration_ms)?)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub round_duration: Duration,
    pub max_concurrent_predictions: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(DEFAULT_ROUND_DURATION_SECS),
            max_concurrent_predictions: DEFAULT_MAX_CONCURRENT_PREDICTIONS,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub round: u64,
    pub resolved_round: Option<u64>,
    pub resolved: usize,
    pub opened: bool,
    pub predictions_made: usize,
    pub duplicates: usize,
    pub agent_failures: usize,
}

enum AgentOutcome {
    Stored,
    Duplicate,
    Failed,
}

pub struct RoundScheduler {
    engine: Arc<PredictionEngine>,
    store: Arc<dyn PredictionStore>,
    ledger: ReputationLedger,
    sink: Arc<dyn EventSink>,
    settings: SchedulerSettings,
    last_round: Option<u64>,
}

impl RoundScheduler {
    pub fn new(
        engine: Arc<PredictionEngine>,
        store: Arc<dyn PredictionStore>,
        sink: Arc<dyn EventSink>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            ledger: ReputationLedger::new(store.clone()),
            engine,
            store,
            sink,
            settings,
            last_round: None,
        }
    }

    /// Last round opened, if any.
    pub fn last_round(&self) -> Option<u64> {
        self.last_round
    }

    pub fn round_duration(&self) -> Duration {
        self.settings.round_duration
    }

    /// Advance the state machine to `now`. Never fails; every error is
    /// logged and shows up as missing data.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let round = round_for(now, self.settings.round_duration);
        let mut report = TickReport {
            round,
            ..TickReport::default()
        };

        match self.last_round {
            Some(last) if round == last => return report,
            Some(last) if round < last => {
                warn!(round, last_round = last, "Clock moved backwards, ignoring tick");
                return report;
            }
            Some(last) => {
                report.resolved_round = Some(last);
                report.resolved = self.resolve_round(last).await;
                if round > last + 1 {
                    info!(skipped = round - last - 1, "Rounds passed without predictions");
                }
            }
            None => {}
        }

        if !self.engine.feed().has_observation().await {
            warn!(round, "No price observed yet, round not opened");
            return report;
        }
        self.open_round(round, now, &mut report).await;
        self.last_round = Some(round);
        report
    }

    /// Resolve every pending prediction of `round` against the current
    /// price. Left pending when no real price has been observed yet.
    async fn resolve_round(&self, round: u64) -> usize {
        let feed = self.engine.feed();
        if !feed.has_observation().await {
            warn!(round, "No price observed yet, leaving round pending");
            return 0;
        }
        let actual_price = feed.current_price().await;

        let resolved = match self.store.resolve_predictions_for_round(round, actual_price).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(round, error = %e, "Round resolution failed, predictions stay pending");
                return 0;
            }
        };

        for r in &resolved {
            let total = match self.ledger.vote_weight(&r.agent_id).await {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(agent = %r.agent_id, error = %e, "Could not read vote weight");
                    None
                }
            };
            self.sink.emit(RoundEvent::prediction_resolved(round, r, total));
        }

        let correct = resolved.iter().filter(|r| r.is_correct).count();
        info!(
            round,
            actual = format!("${actual_price:.2}"),
            resolved = resolved.len(),
            correct,
            "Round closed"
        );
        resolved.len()
    }

    async fn open_round(&self, round: u64, now: DateTime<Utc>, report: &mut TickReport) {
        report.opened = true;
        let agents = match self.store.list_enabled_agents().await {
            Ok(agents) => agents,
            Err(e) => {
                error!(round, error = %e, "Could not list agents, round opens empty");
                return;
            }
        };
        info!(round, agents = agents.len(), "Round opened");

        let outcomes: Vec<AgentOutcome> = stream::iter(agents)
            .map(|agent| self.predict_for(round, agent, now))
            .buffer_unordered(self.settings.max_concurrent_predictions.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                AgentOutcome::Stored => report.predictions_made += 1,
                AgentOutcome::Duplicate => report.duplicates += 1,
                AgentOutcome::Failed => report.agent_failures += 1,
            }
        }
    }

    async fn predict_for(&self, round: u64, agent: AgentProfile, now: DateTime<Utc>) -> AgentOutcome {
        let record = self.engine.make_prediction_at(&agent, now).await;
        match self.store.insert_prediction(round, &agent.id, &record).await {
            Ok(true) => {
                debug!(round, agent = %agent.id, prediction = %record, "Prediction stored");
                self.sink.emit(RoundEvent::prediction_made(round, &agent, &record));
                AgentOutcome::Stored
            }
            Ok(false) => {
                debug!(round, agent = %agent.id, "Agent already predicted this round");
                AgentOutcome::Duplicate
            }
            Err(e) => {
                warn!(round, agent = %agent.id, error = %e, "Prediction not stored");
                AgentOutcome::Failed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
