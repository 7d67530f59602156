//! Full round lifecycle: open, resolve, reopen, restart.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_test::assert_ok;
use tower::ServiceExt;

use town_oracle::dashboard::{self, DashboardState};
use town_oracle::engine::{
    BroadcastSink, PredictionEngine, ReputationLedger, RoundEvent, RoundScheduler,
    SchedulerSettings,
};
use town_oracle::feed::{FeedSettings, PriceFeed};
use town_oracle::storage::{PredictionStore, SqliteStore};
use town_oracle::strategy::Strategy;
use town_oracle::tools::ToolRegistry;
use town_oracle::types::{judge_prediction, AgentProfile, Outcome};

use crate::scripted_source::ScriptedSource;

const ROUND_SECS: i64 = 300;
const ROUND: u64 = 5_800_000;

fn at(round: u64, offset_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(round as i64 * ROUND_SECS + offset_secs, 0)
        .unwrap()
}

fn profile(id: &str, name: &str, strategy: Strategy) -> AgentProfile {
    AgentProfile {
        id: id.into(),
        name: name.into(),
        strategy,
        enabled: true,
    }
}

struct Town {
    source: ScriptedSource,
    feed: Arc<PriceFeed>,
    store: Arc<SqliteStore>,
    sink: Arc<BroadcastSink>,
    events: broadcast::Receiver<RoundEvent>,
}

impl Town {
    async fn new() -> Self {
        let source = ScriptedSource::new();
        let feed = Arc::new(PriceFeed::new(
            Arc::new(source.clone()),
            FeedSettings {
                capacity: 500,
                fallback_price: 97_000.0,
                refresh_interval: Duration::from_secs(60),
            },
        ));
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        for agent in [
            profile("momentum-maven", "MomentumMaven", Strategy::Momentum),
            profile("cycle-sarah", "CycleSarah", Strategy::Cycle),
        ] {
            assert_ok!(store.upsert_agent(&agent).await);
        }
        let sink = Arc::new(BroadcastSink::new(64));
        let events = sink.subscribe();
        Self {
            source,
            feed,
            store,
            sink,
            events,
        }
    }

    fn scheduler(&self) -> RoundScheduler {
        let engine = Arc::new(PredictionEngine::new(
            self.feed.clone(),
            ToolRegistry::builtin(),
            Duration::from_secs(2),
        ));
        RoundScheduler::new(
            engine,
            self.store.clone(),
            self.sink.clone(),
            SchedulerSettings {
                round_duration: Duration::from_secs(ROUND_SECS as u64),
                max_concurrent_predictions: 2,
            },
        )
    }

    /// Feed `prices` through the real refresh path.
    async fn observe(&self, prices: &[f64]) {
        for &p in prices {
            self.source.push_price(p);
            let quote = self.feed.refresh().await;
            assert_eq!(quote.price, p);
        }
    }

    fn drain_events(&mut self) -> Vec<RoundEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

#[tokio::test]
async fn test_round_lifecycle_updates_ledger() {
    let mut town = Town::new().await;
    let ledger = ReputationLedger::new(town.store.clone());
    town.observe(&[100.0; 30]).await;
    let mut scheduler = town.scheduler();

    // Round opens with one prediction per enabled agent.
    let report = scheduler.tick(at(ROUND, 5)).await;
    assert!(report.opened);
    assert_eq!(report.predictions_made, 2);
    let made = town.drain_events();
    assert_eq!(made.len(), 2);
    assert!(made
        .iter()
        .all(|e| matches!(e, RoundEvent::PredictionMade { round, .. } if *round == ROUND)));

    // Ticks inside the same round do nothing.
    let idle = scheduler.tick(at(ROUND, 200)).await;
    assert!(!idle.opened);
    assert!(town.drain_events().is_empty());

    // A 50% jump is outside every forecast's tolerance.
    town.observe(&[150.0]).await;
    let report = scheduler.tick(at(ROUND + 1, 1)).await;
    assert_eq!(report.resolved_round, Some(ROUND));
    assert_eq!(report.resolved, 2);
    assert_eq!(report.predictions_made, 2);

    let resolved_first = assert_ok!(town.store.predictions_for_round(ROUND).await);
    assert!(resolved_first
        .iter()
        .all(|p| p.record.outcome == Outcome::Incorrect && p.actual_price == Some(150.0)));
    assert_eq!(assert_ok!(ledger.vote_weight("momentum-maven").await), 1);
    assert_eq!(assert_ok!(ledger.vote_weight("cycle-sarah").await), 1);

    // Close the next round exactly on MomentumMaven's projection.
    let open = assert_ok!(town.store.predictions_for_round(ROUND + 1).await);
    let target = open
        .iter()
        .find(|p| p.agent_id == "momentum-maven")
        .map(|p| p.record.predicted_price)
        .unwrap();
    let other = open
        .iter()
        .find(|p| p.agent_id == "cycle-sarah")
        .map(|p| p.record.predicted_price)
        .unwrap();
    town.drain_events();
    town.observe(&[target]).await;
    let report = scheduler.tick(at(ROUND + 2, 1)).await;
    assert_eq!(report.resolved, 2);

    let resolved: Vec<RoundEvent> = town
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, RoundEvent::PredictionResolved { .. }))
        .collect();
    assert_eq!(resolved.len(), 2);
    for event in &resolved {
        if let RoundEvent::PredictionResolved {
            agent_id,
            is_correct,
            vote_weight,
            total_vote_weight,
            actual_price,
            ..
        } = event
        {
            assert_eq!(*actual_price, target);
            if agent_id == "momentum-maven" {
                assert!(*is_correct);
                assert_eq!(*vote_weight, 2);
                assert_eq!(*total_vote_weight, Some(3));
            } else {
                let (expected, _) = judge_prediction(other, target);
                assert_eq!(*is_correct, expected);
            }
        }
    }

    assert_eq!(assert_ok!(ledger.vote_weight("momentum-maven").await), 3);
    assert_eq!(assert_ok!(ledger.correct_prediction_count("momentum-maven").await), 1);

    let standings = assert_ok!(ledger.standings().await);
    let maven = standings
        .iter()
        .find(|s| s.agent_id == "momentum-maven")
        .unwrap();
    assert_eq!(maven.total_predictions, 2);
    assert_eq!(maven.correct_predictions, 1);
    assert!((maven.accuracy - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_restart_mid_round_does_not_duplicate() {
    let mut town = Town::new().await;
    town.observe(&[100.0; 10]).await;

    let mut first = town.scheduler();
    assert_eq!(first.tick(at(ROUND, 0)).await.predictions_made, 2);
    town.drain_events();

    // A fresh scheduler has no memory and reopens the same round.
    let mut restarted = town.scheduler();
    let report = restarted.tick(at(ROUND, 120)).await;
    assert!(report.opened);
    assert_eq!(report.predictions_made, 0);
    assert_eq!(report.duplicates, 2);
    assert!(town.drain_events().is_empty());

    let stored = assert_ok!(town.store.predictions_for_round(ROUND).await);
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_round_waits_for_first_price() {
    let mut town = Town::new().await;
    let mut scheduler = town.scheduler();

    // Only the fallback price is known: nothing opens.
    let report = scheduler.tick(at(ROUND, 0)).await;
    assert!(!report.opened);
    assert_eq!(report.predictions_made, 0);
    assert!(town.drain_events().is_empty());
    assert!(assert_ok!(town.store.predictions_for_round(ROUND).await).is_empty());

    // The first real price opens the round late, against that price.
    town.observe(&[97_500.0]).await;
    let report = scheduler.tick(at(ROUND, 40)).await;
    assert!(report.opened);
    assert_eq!(report.predictions_made, 2);
    let made = town.drain_events();
    assert!(made.iter().all(|e| matches!(
        e,
        RoundEvent::PredictionMade { current_price, .. } if *current_price == 97_500.0
    )));

    let report = scheduler.tick(at(ROUND + 1, 0)).await;
    assert_eq!(report.resolved_round, Some(ROUND));
    assert_eq!(report.resolved, 2);
    let closed = assert_ok!(town.store.predictions_for_round(ROUND).await);
    assert!(closed.iter().all(|p| p.record.outcome.is_resolved()));
}

#[tokio::test]
async fn test_feed_failure_serves_last_known_price() {
    let town = Town::new().await;
    town.observe(&[64_000.0, 64_250.0]).await;

    // Script exhausted: the refresh degrades instead of failing.
    let quote = town.feed.refresh().await;
    assert_eq!(quote.price, 64_250.0);
    assert_eq!(quote.change_24h, 0.0);
    assert_eq!(town.feed.history().await, vec![64_000.0, 64_250.0]);
    assert_eq!(town.source.calls(), 3);
}

#[tokio::test]
async fn test_dashboard_serves_live_leaderboard() {
    let mut town = Town::new().await;
    town.observe(&[100.0; 5]).await;
    let mut scheduler = town.scheduler();
    scheduler.tick(at(ROUND, 0)).await;

    let state = Arc::new(DashboardState::new(
        town.feed.clone(),
        town.store.clone(),
        Duration::from_secs(ROUND_SECS as u64),
        10,
    ));
    for event in town.drain_events() {
        state.record_event(event).await;
    }
    let app = dashboard::build_router(state);

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/api/leaderboard").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let rows: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);

    let resp = app
        .oneshot(Request::builder().uri("/api/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let events: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(events.as_array().unwrap().len(), 2);
    assert_eq!(events[0]["type"], "prediction_made");
}
