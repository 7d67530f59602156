//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::error;

use crate::engine::{round_for, ReputationLedger, RoundEvent, RoundWindow, Standing};
use crate::feed::{PriceFeed, TrendPattern};
use crate::storage::{PredictionStore, StoredPrediction};

const DEFAULT_PREDICTION_LIMIT: u32 = 20;
const MAX_PREDICTION_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub feed: Arc<PriceFeed>,
    pub store: Arc<dyn PredictionStore>,
    pub ledger: ReputationLedger,
    pub round_duration: Duration,
    pub events: RwLock<VecDeque<RoundEvent>>,
    event_capacity: usize,
}

impl DashboardState {
    pub fn new(
        feed: Arc<PriceFeed>,
        store: Arc<dyn PredictionStore>,
        round_duration: Duration,
        event_capacity: usize,
    ) -> Self {
        Self {
            feed,
            ledger: ReputationLedger::new(store.clone()),
            store,
            round_duration,
            events: RwLock::new(VecDeque::with_capacity(event_capacity)),
            event_capacity: event_capacity.max(1),
        }
    }

    /// Keep `event`, dropping the oldest once the buffer is full.
    pub async fn record_event(&self, event: RoundEvent) {
        let mut events = self.events.write().await;
        events.push_back(event);
        while events.len() > self.event_capacity {
            events.pop_front();
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PriceResponse {
    pub price: f64,
    pub has_observation: bool,
    pub samples: usize,
    pub change_1h: f64,
    pub change_24h: f64,
    pub ma5: f64,
    pub ma20: f64,
    pub rsi: f64,
    pub volatility: f64,
    pub pattern: TrendPattern,
    pub support: f64,
    pub resistance: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundResponse {
    pub round: u64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub seconds_remaining: i64,
    pub predictions: Vec<StoredPrediction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A storage failure surfaced as a 500.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Dashboard request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/price
pub async fn get_price(State(state): State<AppState>) -> Json<PriceResponse> {
    let history = state.feed.snapshot().await;
    let levels = history.support_resistance();

    Json(PriceResponse {
        price: history.current_price(),
        has_observation: history.has_observation(),
        samples: history.len(),
        change_1h: history.percent_change(history.periods_per_hour()),
        change_24h: history.change_24h(),
        ma5: history.moving_average(5),
        ma20: history.moving_average(20),
        rsi: history.rsi(14),
        volatility: history.volatility(20),
        pattern: history.detect_pattern(),
        support: levels.support,
        resistance: levels.resistance,
        updated_at: history.updated_at(),
    })
}

/// GET /api/round
pub async fn get_round(State(state): State<AppState>) -> Result<Json<RoundResponse>, ApiError> {
    let now = Utc::now();
    let round = round_for(now, state.round_duration);
    let window = RoundWindow::of(round, state.round_duration);
    let predictions = state.store.predictions_for_round(round).await?;

    Ok(Json(RoundResponse {
        round,
        starts_at: window.map(|w| w.starts_at),
        ends_at: window.map(|w| w.ends_at),
        seconds_remaining: window.map_or(0, |w| (w.ends_at - now).num_seconds().max(0)),
        predictions,
    }))
}

/// GET /api/leaderboard
pub async fn get_leaderboard(State(state): State<AppState>) -> Result<Json<Vec<Standing>>, ApiError> {
    Ok(Json(state.ledger.standings().await?))
}

/// GET /api/agents/:id/predictions
pub async fn get_agent_predictions(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<PredictionsQuery>,
) -> Result<Json<Vec<StoredPrediction>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PREDICTION_LIMIT)
        .clamp(1, MAX_PREDICTION_LIMIT);
    let predictions = state.store.recent_predictions_for_agent(&agent_id, limit).await?;
    Ok(Json(predictions))
}

/// GET /api/events
pub async fn get_events(State(state): State<AppState>) -> Json<Vec<RoundEvent>> {
    let events = state.events.read().await;
    Json(events.iter().cloned().collect())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
