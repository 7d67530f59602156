//! SQLite-backed [`PredictionStore`].
//!
//! Timestamps are stored as Unix milliseconds. The `(round, agent_id)`
//! uniqueness constraint makes inserts idempotent per round, and
//! resolution only ever touches rows still marked `pending`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{PredictionStore, StoredPrediction};
use crate::strategy::Strategy;
use crate::types::{
    judge_prediction, AgentProfile, AgentSummary, Direction, Outcome, OracleError,
    PredictionRecord, ResolvedPrediction,
};

const CREATE_AGENTS: &str = r#"
    CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        strategy TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        total_predictions INTEGER NOT NULL DEFAULT 0,
        correct_predictions INTEGER NOT NULL DEFAULT 0,
        created_at_ms INTEGER NOT NULL
    )
"#;

const CREATE_PREDICTIONS: &str = r#"
    CREATE TABLE IF NOT EXISTS predictions (
        id TEXT PRIMARY KEY,
        round INTEGER NOT NULL,
        agent_id TEXT NOT NULL REFERENCES agents(id),
        created_at_ms INTEGER NOT NULL,
        current_price REAL NOT NULL,
        predicted_price REAL NOT NULL,
        prediction_direction TEXT NOT NULL,
        actual_direction TEXT,
        outcome TEXT NOT NULL DEFAULT 'pending',
        confidence REAL NOT NULL,
        reasoning TEXT NOT NULL,
        actual_price REAL,
        vote_weight INTEGER,
        resolved_at_ms INTEGER,
        UNIQUE (round, agent_id)
    )
"#;

const CREATE_AGENT_OUTCOME_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_predictions_agent_outcome
    ON predictions (agent_id, outcome)
"#;

const PREDICTION_COLUMNS: &str = "id, round, agent_id, created_at_ms, current_price, \
     predicted_price, prediction_direction, actual_direction, outcome, confidence, reasoning, \
     actual_price, vote_weight, resolved_at_ms";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct AgentRow {
    id: String,
    name: String,
    strategy: String,
    enabled: bool,
    total_predictions: i64,
    correct_predictions: i64,
}

impl AgentRow {
    fn into_profile(self) -> AgentProfile {
        AgentProfile {
            strategy: Strategy::from_identifier(Some(&self.strategy)),
            id: self.id,
            name: self.name,
            enabled: self.enabled,
        }
    }

    fn into_summary(self) -> AgentSummary {
        let total_predictions = self.total_predictions.max(0) as u64;
        let correct_predictions = self.correct_predictions.max(0) as u64;
        AgentSummary {
            profile: self.into_profile(),
            total_predictions,
            correct_predictions,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PredictionRow {
    id: String,
    round: i64,
    agent_id: String,
    created_at_ms: i64,
    current_price: f64,
    predicted_price: f64,
    prediction_direction: String,
    actual_direction: Option<String>,
    outcome: String,
    confidence: f64,
    reasoning: String,
    actual_price: Option<f64>,
    vote_weight: Option<i64>,
    resolved_at_ms: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct PendingRow {
    id: String,
    agent_id: String,
    agent_name: String,
    current_price: f64,
    predicted_price: f64,
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| OracleError::Storage(format!("timestamp out of range: {ms}")).into())
}

impl TryFrom<PredictionRow> for StoredPrediction {
    type Error = anyhow::Error;

    fn try_from(row: PredictionRow) -> Result<Self> {
        let record = PredictionRecord {
            timestamp: from_millis(row.created_at_ms)?,
            current_price: row.current_price,
            predicted_price: row.predicted_price,
            prediction_direction: row.prediction_direction.parse()?,
            actual_direction: row
                .actual_direction
                .as_deref()
                .map(Direction::from_str)
                .transpose()?,
            outcome: row.outcome.parse::<Outcome>()?,
            confidence: row.confidence,
            reasoning: row.reasoning,
            id: row.id,
        };
        Ok(StoredPrediction {
            round: row.round.max(0) as u64,
            agent_id: row.agent_id,
            record,
            actual_price: row.actual_price,
            vote_weight: row.vote_weight.map(|w| w.clamp(0, u32::MAX as i64) as u32),
            resolved_at: row.resolved_at_ms.map(from_millis).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "Database ready");
        Ok(store)
    }

    /// A private in-memory database. Pinned to one connection that never
    /// expires, since each SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for ddl in [CREATE_AGENTS, CREATE_PREDICTIONS, CREATE_AGENT_OUTCOME_INDEX] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        Ok(())
    }

    fn collect_stored(rows: Vec<PredictionRow>) -> Result<Vec<StoredPrediction>> {
        rows.into_iter().map(StoredPrediction::try_from).collect()
    }
}

#[async_trait]
impl PredictionStore for SqliteStore {
    async fn insert_prediction(
        &self,
        round: u64,
        agent_id: &str,
        record: &PredictionRecord,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO predictions (
                id, round, agent_id, created_at_ms, current_price, predicted_price,
                prediction_direction, outcome, confidence, reasoning
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (round, agent_id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(round as i64)
        .bind(agent_id)
        .bind(record.timestamp.timestamp_millis())
        .bind(record.current_price)
        .bind(record.predicted_price)
        .bind(record.prediction_direction.as_str())
        .bind(Outcome::Pending.as_str())
        .bind(record.confidence)
        .bind(&record.reasoning)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert prediction for {agent_id} in round {round}"))?;

        let inserted = result.rows_affected() == 1;
        debug!(round, agent_id, inserted, "Prediction stored");
        Ok(inserted)
    }

    async fn resolve_predictions_for_round(
        &self,
        round: u64,
        actual_price: f64,
    ) -> Result<Vec<ResolvedPrediction>> {
        let resolved_at = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.context("Failed to begin resolution")?;

        let pending: Vec<PendingRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.agent_id, COALESCE(a.name, p.agent_id) AS agent_name,
                   p.current_price, p.predicted_price
            FROM predictions p
            LEFT JOIN agents a ON a.id = p.agent_id
            WHERE p.round = ? AND p.outcome = 'pending'
            ORDER BY p.created_at_ms, p.id
            "#,
        )
        .bind(round as i64)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to load pending predictions")?;

        let mut resolved = Vec::with_capacity(pending.len());
        for row in pending {
            let (is_correct, vote_weight) = judge_prediction(row.predicted_price, actual_price);
            let actual_direction = Direction::between(row.current_price, actual_price);
            let outcome = if is_correct { Outcome::Correct } else { Outcome::Incorrect };

            sqlx::query(
                r#"
                UPDATE predictions
                SET actual_direction = ?, outcome = ?, actual_price = ?,
                    vote_weight = ?, resolved_at_ms = ?
                WHERE id = ? AND outcome = 'pending'
                "#,
            )
            .bind(actual_direction.as_str())
            .bind(outcome.as_str())
            .bind(actual_price)
            .bind(vote_weight as i64)
            .bind(resolved_at)
            .bind(&row.id)
            .execute(&mut *tx)
            .await
            .context("Failed to resolve prediction")?;

            sqlx::query(
                r#"
                UPDATE agents
                SET total_predictions = total_predictions + 1,
                    correct_predictions = correct_predictions + ?
                WHERE id = ?
                "#,
            )
            .bind(i64::from(is_correct))
            .bind(&row.agent_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update agent counters")?;

            resolved.push(ResolvedPrediction {
                prediction_id: row.id,
                agent_id: row.agent_id,
                agent_name: row.agent_name,
                predicted_price: row.predicted_price,
                actual_price,
                actual_direction,
                is_correct,
                vote_weight,
            });
        }

        tx.commit().await.context("Failed to commit resolution")?;
        debug!(round, count = resolved.len(), "Round resolved");
        Ok(resolved)
    }

    async fn sum_correct_vote_weight(&self, agent_id: &str) -> Result<u64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(vote_weight), 0) FROM predictions \
             WHERE agent_id = ? AND outcome = 'correct'",
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum vote weight")?;
        Ok(sum.max(0) as u64)
    }

    async fn count_correct(&self, agent_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM predictions WHERE agent_id = ? AND outcome = 'correct'",
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count correct predictions")?;
        Ok(count.max(0) as u64)
    }

    async fn list_enabled_agents(&self) -> Result<Vec<AgentProfile>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT id, name, strategy, enabled, total_predictions, correct_predictions \
             FROM agents WHERE enabled = 1 ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list enabled agents")?;
        Ok(rows.into_iter().map(AgentRow::into_profile).collect())
    }

    async fn list_agents(&self) -> Result<Vec<AgentSummary>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT id, name, strategy, enabled, total_predictions, correct_predictions \
             FROM agents ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list agents")?;
        Ok(rows.into_iter().map(AgentRow::into_summary).collect())
    }

    async fn upsert_agent(&self, agent: &AgentProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, name, strategy, enabled, created_at_ms)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                strategy = excluded.strategy,
                enabled = excluded.enabled
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(agent.strategy.as_str())
        .bind(agent.enabled)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert agent {}", agent.id))?;
        Ok(())
    }

    async fn predictions_for_round(&self, round: u64) -> Result<Vec<StoredPrediction>> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE round = ? ORDER BY created_at_ms, id"
        );
        let rows: Vec<PredictionRow> = sqlx::query_as(&sql)
            .bind(round as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load round predictions")?;
        Self::collect_stored(rows)
    }

    async fn recent_predictions_for_agent(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredPrediction>> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE agent_id = ? \
             ORDER BY round DESC, created_at_ms DESC LIMIT ?"
        );
        let rows: Vec<PredictionRow> = sqlx::query_as(&sql)
            .bind(agent_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to load agent predictions")?;
        Self::collect_stored(rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
