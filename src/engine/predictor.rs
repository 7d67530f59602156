//! Prediction engine.
//!
//! Runs an agent's strategy tools against one feed snapshot, counts the
//! bullish and bearish votes, and turns the result into a pending
//! [`PredictionRecord`]. A direction is only called when one side leads by
//! at least two votes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::feed::PriceFeed;
use crate::tools::{Bias, ToolContext, ToolRegistry, ToolResult};
use crate::types::{AgentProfile, Direction, Outcome, OracleError, PredictionRecord};

/// Projected move per unit of average confidence.
pub const PRICE_MOVE_SCALE: f64 = 0.02;

/// Confidence used when no tool produced a result.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Maximum length of the joined reasoning, in characters.
pub const REASONING_LIMIT: usize = 500;

/// Wall-clock lookback used by [`PredictionEngine::evaluate_prediction`],
/// converted to samples at the feed's cadence.
pub const EVALUATION_LOOKBACK_MINUTES: u64 = 5;

pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 2_000;

/// Combined reading of a set of tool results.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub direction: Direction,
    pub predicted_price: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub bullish: usize,
    pub bearish: usize,
}

/// Combine tool results into a direction and projected price.
///
/// Pure: identical inputs always give identical output.
pub fn aggregate(current_price: f64, results: &[ToolResult]) -> Aggregate {
    let confidence = if results.is_empty() {
        DEFAULT_CONFIDENCE
    } else {
        results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64
    };

    let reasoning: String = results
        .iter()
        .map(|r| r.reasoning.as_str())
        .collect::<Vec<_>>()
        .join(". ")
        .chars()
        .take(REASONING_LIMIT)
        .collect();

    let mut bullish = 0;
    let mut bearish = 0;
    for r in results {
        match r.signal.bias() {
            Bias::Bullish => bullish += 1,
            Bias::Bearish => bearish += 1,
            Bias::Neutral => {}
        }
    }

    let (direction, predicted_price) = if bullish > bearish + 1 {
        (Direction::Up, current_price * (1.0 + confidence * PRICE_MOVE_SCALE))
    } else if bearish > bullish + 1 {
        (Direction::Down, current_price * (1.0 - confidence * PRICE_MOVE_SCALE))
    } else {
        (Direction::Flat, current_price)
    };

    Aggregate {
        direction,
        predicted_price,
        confidence,
        reasoning,
        bullish,
        bearish,
    }
}

pub struct PredictionEngine {
    feed: Arc<PriceFeed>,
    registry: ToolRegistry,
    tool_timeout: Duration,
}

impl PredictionEngine {
    pub fn new(feed: Arc<PriceFeed>, registry: ToolRegistry, tool_timeout: Duration) -> Self {
        Self {
            feed,
            registry,
            tool_timeout,
        }
    }

    pub fn feed(&self) -> &Arc<PriceFeed> {
        &self.feed
    }

    pub async fn make_prediction(&self, agent: &AgentProfile) -> PredictionRecord {
        self.make_prediction_at(agent, Utc::now()).await
    }

    /// Produce a pending prediction for `agent` as of `now`.
    ///
    /// Tool failures and timeouts drop that tool from the aggregate; the
    /// prediction itself always succeeds.
    pub async fn make_prediction_at(
        &self,
        agent: &AgentProfile,
        now: DateTime<Utc>,
    ) -> PredictionRecord {
        let ctx = ToolContext::new(self.feed.snapshot().await, now);
        let tools = agent.strategy.tools();
        let results = self.run_tools(tools, &ctx).await;
        let agg = aggregate(ctx.current_price, &results);

        debug!(
            agent = %agent.id,
            strategy = %agent.strategy,
            tools = tools.len(),
            succeeded = results.len(),
            bullish = agg.bullish,
            bearish = agg.bearish,
            direction = %agg.direction,
            "Prediction computed"
        );

        PredictionRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            current_price: ctx.current_price,
            predicted_price: agg.predicted_price,
            prediction_direction: agg.direction,
            actual_direction: None,
            outcome: Outcome::Pending,
            confidence: agg.confidence,
            reasoning: agg.reasoning,
        }
    }

    /// Invoke `names` in order, keeping only the results that came back in
    /// time and without error.
    pub async fn run_tools(&self, names: &[&str], ctx: &ToolContext) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(names.len());
        for &name in names {
            let Some(tool) = self.registry.get(name) else {
                warn!(error = %OracleError::UnknownTool(name.to_string()), "Skipping tool");
                continue;
            };

            match tokio::time::timeout(self.tool_timeout, tool.analyze(ctx)).await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => warn!(tool = name, error = %e, "Tool failed, skipping"),
                Err(_) => {
                    let e = OracleError::ToolTimeout {
                        tool: name.to_string(),
                        timeout_ms: self.tool_timeout.as_millis() as u64,
                    };
                    warn!(tool = name, error = %e, "Tool timed out, skipping");
                }
            }
        }
        results
    }

    /// Judge a single prediction's direction against the price five
    /// minutes back.
    ///
    /// When the history is too short the prediction stays pending with a
    /// flat actual direction.
    pub async fn evaluate_prediction(&self, prediction: &PredictionRecord) -> PredictionRecord {
        let mut evaluated = prediction.clone();
        let history = self.feed.snapshot().await;

        let lookback = history.periods_for_minutes(EVALUATION_LOOKBACK_MINUTES);
        let Some(past) = history.price_n_periods_ago(lookback) else {
            evaluated.actual_direction = Some(Direction::Flat);
            evaluated.outcome = Outcome::Pending;
            return evaluated;
        };

        let actual = Direction::between(past, history.current_price());
        evaluated.actual_direction = Some(actual);
        evaluated.outcome = if actual == prediction.prediction_direction {
            Outcome::Correct
        } else {
            Outcome::Incorrect
        };
        evaluated
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{MockPriceSource, PriceHistory};
    use crate::strategy::Strategy;
    use crate::tools::{names, CrossoverSignal, RsiZone, Signal, SignalTool};
    use anyhow::Result;
    use async_trait::async_trait;

    fn bullish(reason: &str) -> ToolResult {
        ToolResult {
            signal: Signal::Oscillator { rsi: 20.0, zone: RsiZone::Oversold },
            confidence: 0.6,
            reasoning: reason.into(),
        }
    }

    fn bearish(reason: &str) -> ToolResult {
        ToolResult {
            signal: Signal::Crossover {
                ma5: 99.0,
                ma20: 100.0,
                ma50: 101.0,
                signal: CrossoverSignal::Bearish,
            },
            confidence: 0.4,
            reasoning: reason.into(),
        }
    }

    fn neutral() -> ToolResult {
        ToolResult {
            signal: Signal::Oscillator { rsi: 50.0, zone: RsiZone::Neutral },
            confidence: 0.2,
            reasoning: "neutral".into(),
        }
    }

    fn results(bull: usize, bear: usize) -> Vec<ToolResult> {
        let mut v: Vec<ToolResult> = (0..bull).map(|_| bullish("b")).collect();
        v.extend((0..bear).map(|_| bearish("s")));
        v
    }

    #[test]
    fn test_margin_of_two_goes_up() {
        let agg = aggregate(100.0, &results(3, 1));
        assert_eq!(agg.direction, Direction::Up);
        assert!(agg.predicted_price > 100.0);
        let conf = (0.6 * 3.0 + 0.4) / 4.0;
        assert!((agg.predicted_price - 100.0 * (1.0 + conf * 0.02)).abs() < 1e-9);
    }

    #[test]
    fn test_margin_of_two_goes_down() {
        let agg = aggregate(100.0, &results(0, 2));
        assert_eq!(agg.direction, Direction::Down);
        assert!(agg.predicted_price < 100.0);
    }

    #[test]
    fn test_near_ties_stay_flat() {
        for (bull, bear) in [(0, 0), (1, 0), (0, 1), (2, 2), (3, 2), (2, 3)] {
            let agg = aggregate(100.0, &results(bull, bear));
            assert_eq!(agg.direction, Direction::Flat, "{bull} vs {bear}");
            assert_eq!(agg.predicted_price, 100.0);
        }
    }

    #[test]
    fn test_neutral_results_only_move_confidence() {
        let mut v = results(2, 0);
        v.push(neutral());
        let agg = aggregate(100.0, &v);
        assert_eq!(agg.direction, Direction::Up);
        assert_eq!(agg.bullish, 2);
        assert!((agg.confidence - (0.6 + 0.6 + 0.2) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_results_defaults_confidence() {
        let agg = aggregate(100.0, &[]);
        assert_eq!(agg.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(agg.direction, Direction::Flat);
        assert!(agg.reasoning.is_empty());
    }

    #[test]
    fn test_reasoning_joined_and_capped() {
        let agg = aggregate(100.0, &[bullish("alpha"), bearish("beta")]);
        assert_eq!(agg.reasoning, "alpha. beta");

        let long: Vec<ToolResult> = (0..20).map(|_| bullish(&"r".repeat(60))).collect();
        assert_eq!(aggregate(100.0, &long).reasoning.chars().count(), REASONING_LIMIT);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let v = results(3, 1);
        assert_eq!(aggregate(100.0, &v), aggregate(100.0, &v));
    }

    // -- Engine ------------------------------------------------------------

    struct FixedTool {
        name: &'static str,
        result: ToolResult,
    }

    #[async_trait]
    impl SignalTool for FixedTool {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn analyze(&self, _ctx: &ToolContext) -> Result<ToolResult> {
            Ok(self.result.clone())
        }
    }

    struct FailingTool(&'static str);

    #[async_trait]
    impl SignalTool for FailingTool {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn analyze(&self, _ctx: &ToolContext) -> Result<ToolResult> {
            anyhow::bail!("boom")
        }
    }

    struct HangingTool(&'static str);

    #[async_trait]
    impl SignalTool for HangingTool {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn analyze(&self, _ctx: &ToolContext) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(bullish("too late"))
        }
    }

    fn feed(samples: &[f64]) -> Arc<PriceFeed> {
        Arc::new(PriceFeed::with_history(
            Arc::new(MockPriceSource::new()),
            PriceHistory::from_samples(samples, 500, 97_000.0),
        ))
    }

    fn agent(strategy: Strategy) -> AgentProfile {
        AgentProfile {
            id: "agent-1".into(),
            name: "Agent One".into(),
            strategy,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_rising_history_momentum_agent_predicts_up() {
        let engine = PredictionEngine::new(
            feed(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]),
            ToolRegistry::builtin(),
            Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS),
        );
        let record = engine.make_prediction(&agent(Strategy::Momentum)).await;
        assert_eq!(record.prediction_direction, Direction::Up);
        assert!(record.predicted_price > 100.0);
        assert!(record.predicted_price > record.current_price);
        assert_eq!(record.current_price, 105.0);
        assert_eq!(record.outcome, Outcome::Pending);
        assert_eq!(record.actual_direction, None);
        assert!(!record.id.is_empty());
    }

    #[tokio::test]
    async fn test_failed_and_hung_tools_are_skipped() {
        let mut registry = ToolRegistry::empty();
        registry.register(Arc::new(FixedTool { name: names::MOMENTUM, result: bullish("m") }));
        registry.register(Arc::new(FailingTool(names::MOVING_AVERAGES)));
        registry.register(Arc::new(HangingTool(names::RSI)));
        let engine = PredictionEngine::new(feed(&[100.0]), registry, Duration::from_millis(50));

        let record = engine.make_prediction(&agent(Strategy::Momentum)).await;
        assert_eq!(record.reasoning, "m");
        assert_eq!(record.confidence, 0.6);
        assert_eq!(record.prediction_direction, Direction::Flat);
    }

    #[tokio::test]
    async fn test_unknown_tools_fall_back_to_default_confidence() {
        let engine =
            PredictionEngine::new(feed(&[100.0]), ToolRegistry::empty(), Duration::from_millis(50));
        let record = engine.make_prediction(&agent(Strategy::Technical)).await;
        assert_eq!(record.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(record.predicted_price, 100.0);
    }

    #[tokio::test]
    async fn test_bearish_tools_predict_down() {
        let mut registry = ToolRegistry::empty();
        for name in [names::MOMENTUM, names::MOVING_AVERAGES, names::RSI] {
            registry.register(Arc::new(FixedTool { name, result: bearish(name) }));
        }
        let engine = PredictionEngine::new(feed(&[200.0]), registry, Duration::from_millis(500));
        let record = engine.make_prediction(&agent(Strategy::Momentum)).await;
        assert_eq!(record.prediction_direction, Direction::Down);
        assert!((record.predicted_price - 200.0 * (1.0 - 0.4 * 0.02)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_evaluate_prediction() {
        let engine = PredictionEngine::new(
            feed(&[100.0, 100.0, 100.0, 100.0, 100.0, 101.0]),
            ToolRegistry::builtin(),
            Duration::from_millis(500),
        );
        let mut pending = engine.make_prediction(&agent(Strategy::Momentum)).await;

        pending.prediction_direction = Direction::Up;
        let judged = engine.evaluate_prediction(&pending).await;
        assert_eq!(judged.actual_direction, Some(Direction::Up));
        assert_eq!(judged.outcome, Outcome::Correct);

        pending.prediction_direction = Direction::Down;
        let judged = engine.evaluate_prediction(&pending).await;
        assert_eq!(judged.outcome, Outcome::Incorrect);
        assert_eq!(judged.current_price, pending.current_price);
    }

    #[tokio::test]
    async fn test_evaluate_prediction_lookback_follows_cadence() {
        let mut samples = vec![104.0];
        samples.extend([100.0; 9]);
        samples.push(101.0);
        let feed = Arc::new(PriceFeed::with_history(
            Arc::new(MockPriceSource::new()),
            PriceHistory::from_samples(&samples, 500, 97_000.0).with_sample_interval(30),
        ));
        let engine =
            PredictionEngine::new(feed, ToolRegistry::builtin(), Duration::from_millis(500));
        let mut pending = engine.make_prediction(&agent(Strategy::Momentum)).await;
        pending.prediction_direction = Direction::Down;

        // Ten 30s samples back is the 104.0 print, not the 100.0 five back
        let judged = engine.evaluate_prediction(&pending).await;
        assert_eq!(judged.actual_direction, Some(Direction::Down));
        assert_eq!(judged.outcome, Outcome::Correct);
    }

    #[tokio::test]
    async fn test_evaluate_prediction_short_history_stays_pending() {
        let engine =
            PredictionEngine::new(feed(&[100.0, 101.0]), ToolRegistry::builtin(), Duration::from_millis(500));
        let pending = engine.make_prediction(&agent(Strategy::Cycle)).await;
        let judged = engine.evaluate_prediction(&pending).await;
        assert_eq!(judged.actual_direction, Some(Direction::Flat));
        assert_eq!(judged.outcome, Outcome::Pending);
    }
}
