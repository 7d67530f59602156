//! Price-series tools: RSI, momentum, volatility/pattern, support and
//! resistance, moving-average crossover and mean reversion.

use anyhow::Result;

use super::{ensure_finite, names, CrossoverSignal, FnTool, RsiZone, Signal, ToolContext, ToolResult};
use crate::types::{Direction, OracleError};

const RSI_PERIODS: usize = 14;
const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;

/// Momentum beyond this weighted percent is directional.
const MOMENTUM_THRESHOLD: f64 = 0.5;

const VOLATILITY_PERIODS: usize = 20;

/// Deviation from the 20-period average beyond which reversion is expected.
const REVERSION_THRESHOLD_PCT: f64 = 5.0;

pub fn catalog() -> Vec<FnTool> {
    vec![
        FnTool::new(names::RSI, analyze_rsi),
        FnTool::new(names::MOMENTUM, analyze_momentum),
        FnTool::new(names::VOLATILITY, analyze_volatility),
        FnTool::new(names::SUPPORT_RESISTANCE, analyze_support_resistance),
        FnTool::new(names::MOVING_AVERAGES, analyze_moving_averages),
        FnTool::new(names::MEAN_REVERSION, analyze_mean_reversion),
    ]
}

pub fn analyze_rsi(ctx: &ToolContext) -> Result<ToolResult> {
    let rsi = ensure_finite(names::RSI, "rsi", ctx.history.rsi(RSI_PERIODS))?;
    let (zone, label) = if rsi > RSI_OVERBOUGHT {
        (RsiZone::Overbought, "overbought - expect correction down")
    } else if rsi < RSI_OVERSOLD {
        (RsiZone::Oversold, "oversold - expect bounce up")
    } else {
        (RsiZone::Neutral, "neutral")
    };

    Ok(ToolResult {
        signal: Signal::Oscillator { rsi, zone },
        confidence: (50.0 - rsi).abs() / 50.0,
        reasoning: format!("RSI is {rsi:.1}, indicating {label}"),
    })
}

pub fn analyze_momentum(ctx: &ToolContext) -> Result<ToolResult> {
    let change_1 = ctx.history.percent_change(1);
    let change_5 = ctx.history.percent_change(5);
    let change_15 = ctx.history.percent_change(15);
    let momentum = ensure_finite(
        names::MOMENTUM,
        "momentum",
        change_1 + change_5 * 0.5 + change_15 * 0.25,
    )?;

    let direction = if momentum > MOMENTUM_THRESHOLD {
        Direction::Up
    } else if momentum < -MOMENTUM_THRESHOLD {
        Direction::Down
    } else {
        Direction::Flat
    };

    Ok(ToolResult {
        signal: Signal::Directional {
            change_1,
            change_5,
            change_15,
            momentum,
            direction,
        },
        confidence: (momentum.abs() / 2.0).min(1.0),
        reasoning: format!("Momentum: {momentum:.2}% across timeframes. Direction: {direction}"),
    })
}

pub fn analyze_volatility(ctx: &ToolContext) -> Result<ToolResult> {
    let volatility = ensure_finite(
        names::VOLATILITY,
        "volatility",
        ctx.history.volatility(VOLATILITY_PERIODS),
    )?;
    let pattern = ctx.history.detect_pattern();

    Ok(ToolResult {
        signal: Signal::Pattern { volatility, pattern },
        confidence: (volatility / 10.0).min(1.0),
        reasoning: format!("Volatility: {volatility:.2}%, Pattern: {pattern}"),
    })
}

pub fn analyze_support_resistance(ctx: &ToolContext) -> Result<ToolResult> {
    let current = ctx.current_price;
    if current <= 0.0 {
        return Err(OracleError::Tool {
            tool: names::SUPPORT_RESISTANCE.to_string(),
            message: format!("non-positive price {current}"),
        }
        .into());
    }
    let levels = ctx.history.support_resistance();
    let distance_to_resistance_pct = (levels.resistance - current) / current * 100.0;
    let distance_to_support_pct = (current - levels.support) / current * 100.0;

    Ok(ToolResult {
        signal: Signal::Levels {
            support: levels.support,
            resistance: levels.resistance,
            distance_to_support_pct,
            distance_to_resistance_pct,
        },
        confidence: 0.6,
        reasoning: format!(
            "Support at ${:.0}, Resistance at ${:.0}",
            levels.support, levels.resistance
        ),
    })
}

/// 5/20/50 crossover. Windows shrink to the samples available, so a young
/// history still yields a reading.
pub fn analyze_moving_averages(ctx: &ToolContext) -> Result<ToolResult> {
    let ma5 = ctx.history.trailing_mean(5);
    let ma20 = ctx.history.trailing_mean(20);
    let ma50 = ctx.history.trailing_mean(50);
    let current = ctx.current_price;

    let signal = if ma5 > ma20 && current > ma5 {
        CrossoverSignal::StrongBullish
    } else if ma5 > ma20 {
        CrossoverSignal::Bullish
    } else if ma5 < ma20 && current < ma5 {
        CrossoverSignal::StrongBearish
    } else if ma5 < ma20 {
        CrossoverSignal::Bearish
    } else {
        CrossoverSignal::Neutral
    };

    Ok(ToolResult {
        signal: Signal::Crossover { ma5, ma20, ma50, signal },
        confidence: 0.7,
        reasoning: format!("MA5: ${ma5:.0}, MA20: ${ma20:.0}. Signal: {signal}"),
    })
}

pub fn analyze_mean_reversion(ctx: &ToolContext) -> Result<ToolResult> {
    let ma20 = ctx.history.moving_average(20);
    if ma20 <= 0.0 {
        return Err(OracleError::Tool {
            tool: names::MEAN_REVERSION.to_string(),
            message: format!("non-positive average {ma20}"),
        }
        .into());
    }
    let percent = ensure_finite(
        names::MEAN_REVERSION,
        "deviation",
        (ctx.current_price - ma20) / ma20 * 100.0,
    )?;

    let (expected_reversion, label) = if percent > REVERSION_THRESHOLD_PCT {
        (Some(Direction::Down), "revert down to MA")
    } else if percent < -REVERSION_THRESHOLD_PCT {
        (Some(Direction::Up), "revert up to MA")
    } else {
        (None, "within normal range")
    };

    Ok(ToolResult {
        signal: Signal::Deviation {
            percent,
            ma20,
            expected_reversion,
        },
        confidence: (percent.abs() / 10.0).min(0.8),
        reasoning: format!("Price is {percent:.1}% from 20 MA. Expect: {label}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
