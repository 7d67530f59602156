//! Wall-clock and market-context tools: cycles, network health, sentiment
//! and macro trend. All of these are advisory.

use anyhow::Result;
use chrono::{Datelike, Timelike};

use super::{ensure_finite, names, FnTool, Mood, Outlook, Signal, ToolContext, ToolResult};

const NETWORK_HEALTH_THRESHOLD_PCT: f64 = 5.0;
const SENTIMENT_THRESHOLD_PCT: f64 = 1.0;
const MACRO_WEEKLY_THRESHOLD_PCT: f64 = 10.0;

/// Samples read for the weekly macro change. A fixed 7 × 24 so the window
/// stays inside the default 500-sample history at any cadence.
pub const MACRO_WEEKLY_PERIODS: usize = 7 * 24;

pub fn catalog() -> Vec<FnTool> {
    vec![
        FnTool::new(names::CYCLES, analyze_cycles),
        FnTool::new(names::ONCHAIN, analyze_onchain),
        FnTool::new(names::SENTIMENT, analyze_sentiment),
        FnTool::new(names::MACRO, analyze_macro),
    ]
}

/// Weekday note, Sunday = 0.
fn weekday_note(day_of_week: u32) -> &'static str {
    match day_of_week {
        0 => "Sunday - typically lower volume",
        1 => "Monday - market establishing direction",
        2 => "Tuesday - higher volatility",
        3 => "Wednesday - midweek momentum",
        4 => "Thursday - pre-weekend positioning",
        5 => "Friday - weekend positioning",
        _ => "Saturday - typically lower volatility",
    }
}

/// Percent change over the last hour of samples.
fn hourly_change(ctx: &ToolContext) -> f64 {
    ctx.history.percent_change(ctx.history.periods_per_hour())
}

pub fn analyze_cycles(ctx: &ToolContext) -> Result<ToolResult> {
    let hour = ctx.now.hour();
    let day_of_week = ctx.now.weekday().num_days_from_sunday();
    let note = weekday_note(day_of_week).to_string();
    let reasoning = format!("Time analysis: {note} at hour {hour}");

    Ok(ToolResult {
        signal: Signal::Cycle { hour, day_of_week, note },
        confidence: 0.4,
        reasoning,
    })
}

pub fn analyze_onchain(ctx: &ToolContext) -> Result<ToolResult> {
    let change_1h = ensure_finite(names::ONCHAIN, "1h change", hourly_change(ctx))?;
    let change_24h = ensure_finite(names::ONCHAIN, "24h change", ctx.history.change_24h())?;

    let health = if change_24h > NETWORK_HEALTH_THRESHOLD_PCT {
        Outlook::Bullish
    } else if change_24h < -NETWORK_HEALTH_THRESHOLD_PCT {
        Outlook::Bearish
    } else {
        Outlook::Neutral
    };

    Ok(ToolResult {
        signal: Signal::NetworkHealth { change_1h, change_24h, health },
        confidence: 0.6,
        reasoning: format!("On-chain: 24h change {change_24h:.2}%, network health: {health}"),
    })
}

pub fn analyze_sentiment(ctx: &ToolContext) -> Result<ToolResult> {
    let change_1h = ensure_finite(names::SENTIMENT, "1h change", hourly_change(ctx))?;

    let mood = if change_1h > SENTIMENT_THRESHOLD_PCT {
        Mood::FearOfMissingOut
    } else if change_1h < -SENTIMENT_THRESHOLD_PCT {
        Mood::FearUncertaintyDoubt
    } else {
        Mood::Calm
    };

    Ok(ToolResult {
        signal: Signal::Sentiment { mood, change_1h },
        confidence: 0.5,
        reasoning: format!("Based on recent movement: {mood} ({change_1h:.2}% 1h change)"),
    })
}

pub fn analyze_macro(ctx: &ToolContext) -> Result<ToolResult> {
    let change_24h = ensure_finite(names::MACRO, "24h change", ctx.history.change_24h())?;
    let change_7d = ensure_finite(
        names::MACRO,
        "7d change",
        ctx.history.percent_change(MACRO_WEEKLY_PERIODS),
    )?;

    let outlook = if change_7d > MACRO_WEEKLY_THRESHOLD_PCT {
        Outlook::StrongBullish
    } else if change_7d < -MACRO_WEEKLY_THRESHOLD_PCT {
        Outlook::StrongBearish
    } else if change_24h > 0.0 {
        Outlook::ShortTermBullish
    } else {
        Outlook::ShortTermBearish
    };

    Ok(ToolResult {
        signal: Signal::Macro { change_24h, change_7d, outlook },
        confidence: 0.65,
        reasoning: format!("Macro outlook: {outlook}. 7d: {change_7d:.1}%, 24h: {change_24h:.1}%"),
    })
}
