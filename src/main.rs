//! TOWN ORACLE: timed prediction rounds for the agent town.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! seeds the agent roster, starts the price feed and dashboard, then
//! drives the round scheduler until Ctrl+C.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use town_oracle::config::AppConfig;
use town_oracle::dashboard::{self, DashboardState};
use town_oracle::engine::{BroadcastSink, PredictionEngine, RoundScheduler, TickReport};
use town_oracle::feed::coingecko::CoinGeckoSource;
use town_oracle::feed::{self, PriceFeed};
use town_oracle::storage::{PredictionStore, SqliteStore};
use town_oracle::tools::ToolRegistry;

const BANNER: &str = r#"
 _____                      ___                 _
|_   _|____      ___ __    / _ \ _ __ __ _  ___| | ___
  | |/ _ \ \ /\ / / '_ \  | | | | '__/ _` |/ __| |/ _ \
  | | (_) \ V  V /| | | | | |_| | | | (_| | (__| |  __/
  |_|\___/ \_/\_/ |_| |_|  \___/|_|  \__,_|\___|_|\___|

  Agents predict. The market answers.
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load_default()?;

    init_logging();

    println!("{BANNER}");
    info!(
        coin = %cfg.feed.coin_id,
        vs_currency = %cfg.feed.vs_currency,
        round_duration_secs = cfg.rounds.round_duration_secs,
        agents = cfg.agents.len(),
        "TOWN ORACLE starting up"
    );

    // -- Storage ----------------------------------------------------------

    let store = Arc::new(SqliteStore::connect(&cfg.storage.database_url).await?);
    for agent in &cfg.agents {
        let profile = agent.to_profile();
        store
            .upsert_agent(&profile)
            .await
            .with_context(|| format!("Failed to seed agent {}", profile.id))?;
    }
    info!(database = %cfg.storage.database_url, "Agent roster seeded");

    // -- Price feed -------------------------------------------------------

    let api_key = cfg.feed.api_key();
    if cfg.feed.api_key_env.is_some() && api_key.is_none() {
        warn!("CoinGecko key env var is set in config but missing, using the public tier");
    }
    let source = CoinGeckoSource::new(
        cfg.feed.base_url.clone(),
        cfg.feed.coin_id.clone(),
        cfg.feed.vs_currency.clone(),
        cfg.feed.request_timeout(),
        api_key,
    )?;
    let price_feed = Arc::new(PriceFeed::new(Arc::new(source), cfg.feed.settings()));
    let seed = price_feed.refresh().await;
    if price_feed.has_observation().await {
        info!(price = seed.price, change_24h = seed.change_24h, "Initial price fetched");
    } else {
        warn!("Initial price fetch failed, rounds open once a price arrives");
    }
    let _refresh = feed::spawn_refresh_loop(price_feed.clone());

    // -- Engine and events ------------------------------------------------

    let engine = Arc::new(PredictionEngine::new(
        price_feed.clone(),
        ToolRegistry::builtin(),
        cfg.rounds.tool_timeout(),
    ));
    let sink = Arc::new(BroadcastSink::new(cfg.dashboard.event_buffer.max(16)));

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(
            price_feed.clone(),
            store.clone(),
            cfg.rounds.scheduler_settings().round_duration,
            cfg.dashboard.event_buffer,
        ));
        let _recorder = dashboard::spawn_event_recorder(state.clone(), sink.subscribe());
        let _server = dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    }

    let mut scheduler = RoundScheduler::new(
        engine,
        store.clone(),
        sink,
        cfg.rounds.scheduler_settings(),
    );

    // -- Main loop --------------------------------------------------------

    let mut interval = tokio::time::interval(cfg.rounds.tick_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        tick_interval_secs = cfg.rounds.tick_interval_secs,
        "Entering round loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = scheduler.tick(Utc::now()).await;
                log_tick_report(&report);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    match store.list_agents().await {
        Ok(summaries) => {
            for s in summaries {
                info!(
                    agent = %s.profile.name,
                    correct = s.correct_predictions,
                    total = s.total_predictions,
                    accuracy = format!("{:.1}%", s.accuracy()),
                    "Final standing"
                );
            }
        }
        Err(e) => error!(error = %e, "Failed to read final standings"),
    }
    info!(last_round = ?scheduler.last_round(), "TOWN ORACLE shut down cleanly.");

    Ok(())
}

/// Log a tick summary when something happened.
fn log_tick_report(report: &TickReport) {
    if !report.opened && report.resolved_round.is_none() {
        return;
    }
    info!(
        round = report.round,
        resolved_round = ?report.resolved_round,
        resolved = report.resolved,
        opened = report.opened,
        predictions = report.predictions_made,
        duplicates = report.duplicates,
        failures = report.agent_failures,
        "Tick complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("town_oracle=info"));

    let json_logging = std::env::var("TOWN_ORACLE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
