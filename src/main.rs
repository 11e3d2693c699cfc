// =============================================================================
// carry-arb-engine — entry point
// =============================================================================
//
// Wires together the venue clients, feed pipeline, analyzer and position
// manager under one `Supervisor`. Startup mirrors `open_exchanges` from the
// strategy this engine is modeled on: load clock offsets and markets, narrow
// to the common instrument set, rank by volume, then make margin/leverage
// idempotent per (venue, instrument) before the first tick.
// =============================================================================

mod analyzer;
mod config;
mod errors;
mod feed;
mod position;
mod reconcile;
mod refreshers;
mod status;
mod supervisor;
mod venue;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use futures_util::future::join_all;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::analyzer::{CommissionCache, SpreadAnalyzer};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::feed::aggregator::FeedAggregator;
use crate::feed::{ingestor, FeedDelta};
use crate::position::manager::{PositionManager, PositionManagerConfig};
use crate::supervisor::Supervisor;
use crate::venue::binance::BinanceClient;
use crate::venue::paper::PaperVenueClient;
use crate::venue::{MarginMode, VenueClient};

const RAW_CHANNEL_CAPACITY: usize = 4096;
const DELTA_CHANNEL_CAPACITY: usize = 1024;
const RECONCILE_CYCLE_MULTIPLE: u64 = 5;

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as i64
}

/// Build one `VenueClient` per configured venue. Any id other than
/// `"binance"` falls back to `PaperVenueClient` — a real second adapter is a
/// drop-in implementation of the same trait, out of scope per spec §1.
fn build_venue(cfg: &config::VenueConfig, ws_latency_threshold_seconds: u64) -> Arc<dyn VenueClient> {
    match cfg.id.as_str() {
        "binance" => {
            let api_key = std::env::var(&cfg.api_key_env).unwrap_or_default();
            let api_secret = std::env::var(&cfg.api_secret_env).unwrap_or_default();
            Arc::new(BinanceClient::new(api_key, api_secret, ws_latency_threshold_seconds))
        }
        other => {
            warn!(
                venue = other,
                "no concrete adapter for this venue id, using paper venue stand-in"
            );
            Arc::new(PaperVenueClient::new(other, 0.0004, 5.0))
        }
    }
}

/// Port of `open_exchanges`: load time offsets/markets for every venue, find
/// the common instrument set under `base_currency`, rank by 24h quote volume,
/// then idempotently set isolated margin + leverage on the selected set.
async fn open_venues(
    config: &EngineConfig,
    venues: &HashMap<String, Arc<dyn VenueClient>>,
) -> Result<Vec<String>> {
    let load_futures = venues.values().map(|client| {
        let client = client.clone();
        async move {
            client.load_time_difference().await?;
            client.load_markets().await?;
            anyhow::Ok(())
        }
    });
    for result in join_all(load_futures).await {
        result.context("failed to load venue time/markets at startup")?;
    }

    let mut common: Option<std::collections::HashSet<String>> = None;
    for client in venues.values() {
        let markets: std::collections::HashSet<String> = client
            .markets()
            .into_iter()
            .filter(|m| m.ends_with(config.base_currency.as_str()))
            .collect();
        common = Some(match common {
            Some(existing) => existing.intersection(&markets).cloned().collect(),
            None => markets,
        });
    }
    let common: Vec<String> = common.unwrap_or_default().into_iter().collect();
    if common.is_empty() {
        bail!(EngineError::ConfigInvariant {
            reason: format!(
                "no common {}-denominated markets across configured venues",
                config.base_currency
            ),
        });
    }

    let mut summed_volume: HashMap<String, f64> = HashMap::new();
    for client in venues.values() {
        let tickers = client.fetch_tickers(&common).await.unwrap_or_default();
        for (instrument, volume) in tickers {
            *summed_volume.entry(instrument).or_insert(0.0) += volume;
        }
    }

    let mut ranked: Vec<String> = common;
    ranked.sort_by(|a, b| {
        let va = summed_volume.get(a).copied().unwrap_or(0.0);
        let vb = summed_volume.get(b).copied().unwrap_or(0.0);
        vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(config.top_n_markets as usize);

    let margin_futures = venues.values().flat_map(|client| {
        ranked.iter().map(move |instrument| {
            let client = client.clone();
            let instrument = instrument.clone();
            async move {
                if let Err(e) = client.set_margin_mode(MarginMode::Isolated, &instrument).await {
                    warn!(venue = client.id(), instrument = %instrument, error = %e, "failed to set margin mode");
                }
                if let Err(e) = client.set_leverage(config.position.leverage, &instrument).await {
                    warn!(venue = client.id(), instrument = %instrument, error = %e, "failed to set leverage");
                }
            }
        })
    });
    join_all(margin_futures).await;

    info!(count = ranked.len(), venues = venues.len(), "venues opened and markets selected");
    Ok(ranked)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("carry-arb-engine starting up");

    let config_path = std::env::var("CARRY_ARB_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = EngineConfig::load(std::path::Path::new(&config_path))
        .await
        .context("failed to load engine config")?;

    if config.venues.len() < 2 {
        bail!(EngineError::ConfigInvariant {
            reason: "at least two venues are required for pairwise arbitrage".to_string(),
        });
    }

    let venues: HashMap<String, Arc<dyn VenueClient>> = config
        .venues
        .iter()
        .map(|v| (v.id.clone(), build_venue(v, config.ws_latency_threshold_seconds)))
        .collect();

    let instruments = open_venues(&config, &venues).await?;

    // ── Shared state ──────────────────────────────────────────────────────
    let balances: Arc<RwLock<HashMap<String, f64>>> =
        Arc::new(RwLock::new(venues.keys().map(|id| (id.clone(), 0.0)).collect()));
    let funding_rates: Arc<RwLock<HashMap<String, HashMap<String, f64>>>> =
        Arc::new(RwLock::new(HashMap::new()));

    let target_notional = config.position.usd_amount * config.position.leverage;
    let position_manager = Arc::new(PositionManager::new(
        balances.clone(),
        PositionManagerConfig {
            open_threshold_pct: config.open_position_net_spread_threshold_pct,
            close_raw_threshold_pct: config.close_position_raw_spread_threshold_pct,
            close_position_after_seconds: config.close_position_after_seconds,
            consider_funding: config.consider_funding,
            usd_amount: config.position.usd_amount,
            leverage: config.position.leverage,
            size_buffer_factor: config.position.size_buffer_factor,
            order_type: config.order_type,
            trailing_stop_enabled: config.position.trailing_stop_mode,
            trailing_stop_callback_pct: config.position.trailing_stop_callback_pct,
            open_max_data_age_ms: config.open_position_max_data_age_ms,
            close_max_data_age_ms: config.close_position_max_data_age_ms,
        },
    ));

    let mut supervisor = Supervisor::new(venues.clone());

    // ── Feed pipeline: ingestors -> aggregator -> analyzer/position manager ─
    let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
    let (delta_tx, mut delta_rx) = mpsc::channel::<FeedDelta>(DELTA_CHANNEL_CAPACITY);

    for venue_cfg in &config.venues {
        let client = match venues.get(&venue_cfg.id) {
            Some(c) => c.clone(),
            None => continue,
        };
        for instrument in &instruments {
            let client = client.clone();
            let instrument = instrument.clone();
            let tx = raw_tx.clone();
            let depth = venue_cfg.orderbook_depth;
            let retry_seconds = config.data_feed_retry_seconds;
            supervisor.spawn("feed_ingestor", async move {
                ingestor::run(client, instrument, depth, retry_seconds, tx).await;
            });
        }
    }
    drop(raw_tx);

    let aggregator = FeedAggregator::new(target_notional);
    supervisor.spawn("feed_aggregator", async move {
        aggregator.run(raw_rx, delta_tx).await;
    });

    // ── Spread analysis + position decisions: single sequential consumer ───
    {
        let venues = venues.clone();
        let funding_rates = funding_rates.clone();
        let position_manager = position_manager.clone();
        let analyze_max_age_ms = config.analyze_arbitrage_max_data_age_ms;
        supervisor.spawn("position_manager", async move {
            let commission_cache = CommissionCache::new();
            let market_info = |venue: &str, instrument: &str| {
                venues.get(venue).and_then(|c| c.market_info(instrument))
            };
            while let Some(delta) = delta_rx.recv().await {
                let now_ms = epoch_ms();
                let spreads = SpreadAnalyzer::analyze(
                    &delta,
                    &commission_cache,
                    market_info,
                    now_ms,
                    analyze_max_age_ms,
                );
                let funding_snapshot = funding_rates.read().clone();
                position_manager
                    .process_cycle(&spreads, &funding_snapshot, &venues, now_ms)
                    .await;
            }
        });
    }

    // ── Periodic background refreshers ──────────────────────────────────────
    {
        let venues = venues.clone();
        let balances = balances.clone();
        let base_currency = config.base_currency.clone();
        let interval = config.balance_fetch_interval_seconds;
        supervisor.spawn("balance_refresher", async move {
            refreshers::run_balance_refresher(venues, balances, base_currency, interval).await;
        });
    }
    {
        let venues = venues.clone();
        let funding_rates = funding_rates.clone();
        let interval = config.funding_rate_fetch_interval_seconds;
        supervisor.spawn("funding_refresher", async move {
            refreshers::run_funding_refresher(venues, funding_rates, interval).await;
        });
    }

    // ── Status reporting ─────────────────────────────────────────────────────
    {
        let position_manager = position_manager.clone();
        let interval = config.status_report_interval_seconds;
        supervisor.spawn("status_reporter", async move {
            status::run(&position_manager, interval).await;
        });
    }

    // ── Reconciliation: diagnostic-only, never corrects ─────────────────────
    {
        let venues = venues.clone();
        let position_manager = position_manager.clone();
        let interval = config.balance_fetch_interval_seconds * RECONCILE_CYCLE_MULTIPLE;
        supervisor.spawn("reconciler", async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval.max(1)));
            loop {
                ticker.tick().await;
                reconcile::reconcile_once(&position_manager, &venues).await;
            }
        });
    }

    info!("all subsystems running, press ctrl-c to stop");
    supervisor.run_until_shutdown().await;
    info!("carry-arb-engine shut down complete");
    Ok(())
}
