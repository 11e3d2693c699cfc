// =============================================================================
// Engine configuration — parsed once at startup, persisted atomically
// =============================================================================
//
// Field names and defaults follow `BotConfig`/`PositionConfig` from the
// strategy this engine is modeled on, including a couple
// (`adaptive_thresholds`, `volatility_window`) that were wired up elsewhere
// but never actually used to adjust behavior — kept here only so a config
// file written by an older version still parses.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::venue::{MarginMode, OrderType};

fn default_base_currency() -> String {
    "USDT".to_string()
}

fn default_top_n_markets() -> u32 {
    200
}

fn default_open_threshold_pct() -> f64 {
    0.1
}

fn default_close_raw_threshold_pct() -> f64 {
    0.02
}

fn default_close_after_seconds() -> u64 {
    3 * 60 * 60
}

fn default_analyze_max_age_ms() -> i64 {
    400
}

fn default_open_max_age_ms() -> i64 {
    200
}

fn default_close_max_age_ms() -> i64 {
    200
}

fn default_ws_latency_threshold_seconds() -> u64 {
    5
}

fn default_funding_interval_seconds() -> u64 {
    300
}

fn default_balance_interval_seconds() -> u64 {
    60
}

fn default_status_report_interval_seconds() -> u64 {
    60
}

fn default_data_feed_retry_seconds() -> u64 {
    30
}

fn default_orderbook_depth() -> u32 {
    50
}

fn default_max_slippage_pct() -> f64 {
    1.0
}

fn default_usd_amount() -> f64 {
    5.5
}

fn default_leverage() -> f64 {
    1.0
}

fn default_size_buffer_factor() -> f64 {
    1.05
}

fn default_margin_mode() -> MarginMode {
    MarginMode::Isolated
}

fn default_order_type() -> OrderType {
    OrderType::Market
}

fn default_trailing_callback_pct() -> f64 {
    0.5
}

fn default_volatility_window() -> u32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub id: String,
    pub api_key_env: String,
    pub api_secret_env: String,
    #[serde(default = "default_orderbook_depth")]
    pub orderbook_depth: u32,
}

/// Per-position sizing, mirroring `PositionConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionConfig {
    #[serde(default = "default_usd_amount")]
    pub usd_amount: f64,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    #[serde(default = "default_size_buffer_factor")]
    pub size_buffer_factor: f64,
    #[serde(default)]
    pub trailing_stop_mode: bool,
    #[serde(default = "default_trailing_callback_pct")]
    pub trailing_stop_callback_pct: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            usd_amount: default_usd_amount(),
            leverage: default_leverage(),
            size_buffer_factor: default_size_buffer_factor(),
            trailing_stop_mode: false,
            trailing_stop_callback_pct: default_trailing_callback_pct(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub venues: Vec<VenueConfig>,

    #[serde(default)]
    pub position: PositionConfig,

    #[serde(default = "default_base_currency")]
    pub base_currency: String,

    #[serde(default = "default_top_n_markets")]
    pub top_n_markets: u32,

    #[serde(default = "default_order_type")]
    pub order_type: OrderType,

    #[serde(default = "default_open_threshold_pct")]
    pub open_position_net_spread_threshold_pct: f64,

    #[serde(default = "default_close_raw_threshold_pct")]
    pub close_position_raw_spread_threshold_pct: f64,

    #[serde(default = "default_close_after_seconds")]
    pub close_position_after_seconds: u64,

    #[serde(default)]
    pub consider_funding: bool,

    #[serde(default = "default_analyze_max_age_ms")]
    pub analyze_arbitrage_max_data_age_ms: i64,

    #[serde(default = "default_open_max_age_ms")]
    pub open_position_max_data_age_ms: i64,

    #[serde(default = "default_close_max_age_ms")]
    pub close_position_max_data_age_ms: i64,

    #[serde(default = "default_ws_latency_threshold_seconds")]
    pub ws_latency_threshold_seconds: u64,

    #[serde(default = "default_data_feed_retry_seconds")]
    pub data_feed_retry_seconds: u64,

    #[serde(default = "default_funding_interval_seconds")]
    pub funding_rate_fetch_interval_seconds: u64,

    #[serde(default = "default_balance_interval_seconds")]
    pub balance_fetch_interval_seconds: u64,

    #[serde(default = "default_status_report_interval_seconds")]
    pub status_report_interval_seconds: u64,

    #[serde(default = "default_max_slippage_pct")]
    pub max_slippage_pct: f64,

    #[serde(default = "default_margin_mode")]
    pub margin_mode: MarginMode,

    /// Never actually consulted by the analyzer or position manager — kept
    /// for config-file compatibility with the strategy this was adapted
    /// from, which wired these in but left the threshold static.
    #[serde(default)]
    pub adaptive_thresholds: bool,
    #[serde(default = "default_volatility_window")]
    pub volatility_window: u32,
}

impl EngineConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config from {}", path.display()))?;
        Ok(config)
    }

    /// Write via a temp file + rename so a crash mid-write never leaves a
    /// truncated config on disk.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let serialized = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&tmp_path, serialized)
            .await
            .with_context(|| format!("writing temp config to {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("renaming temp config into {}", path.display()))?;
        info!(path = %path.display(), "config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_missing_fields() {
        let json = r#"{"venues":[{"id":"binance","api_key_env":"BINANCE_KEY","api_secret_env":"BINANCE_SECRET"}]}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.base_currency, "USDT");
        assert_eq!(config.top_n_markets, 200);
        assert!((config.open_position_net_spread_threshold_pct - 0.1).abs() < 1e-9);
        assert!((config.close_position_raw_spread_threshold_pct - 0.02).abs() < 1e-9);
        assert_eq!(config.close_position_after_seconds, 3 * 60 * 60);
        assert!(!config.consider_funding);
        assert!(!config.position.trailing_stop_mode);
        assert!((config.position.usd_amount - 5.5).abs() < 1e-9);
        assert!((config.position.size_buffer_factor - 1.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("carry-arb-engine-config-test-{}.json", std::process::id()));

        let config = EngineConfig {
            venues: vec![VenueConfig {
                id: "binance".to_string(),
                api_key_env: "BINANCE_KEY".to_string(),
                api_secret_env: "BINANCE_SECRET".to_string(),
                orderbook_depth: 50,
            }],
            position: PositionConfig::default(),
            base_currency: "USDT".to_string(),
            top_n_markets: 50,
            order_type: OrderType::Market,
            open_position_net_spread_threshold_pct: 0.5,
            close_position_raw_spread_threshold_pct: 0.02,
            close_position_after_seconds: 10_800,
            consider_funding: true,
            analyze_arbitrage_max_data_age_ms: 400,
            open_position_max_data_age_ms: 200,
            close_position_max_data_age_ms: 200,
            ws_latency_threshold_seconds: 5,
            data_feed_retry_seconds: 30,
            funding_rate_fetch_interval_seconds: 300,
            balance_fetch_interval_seconds: 60,
            status_report_interval_seconds: 60,
            max_slippage_pct: 1.0,
            margin_mode: MarginMode::Isolated,
            adaptive_thresholds: false,
            volatility_window: 100,
        };

        config.save(&path).await.unwrap();
        let loaded = EngineConfig::load(&path).await.unwrap();
        assert_eq!(loaded.top_n_markets, 50);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
