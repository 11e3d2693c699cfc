// =============================================================================
// VenueClient — capability abstraction over a single exchange
// =============================================================================
//
// Every concrete exchange adapter (REST + WS bindings, request signing,
// symbol-precision rules) implements this trait. The rest of the engine only
// ever talks to `dyn VenueClient`, so a second real venue is a drop-in
// implementation, not a redesign.
// =============================================================================

pub mod binance;
pub mod paper;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A single price level in an order book side.
pub type Level = (f64, f64);

/// A raw order-book snapshot as delivered by a venue's depth stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub venue: String,
    pub instrument: String,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub timestamp_ms: i64,
}

/// Per-instrument metadata needed to size and validate orders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketInfo {
    pub taker_fee: f64,
    pub min_notional: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    TrailingStopMarket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    Isolated,
    Cross,
}

/// Venue-specific extra parameters a single order may need.
#[derive(Debug, Clone, Default)]
pub struct OrderParams {
    pub reduce_only: bool,
    pub post_only: bool,
    /// Binance-style trailing callback rate, e.g. `0.5` for 0.5%.
    pub callback_rate_pct: Option<f64>,
    /// Bybit-style trailing stop, absolute quote-currency distance.
    pub trailing_amount: Option<f64>,
    pub client_order_id: Option<String>,
}

/// Acknowledgement returned by a successful order placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
}

/// A venue-reported open position (used by reconciliation and `stats`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionInfo {
    pub contracts: f64,
    pub unrealized_pnl: f64,
}

/// Capability surface the rest of the engine needs from an exchange.
///
/// Implementations own their own connection/auth state and are expected to
/// be cheap to clone (wrap internals in `Arc` as needed).
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn id(&self) -> &str;

    /// Measure and cache the clock offset to the venue's servers.
    async fn load_time_difference(&self) -> anyhow::Result<()>;

    /// Fetch and cache tradable instruments and their precision/fee metadata.
    async fn load_markets(&self) -> anyhow::Result<()>;

    /// Instruments available after `load_markets`, filtered to the venue's
    /// perpetual-futures market suffix.
    fn markets(&self) -> Vec<String>;

    /// Cached per-instrument fee/precision metadata, populated by `load_markets`.
    fn market_info(&self, instrument: &str) -> Option<MarketInfo>;

    /// 24h quote-volume ticker data for the given instruments.
    async fn fetch_tickers(&self, instruments: &[String]) -> anyhow::Result<HashMap<String, f64>>;

    /// Subscribe to the depth stream for `instrument` and push snapshots into
    /// `tx` until the transport ends or errors. Runs until disconnect —
    /// callers own the reconnect loop.
    async fn watch_order_book(
        &self,
        instrument: &str,
        depth: u32,
        tx: mpsc::Sender<BookSnapshot>,
    ) -> anyhow::Result<()>;

    /// Free balance per asset.
    async fn fetch_balance(&self) -> anyhow::Result<HashMap<String, f64>>;

    /// Current funding rate per instrument.
    async fn fetch_funding_rates(&self) -> anyhow::Result<HashMap<String, f64>>;

    /// Current contract/PnL state for the given instruments.
    async fn fetch_positions(
        &self,
        instruments: &[String],
    ) -> anyhow::Result<HashMap<String, PositionInfo>>;

    async fn create_order(
        &self,
        instrument: &str,
        order_type: OrderType,
        side: OrderSide,
        amount: f64,
        price: Option<f64>,
        params: OrderParams,
    ) -> anyhow::Result<OrderAck>;

    async fn cancel_order(&self, order_id: &str, instrument: &str) -> anyhow::Result<()>;

    async fn cancel_all_orders(&self, instrument: &str) -> anyhow::Result<()>;

    async fn set_margin_mode(&self, mode: MarginMode, instrument: &str) -> anyhow::Result<()>;

    async fn set_leverage(&self, leverage: f64, instrument: &str) -> anyhow::Result<()>;

    /// Round `amount` to the instrument's lot-size precision.
    fn amount_to_precision(&self, instrument: &str, amount: f64) -> f64;

    /// Release any held connections (WS sockets, HTTP keep-alives).
    async fn close(&self) -> anyhow::Result<()>;
}
