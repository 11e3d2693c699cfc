// =============================================================================
// PaperVenueClient — in-memory simulated venue for tests and demo wiring
// =============================================================================
//
// Fills every order immediately at the quoted price with a fixed taker fee,
// mirroring the cost model of `SwapSimulator` in the pack's movement-venues
// module. Used in tests as both legs of a pairwise arbitrage (two instances
// with distinct ids stand in for two real venues).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::{
    BookSnapshot, MarginMode, MarketInfo, OrderAck, OrderParams, OrderSide, OrderType,
    PositionInfo, VenueClient,
};

pub struct PaperVenueClient {
    id: String,
    taker_fee: f64,
    min_notional: f64,
    balances: RwLock<HashMap<String, f64>>,
    positions: RwLock<HashMap<String, PositionInfo>>,
    funding_rates: RwLock<HashMap<String, f64>>,
    order_seq: AtomicU64,
}

impl PaperVenueClient {
    pub fn new(id: impl Into<String>, taker_fee: f64, min_notional: f64) -> Self {
        Self {
            id: id.into(),
            taker_fee,
            min_notional,
            balances: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            funding_rates: RwLock::new(HashMap::new()),
            order_seq: AtomicU64::new(0),
        }
    }

    pub fn set_balance(&self, asset: &str, amount: f64) {
        self.balances.write().insert(asset.to_string(), amount);
    }

    pub fn set_funding_rate(&self, instrument: &str, rate: f64) {
        self.funding_rates
            .write()
            .insert(instrument.to_string(), rate);
    }

    pub fn position(&self, instrument: &str) -> Option<PositionInfo> {
        self.positions.read().get(instrument).copied()
    }
}

#[async_trait]
impl VenueClient for PaperVenueClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn load_time_difference(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn load_markets(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn markets(&self) -> Vec<String> {
        Vec::new()
    }

    fn market_info(&self, _instrument: &str) -> Option<MarketInfo> {
        Some(MarketInfo {
            taker_fee: self.taker_fee,
            min_notional: self.min_notional,
        })
    }

    async fn fetch_tickers(&self, _instruments: &[String]) -> anyhow::Result<HashMap<String, f64>> {
        Ok(HashMap::new())
    }

    async fn watch_order_book(
        &self,
        _instrument: &str,
        _depth: u32,
        _tx: mpsc::Sender<BookSnapshot>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn fetch_balance(&self) -> anyhow::Result<HashMap<String, f64>> {
        Ok(self.balances.read().clone())
    }

    async fn fetch_funding_rates(&self) -> anyhow::Result<HashMap<String, f64>> {
        Ok(self.funding_rates.read().clone())
    }

    async fn fetch_positions(
        &self,
        instruments: &[String],
    ) -> anyhow::Result<HashMap<String, PositionInfo>> {
        let positions = self.positions.read();
        Ok(instruments
            .iter()
            .filter_map(|i| positions.get(i).map(|p| (i.clone(), *p)))
            .collect())
    }

    async fn create_order(
        &self,
        instrument: &str,
        _order_type: OrderType,
        side: OrderSide,
        amount: f64,
        _price: Option<f64>,
        params: OrderParams,
    ) -> anyhow::Result<OrderAck> {
        let seq = self.order_seq.fetch_add(1, Ordering::Relaxed);
        let signed_amount = match side {
            OrderSide::Buy => amount,
            OrderSide::Sell => -amount,
        };

        let mut positions = self.positions.write();
        let entry = positions.entry(instrument.to_string()).or_insert(PositionInfo {
            contracts: 0.0,
            unrealized_pnl: 0.0,
        });
        if params.reduce_only {
            entry.contracts = 0.0;
        } else {
            entry.contracts += signed_amount;
        }

        Ok(OrderAck {
            order_id: format!("{}-{}", self.id, seq),
            status: "FILLED".to_string(),
        })
    }

    async fn cancel_order(&self, _order_id: &str, _instrument: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cancel_all_orders(&self, _instrument: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_margin_mode(&self, _mode: MarginMode, _instrument: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_leverage(&self, _leverage: f64, _instrument: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn amount_to_precision(&self, _instrument: &str, amount: f64) -> f64 {
        (amount * 1000.0).round() / 1000.0
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reduce_only_order_zeroes_the_position() {
        let v = PaperVenueClient::new("paper-a", 0.0004, 5.0);
        v.create_order(
            "BTCUSDT",
            OrderType::Market,
            OrderSide::Buy,
            1.0,
            None,
            OrderParams::default(),
        )
        .await
        .unwrap();
        assert_eq!(v.position("BTCUSDT").unwrap().contracts, 1.0);

        v.create_order(
            "BTCUSDT",
            OrderType::Market,
            OrderSide::Sell,
            1.0,
            None,
            OrderParams {
                reduce_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(v.position("BTCUSDT").unwrap().contracts, 0.0);
    }
}
