// =============================================================================
// PositionManager — close-before-open position lifecycle
// =============================================================================
//
// Every cycle: walk existing positions and close any whose spread has
// degraded past the close threshold or have been held past the configured
// holding time, THEN build opens from the remaining spreads, excluding
// instruments just closed this cycle. Mirrors `process_positions`'s ordering
// exactly — a position is never closed and reopened in the same cycle.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::analyzer::{SpreadData, SpreadKey};
use crate::errors::EngineError;
use crate::venue::{OrderParams, OrderSide, OrderType, VenueClient};

use super::{have_to_close_position, have_to_open_position, Position, PositionStatus};

pub struct PositionManagerConfig {
    pub open_threshold_pct: f64,
    pub close_raw_threshold_pct: f64,
    pub close_position_after_seconds: u64,
    pub consider_funding: bool,
    pub usd_amount: f64,
    pub leverage: f64,
    pub size_buffer_factor: f64,
    pub order_type: OrderType,
    pub trailing_stop_enabled: bool,
    pub trailing_stop_callback_pct: f64,
    pub open_max_data_age_ms: i64,
    pub close_max_data_age_ms: i64,
}

pub struct PositionManager {
    positions: RwLock<HashMap<String, Position>>,
    balances: Arc<RwLock<HashMap<String, f64>>>,
    config: PositionManagerConfig,
}

impl PositionManager {
    pub fn new(balances: Arc<RwLock<HashMap<String, f64>>>, config: PositionManagerConfig) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            balances,
            config,
        }
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    fn funding_adj_pct(
        &self,
        funding_rates: &HashMap<String, HashMap<String, f64>>,
        buy_venue: &str,
        sell_venue: &str,
        instrument: &str,
    ) -> f64 {
        if !self.config.consider_funding {
            return 0.0;
        }
        let buy_rate = funding_rates
            .get(buy_venue)
            .and_then(|m| m.get(instrument))
            .copied()
            .unwrap_or(0.0);
        let sell_rate = funding_rates
            .get(sell_venue)
            .and_then(|m| m.get(instrument))
            .copied()
            .unwrap_or(0.0);
        (buy_rate - sell_rate) * 100.0
    }

    /// Run one decision cycle: close degraded/expired positions, then open
    /// new ones from whatever spreads remain eligible. `now_ms` is wall-clock
    /// epoch milliseconds, used only to compare against `SpreadData`'s
    /// quote-derived `min_timestamp_ms`; position aging uses `Instant::now()`.
    pub async fn process_cycle(
        &self,
        spreads: &HashMap<SpreadKey, SpreadData>,
        funding_rates: &HashMap<String, HashMap<String, f64>>,
        venues: &HashMap<String, Arc<dyn VenueClient>>,
        now_ms: i64,
    ) {
        let closed_instruments = self.process_closes(spreads, funding_rates, venues, now_ms).await;
        self.process_opens(spreads, funding_rates, venues, &closed_instruments, now_ms)
            .await;
    }

    async fn process_closes(
        &self,
        spreads: &HashMap<SpreadKey, SpreadData>,
        funding_rates: &HashMap<String, HashMap<String, f64>>,
        venues: &HashMap<String, Arc<dyn VenueClient>>,
        now_ms: i64,
    ) -> HashSet<String> {
        let candidates: Vec<Position> = self.positions.read().values().cloned().collect();
        let mut closed = HashSet::new();

        for position in candidates {
            let key = (
                position.instrument.clone(),
                position.buy_venue.clone(),
                position.sell_venue.clone(),
            );
            let spread = match spreads.get(&key) {
                Some(s) => s,
                None => continue,
            };
            if now_ms - spread.min_timestamp_ms > self.config.close_max_data_age_ms {
                continue;
            }

            let funding_adj = self.funding_adj_pct(
                funding_rates,
                &position.buy_venue,
                &position.sell_venue,
                &position.instrument,
            );
            let time_based = Instant::now()
                >= position.opened_at + Duration::from_secs(self.config.close_position_after_seconds);
            if !have_to_close_position(
                spread.raw_spread_pct,
                funding_adj,
                self.config.close_raw_threshold_pct,
                time_based,
            ) {
                continue;
            }

            let buy_client = venues.get(&position.buy_venue);
            let sell_client = venues.get(&position.sell_venue);
            let (buy_client, sell_client) = match (buy_client, sell_client) {
                (Some(b), Some(s)) => (b, s),
                _ => continue,
            };

            info!(
                instrument = %position.instrument,
                buy_venue = %position.buy_venue,
                sell_venue = %position.sell_venue,
                raw_spread_pct = spread.raw_spread_pct,
                time_based,
                "closing position"
            );

            // Cancel any live trailing-stop orders before the reduce-only
            // market close, swallowing "not found" — the stop may already
            // have triggered.
            if let Some(id) = &position.buy_trailing_stop_id {
                let _ = buy_client.cancel_order(id, &position.instrument).await;
            }
            if let Some(id) = &position.sell_trailing_stop_id {
                let _ = sell_client.cancel_order(id, &position.instrument).await;
            }

            let close_buy_leg = buy_client.create_order(
                &position.instrument,
                OrderType::Market,
                OrderSide::Sell,
                position.bought_contracts.abs(),
                None,
                OrderParams {
                    reduce_only: true,
                    ..Default::default()
                },
            );
            let close_sell_leg = sell_client.create_order(
                &position.instrument,
                OrderType::Market,
                OrderSide::Buy,
                position.sold_contracts.abs(),
                None,
                OrderParams {
                    reduce_only: true,
                    ..Default::default()
                },
            );
            let (buy_leg_result, sell_leg_result) = tokio::join!(close_buy_leg, close_sell_leg);

            if let Err(e) = &buy_leg_result {
                error!(venue = %position.buy_venue, instrument = %position.instrument, error = %e, "close leg failed");
            }
            if let Err(e) = &sell_leg_result {
                error!(venue = %position.sell_venue, instrument = %position.instrument, error = %e, "close leg failed");
            }

            let _ = buy_client.cancel_all_orders(&position.instrument).await;
            let _ = sell_client.cancel_all_orders(&position.instrument).await;

            self.positions.write().remove(&position.instrument);
            closed.insert(position.instrument.clone());
        }

        closed
    }

    async fn process_opens(
        &self,
        spreads: &HashMap<SpreadKey, SpreadData>,
        funding_rates: &HashMap<String, HashMap<String, f64>>,
        venues: &HashMap<String, Arc<dyn VenueClient>>,
        closed_this_cycle: &HashSet<String>,
        now_ms: i64,
    ) {
        let already_open: HashSet<String> = self.positions.read().keys().cloned().collect();

        for (key, spread) in spreads {
            let (instrument, buy_venue, sell_venue) = key;
            if closed_this_cycle.contains(instrument) || already_open.contains(instrument) {
                continue;
            }
            if now_ms - spread.min_timestamp_ms > self.config.open_max_data_age_ms {
                continue;
            }

            let funding_adj = self.funding_adj_pct(funding_rates, buy_venue, sell_venue, instrument);
            if !have_to_open_position(spread.net_spread_pct, funding_adj, self.config.open_threshold_pct) {
                continue;
            }

            let buy_client = venues.get(buy_venue);
            let sell_client = venues.get(sell_venue);
            let (buy_client, sell_client) = match (buy_client, sell_client) {
                (Some(b), Some(s)) => (b, s),
                _ => continue,
            };

            let min_notional = buy_client
                .market_info(instrument)
                .map(|m| m.min_notional)
                .unwrap_or(5.0)
                .max(sell_client.market_info(instrument).map(|m| m.min_notional).unwrap_or(5.0));
            if self.config.usd_amount < min_notional {
                let err = EngineError::InvalidOrder {
                    reason: format!(
                        "requested notional {} below venue minimum {min_notional}",
                        self.config.usd_amount
                    ),
                };
                warn!(instrument = %instrument, error = %err, "skipping open");
                continue;
            }

            let amount = compute_order_amount(
                buy_client.as_ref(),
                sell_client.as_ref(),
                instrument,
                self.config.usd_amount * self.config.leverage,
                spread.buy_price,
                spread.sell_price,
            );
            if amount <= 0.0 {
                let err = EngineError::InvalidOrder {
                    reason: "quantized order amount rounded to zero".to_string(),
                };
                warn!(instrument = %instrument, error = %err, "skipping open");
                continue;
            }

            let position_size = self.config.usd_amount * self.config.size_buffer_factor;
            if !self.has_sufficient_balance(buy_venue, sell_venue, position_size) {
                warn!(instrument = %instrument, buy_venue = %buy_venue, sell_venue = %sell_venue, "insufficient balance, skipping open");
                continue;
            }

            info!(
                instrument = %instrument,
                buy_venue = %buy_venue,
                sell_venue = %sell_venue,
                net_spread_pct = spread.net_spread_pct,
                amount,
                "opening position"
            );

            let price_for_limit = |side_price: f64| {
                if self.config.order_type == OrderType::Limit {
                    Some(side_price)
                } else {
                    None
                }
            };
            // Shared group id ties both legs of a pair together in venue order
            // history, which is all the idempotence a fire-and-forget paired
            // open needs — retries aren't attempted within a cycle.
            let group_id = uuid::Uuid::new_v4();
            let leg_params = OrderParams {
                post_only: self.config.order_type == OrderType::Limit,
                ..Default::default()
            };

            let open_buy_leg = buy_client.create_order(
                instrument,
                self.config.order_type,
                OrderSide::Buy,
                amount,
                price_for_limit(spread.buy_price),
                OrderParams {
                    client_order_id: Some(format!("arb-{group_id}-buy")),
                    ..leg_params.clone()
                },
            );
            let open_sell_leg = sell_client.create_order(
                instrument,
                self.config.order_type,
                OrderSide::Sell,
                amount,
                price_for_limit(spread.sell_price),
                OrderParams {
                    client_order_id: Some(format!("arb-{group_id}-sell")),
                    ..leg_params
                },
            );
            let (buy_ack, sell_ack) = tokio::join!(open_buy_leg, open_sell_leg);

            // Deliberately no rollback here: if one leg fills and the other
            // doesn't, the filled leg is left exactly as it landed on the
            // venue for the reconciler to surface as drift. Auto-unwinding it
            // would itself need its own failure handling.
            match (buy_ack, sell_ack) {
                (Ok(buy_ack), Ok(sell_ack)) => {
                    self.decrement_balance(buy_venue, position_size);
                    self.decrement_balance(sell_venue, position_size);

                    let (bought, sold) = tokio::join!(
                        fetch_contracts(buy_client.as_ref(), instrument),
                        fetch_contracts(sell_client.as_ref(), instrument),
                    );
                    let bought_contracts = bought.unwrap_or(amount);
                    let sold_contracts = sold.unwrap_or(amount);

                    let (buy_trailing_stop_id, sell_trailing_stop_id) = if self.config.trailing_stop_enabled {
                        self.place_trailing_stops(
                            buy_client.as_ref(),
                            sell_client.as_ref(),
                            instrument,
                            bought_contracts.abs(),
                            sold_contracts.abs(),
                            spread.buy_price,
                            spread.sell_price,
                        )
                        .await
                    } else {
                        (None, None)
                    };

                    self.positions.write().insert(
                        instrument.clone(),
                        Position {
                            instrument: instrument.clone(),
                            buy_venue: buy_venue.clone(),
                            sell_venue: sell_venue.clone(),
                            buy_price: spread.buy_price,
                            sell_price: spread.sell_price,
                            requested_usd: self.config.usd_amount,
                            leverage: self.config.leverage,
                            amount,
                            bought_contracts,
                            sold_contracts,
                            buy_order_id: buy_ack.order_id,
                            sell_order_id: sell_ack.order_id,
                            buy_trailing_stop_id,
                            sell_trailing_stop_id,
                            status: PositionStatus::Open,
                            opened_at: Instant::now(),
                            entry_net_spread_pct: spread.net_spread_pct,
                        },
                    );
                }
                (buy_res, sell_res) => {
                    // Abort: record the failure, do not commit the position.
                    // A `Pending` that fails to open is discarded without
                    // entering `Open` — whichever leg did fill is left exactly
                    // as it landed on the venue for the reconciler to surface
                    // as drift; balances are not touched since nothing here is
                    // tracked as an open position.
                    let rejecting_venue = if buy_res.is_err() { buy_venue } else { sell_venue };
                    let reason = buy_res
                        .as_ref()
                        .err()
                        .or(sell_res.as_ref().err())
                        .map(|e| e.to_string())
                        .unwrap_or_default();
                    let err = EngineError::VenueRejected {
                        venue: rejecting_venue.clone(),
                        reason,
                    };
                    error!(
                        instrument = %instrument,
                        buy_venue = %buy_venue,
                        sell_venue = %sell_venue,
                        buy_ok = buy_res.is_ok(),
                        sell_ok = sell_res.is_ok(),
                        error = %err,
                        "partial open failure, position discarded"
                    );
                }
            }
        }
    }

    /// Place reduce-only trailing-stop orders on each leg, in the hedging
    /// direction (a long's trailing stop is a sell; a short's is a buy).
    /// Best-effort: a failure here is logged, not fatal to the open.
    async fn place_trailing_stops(
        &self,
        buy_client: &dyn VenueClient,
        sell_client: &dyn VenueClient,
        instrument: &str,
        bought_amount: f64,
        sold_amount: f64,
        buy_reference_price: f64,
        sell_reference_price: f64,
    ) -> (Option<String>, Option<String>) {
        let callback_pct = self.config.trailing_stop_callback_pct;

        let buy_params = super::trailing_stop::build_order_params(buy_client.id(), callback_pct, buy_reference_price);
        let sell_params = super::trailing_stop::build_order_params(sell_client.id(), callback_pct, sell_reference_price);

        let buy_stop = buy_client.create_order(
            instrument,
            OrderType::TrailingStopMarket,
            OrderSide::Sell,
            bought_amount,
            None,
            buy_params,
        );
        let sell_stop = sell_client.create_order(
            instrument,
            OrderType::TrailingStopMarket,
            OrderSide::Buy,
            sold_amount,
            None,
            sell_params,
        );
        let (buy_res, sell_res) = tokio::join!(buy_stop, sell_stop);

        let buy_id = match buy_res {
            Ok(ack) => Some(ack.order_id),
            Err(e) => {
                warn!(venue = buy_client.id(), instrument, error = %e, "trailing stop placement failed");
                None
            }
        };
        let sell_id = match sell_res {
            Ok(ack) => Some(ack.order_id),
            Err(e) => {
                warn!(venue = sell_client.id(), instrument, error = %e, "trailing stop placement failed");
                None
            }
        };
        (buy_id, sell_id)
    }

    fn has_sufficient_balance(&self, buy_venue: &str, sell_venue: &str, position_size: f64) -> bool {
        let balances = self.balances.read();
        let buy_ok = balances.get(buy_venue).copied().unwrap_or(0.0) >= position_size;
        let sell_ok = balances.get(sell_venue).copied().unwrap_or(0.0) >= position_size;
        buy_ok && sell_ok
    }

    fn decrement_balance(&self, venue: &str, amount: f64) {
        if let Some(b) = self.balances.write().get_mut(venue) {
            *b -= amount;
        }
    }
}

async fn fetch_contracts(client: &dyn VenueClient, instrument: &str) -> Option<f64> {
    let instruments = [instrument.to_string()];
    match client.fetch_positions(&instruments).await {
        Ok(map) => map.get(instrument).map(|p| p.contracts),
        Err(e) => {
            warn!(venue = client.id(), instrument, error = %e, "failed to fetch resulting position size");
            None
        }
    }
}

/// Quantize the target notional to both legs' lot-size precision and take the
/// coarser of the two, so neither venue rejects the order for over-precision.
fn compute_order_amount(
    buy_client: &dyn VenueClient,
    sell_client: &dyn VenueClient,
    instrument: &str,
    position_notional: f64,
    buy_price: f64,
    sell_price: f64,
) -> f64 {
    let mid_price = (buy_price + sell_price) / 2.0;
    if mid_price <= 0.0 {
        return 0.0;
    }
    let raw = position_notional / mid_price;
    let buy_amt = buy_client.amount_to_precision(instrument, raw);
    let sell_amt = sell_client.amount_to_precision(instrument, raw);
    if buy_amt != sell_amt {
        let max_amt = buy_amt.max(sell_amt);
        let buy_amt = buy_client.amount_to_precision(instrument, max_amt);
        let sell_amt = sell_client.amount_to_precision(instrument, max_amt);
        return buy_amt.min(sell_amt);
    }
    buy_amt.min(sell_amt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::paper::PaperVenueClient;

    fn config() -> PositionManagerConfig {
        PositionManagerConfig {
            open_threshold_pct: 0.4,
            close_raw_threshold_pct: 0.0,
            close_position_after_seconds: 300,
            consider_funding: true,
            usd_amount: 100.0,
            leverage: 1.0,
            size_buffer_factor: 1.0,
            order_type: OrderType::Market,
            trailing_stop_enabled: false,
            trailing_stop_callback_pct: 0.5,
            open_max_data_age_ms: 100_000,
            close_max_data_age_ms: 100_000,
        }
    }

    fn spread(raw_spread_pct: f64, net_spread_pct: f64, buy_price: f64, sell_price: f64) -> SpreadData {
        SpreadData {
            buy_price,
            sell_price,
            raw_spread_pct,
            commission_pct: raw_spread_pct - net_spread_pct,
            net_spread_pct,
            min_timestamp_ms: 0,
        }
    }

    fn venues() -> (Arc<PaperVenueClient>, Arc<PaperVenueClient>, HashMap<String, Arc<dyn VenueClient>>) {
        let a = Arc::new(PaperVenueClient::new("a", 0.0004, 5.0));
        let b = Arc::new(PaperVenueClient::new("b", 0.0004, 5.0));
        let mut map: HashMap<String, Arc<dyn VenueClient>> = HashMap::new();
        map.insert("a".to_string(), a.clone());
        map.insert("b".to_string(), b.clone());
        (a, b, map)
    }

    // Scenario 1 (spec end-to-end #1): commission-aware gate rejects a spread
    // that looks attractive raw but is unprofitable net of both legs' taker fees.
    #[tokio::test]
    async fn commission_aware_gate_rejects_marginal_spread() {
        let balances = Arc::new(RwLock::new(HashMap::from([
            ("a".to_string(), 1000.0),
            ("b".to_string(), 1000.0),
        ])));
        let mgr = PositionManager::new(balances, config());
        let (_a, _b, map) = venues();

        let mut spreads = HashMap::new();
        // raw ~0.0999%, commission 0.4% => net ~ -0.3%
        spreads.insert(
            ("BTCUSDT".to_string(), "a".to_string(), "b".to_string()),
            spread(0.0999, -0.3001, 50000.0, 50050.0),
        );
        mgr.process_cycle(&spreads, &HashMap::new(), &map, 0).await;
        assert!(mgr.open_positions().is_empty());
    }

    // Scenario 2: spread clears threshold, both legs fill, position recorded.
    #[tokio::test]
    async fn opens_position_when_spread_clears_threshold() {
        let balances = Arc::new(RwLock::new(HashMap::from([
            ("a".to_string(), 1000.0),
            ("b".to_string(), 1000.0),
        ])));
        let mgr = PositionManager::new(balances, config());
        let (_a, _b, map) = venues();

        let mut spreads = HashMap::new();
        spreads.insert(
            ("BTCUSDT".to_string(), "a".to_string(), "b".to_string()),
            spread(0.501, 0.101, 49800.0, 50050.0),
        );

        mgr.process_cycle(&spreads, &HashMap::new(), &map, 0).await;
        assert_eq!(mgr.open_positions().len(), 1);
    }

    // Scenario 3: stale min_timestamp relative to open-side max age => no open.
    #[tokio::test]
    async fn skips_open_on_stale_data() {
        let mut cfg = config();
        cfg.open_max_data_age_ms = 400;
        let balances = Arc::new(RwLock::new(HashMap::from([
            ("a".to_string(), 1000.0),
            ("b".to_string(), 1000.0),
        ])));
        let mgr = PositionManager::new(balances, cfg);
        let (_a, _b, map) = venues();

        let mut spreads = HashMap::new();
        let mut s = spread(0.501, 0.101, 49800.0, 50050.0);
        s.min_timestamp_ms = 100;
        spreads.insert(("BTCUSDT".to_string(), "a".to_string(), "b".to_string()), s);

        // now_ms - min_timestamp_ms = 600 > 400
        mgr.process_cycle(&spreads, &HashMap::new(), &map, 700).await;
        assert!(mgr.open_positions().is_empty());
    }

    // Scenario 4: existing position closes once raw spread collapses past threshold.
    #[tokio::test]
    async fn closes_on_spread_collapse() {
        let balances = Arc::new(RwLock::new(HashMap::from([
            ("a".to_string(), 1000.0),
            ("b".to_string(), 1000.0),
        ])));
        let mut cfg = config();
        cfg.close_raw_threshold_pct = 0.02;
        let mgr = PositionManager::new(balances, cfg);
        let (_a, _b, map) = venues();

        mgr.positions.write().insert(
            "BTCUSDT".to_string(),
            Position {
                instrument: "BTCUSDT".to_string(),
                buy_venue: "a".to_string(),
                sell_venue: "b".to_string(),
                buy_price: 100.0,
                sell_price: 100.5,
                requested_usd: 100.0,
                leverage: 1.0,
                amount: 1.0,
                bought_contracts: 1.0,
                sold_contracts: 1.0,
                buy_order_id: "x".to_string(),
                sell_order_id: "y".to_string(),
                buy_trailing_stop_id: None,
                sell_trailing_stop_id: None,
                status: PositionStatus::Open,
                opened_at: Instant::now(),
                entry_net_spread_pct: 0.6,
            },
        );

        let mut spreads = HashMap::new();
        spreads.insert(
            ("BTCUSDT".to_string(), "a".to_string(), "b".to_string()),
            spread(0.01, -0.39, 100.0, 100.5),
        );

        mgr.process_cycle(&spreads, &HashMap::new(), &map, 0).await;
        assert!(mgr.open_positions().is_empty());
    }

    // Scenario 5: position held past close_position_after_seconds closes even
    // though the spread would otherwise justify holding.
    #[tokio::test]
    async fn closes_on_timeout_even_with_wide_spread() {
        let balances = Arc::new(RwLock::new(HashMap::from([
            ("a".to_string(), 1000.0),
            ("b".to_string(), 1000.0),
        ])));
        let mut cfg = config();
        cfg.close_position_after_seconds = 0;
        let mgr = PositionManager::new(balances, cfg);
        let (_a, _b, map) = venues();

        mgr.positions.write().insert(
            "BTCUSDT".to_string(),
            Position {
                instrument: "BTCUSDT".to_string(),
                buy_venue: "a".to_string(),
                sell_venue: "b".to_string(),
                buy_price: 100.0,
                sell_price: 100.5,
                requested_usd: 100.0,
                leverage: 1.0,
                amount: 1.0,
                bought_contracts: 1.0,
                sold_contracts: 1.0,
                buy_order_id: "x".to_string(),
                sell_order_id: "y".to_string(),
                buy_trailing_stop_id: None,
                sell_trailing_stop_id: None,
                status: PositionStatus::Open,
                // opened_at in the past relative to `now + 0s` threshold.
                opened_at: Instant::now() - Duration::from_secs(1),
                entry_net_spread_pct: 0.6,
            },
        );

        let mut spreads = HashMap::new();
        // wide spread, would NOT close on spread grounds alone
        spreads.insert(
            ("BTCUSDT".to_string(), "a".to_string(), "b".to_string()),
            spread(0.5, 0.1, 100.0, 100.5),
        );

        mgr.process_cycle(&spreads, &HashMap::new(), &map, 0).await;
        assert!(mgr.open_positions().is_empty());
    }

    // Scenario 6: open predicate passes on spread but fails on balance.
    #[tokio::test]
    async fn skips_open_on_insufficient_balance() {
        let balances = Arc::new(RwLock::new(HashMap::from([
            ("a".to_string(), 1.0),
            ("b".to_string(), 1.0),
        ])));
        let mgr = PositionManager::new(balances, config());
        let (_a, _b, map) = venues();

        let mut spreads = HashMap::new();
        spreads.insert(
            ("BTCUSDT".to_string(), "a".to_string(), "b".to_string()),
            spread(0.501, 0.101, 100.0, 100.5),
        );

        mgr.process_cycle(&spreads, &HashMap::new(), &map, 0).await;
        assert!(mgr.open_positions().is_empty());
        // spread was still emitted to the manager; the map is simply unchanged.
        assert!(spreads.contains_key(&("BTCUSDT".to_string(), "a".to_string(), "b".to_string())));
    }

    #[tokio::test]
    async fn closes_before_reopening_in_same_cycle() {
        let balances = Arc::new(RwLock::new(HashMap::from([
            ("a".to_string(), 1000.0),
            ("b".to_string(), 1000.0),
        ])));
        let mgr = PositionManager::new(balances, config());
        let (_a, _b, map) = venues();

        mgr.positions.write().insert(
            "BTCUSDT".to_string(),
            Position {
                instrument: "BTCUSDT".to_string(),
                buy_venue: "a".to_string(),
                sell_venue: "b".to_string(),
                buy_price: 100.0,
                sell_price: 100.5,
                requested_usd: 100.0,
                leverage: 1.0,
                amount: 1.0,
                bought_contracts: 1.0,
                sold_contracts: 1.0,
                buy_order_id: "x".to_string(),
                sell_order_id: "y".to_string(),
                buy_trailing_stop_id: None,
                sell_trailing_stop_id: None,
                status: PositionStatus::Open,
                opened_at: Instant::now(),
                entry_net_spread_pct: 0.6,
            },
        );

        let mut spreads = HashMap::new();
        // spread collapsed below close threshold (0.0) for the same pair.
        spreads.insert(
            ("BTCUSDT".to_string(), "a".to_string(), "b".to_string()),
            spread(-0.1, -0.1, 100.0, 100.5),
        );

        mgr.process_cycle(&spreads, &HashMap::new(), &map, 0).await;
        assert!(mgr.open_positions().is_empty());
    }

    #[test]
    fn order_amount_takes_coarser_precision_of_both_legs() {
        let a = PaperVenueClient::new("a", 0.0004, 5.0);
        let b = PaperVenueClient::new("b", 0.0004, 5.0);
        let amount = compute_order_amount(&a, &b, "BTCUSDT", 100.0, 100.0, 100.0);
        assert!((amount - 1.0).abs() < 1e-9);
    }
}
