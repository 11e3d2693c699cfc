// =============================================================================
// SpreadAnalyzer — pure O(E^2) pairwise spread computation
// =============================================================================
//
// Mirrors `analyze_arbitrage`/`get_cached_commission` field for field: for
// every ordered pair of venues present in a `FeedDelta`, and every instrument
// both sides currently quote, compute raw spread, cached commission, and net
// spread. Stateless beyond the commission cache it's handed.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::errors::EngineError;
use crate::feed::FeedDelta;
use crate::venue::MarketInfo;

/// Commission is cached per (buy_venue, sell_venue, instrument) for the life
/// of the session — taker fees don't change intraday.
#[derive(Default)]
pub struct CommissionCache {
    inner: RwLock<HashMap<(String, String, String), f64>>,
}

impl CommissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached commission, computing and inserting it if absent.
    /// `market_info` maps (venue, instrument) -> taker fee metadata.
    pub fn get_or_insert(
        &self,
        buy_venue: &str,
        sell_venue: &str,
        instrument: &str,
        market_info: impl Fn(&str, &str) -> Option<MarketInfo>,
    ) -> Option<f64> {
        let key = (
            buy_venue.to_string(),
            sell_venue.to_string(),
            instrument.to_string(),
        );
        if let Some(v) = self.inner.read().get(&key) {
            return Some(*v);
        }

        let buy_fee = market_info(buy_venue, instrument)?.taker_fee;
        let sell_fee = market_info(sell_venue, instrument)?.taker_fee;
        // Open + close on both legs: four taker fills total.
        let commission = (buy_fee + sell_fee + buy_fee + sell_fee) * 100.0;
        self.inner.write().insert(key, commission);
        Some(commission)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SpreadData {
    pub buy_price: f64,
    pub sell_price: f64,
    pub raw_spread_pct: f64,
    pub commission_pct: f64,
    pub net_spread_pct: f64,
    pub min_timestamp_ms: i64,
}

/// Key identifying a spread: (instrument, buy_venue, sell_venue).
pub type SpreadKey = (String, String, String);

pub struct SpreadAnalyzer;

impl SpreadAnalyzer {
    /// Compute one `SpreadData` per ordered venue pair per common instrument
    /// present in `delta`, skipping pairs whose quotes are older than
    /// `max_age_ms`.
    pub fn analyze(
        delta: &FeedDelta,
        commission_cache: &CommissionCache,
        market_info: impl Fn(&str, &str) -> Option<MarketInfo> + Copy,
        now_ms: i64,
        max_age_ms: i64,
    ) -> HashMap<SpreadKey, SpreadData> {
        let mut out = HashMap::new();
        let venues: Vec<&String> = delta.keys().collect();

        for &buy_venue in &venues {
            for &sell_venue in &venues {
                if buy_venue == sell_venue {
                    continue;
                }
                let buy_book = &delta[buy_venue];
                let sell_book = &delta[sell_venue];

                for (instrument, buy_quote) in buy_book {
                    let sell_quote = match sell_book.get(instrument) {
                        Some(q) => q,
                        None => continue,
                    };

                    let min_timestamp_ms = buy_quote.timestamp_ms.min(sell_quote.timestamp_ms);
                    let age_ms = now_ms - min_timestamp_ms;
                    if age_ms > max_age_ms {
                        let err = EngineError::DataStale { age_ms, max_age_ms };
                        debug!(instrument = %instrument, buy_venue = %buy_venue, sell_venue = %sell_venue, error = %err, "skipping stale spread");
                        continue;
                    }

                    let buy_price = buy_quote.vwap_ask;
                    let sell_price = sell_quote.vwap_bid;
                    let mid = (buy_price + sell_price) / 2.0;
                    if mid <= 0.0 {
                        continue;
                    }
                    let raw_spread_pct = (sell_price - buy_price) / mid * 100.0;

                    let commission_pct = match commission_cache.get_or_insert(
                        buy_venue,
                        sell_venue,
                        instrument,
                        market_info,
                    ) {
                        Some(c) => c,
                        None => continue,
                    };
                    let net_spread_pct = raw_spread_pct - commission_pct;

                    out.insert(
                        (instrument.clone(), buy_venue.to_string(), sell_venue.to_string()),
                        SpreadData {
                            buy_price,
                            sell_price,
                            raw_spread_pct,
                            commission_pct,
                            net_spread_pct,
                            min_timestamp_ms,
                        },
                    );
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Quote;

    fn mi(_venue: &str, _instrument: &str) -> Option<MarketInfo> {
        Some(MarketInfo {
            taker_fee: 0.0004,
            min_notional: 5.0,
        })
    }

    fn make_delta() -> FeedDelta {
        let mut delta = FeedDelta::new();
        delta.insert(
            "binance".to_string(),
            HashMap::from([(
                "BTCUSDT".to_string(),
                Quote {
                    vwap_bid: 100.0,
                    vwap_ask: 100.1,
                    timestamp_ms: 1000,
                },
            )]),
        );
        delta.insert(
            "bybit".to_string(),
            HashMap::from([(
                "BTCUSDT".to_string(),
                Quote {
                    vwap_bid: 101.0,
                    vwap_ask: 101.1,
                    timestamp_ms: 1000,
                },
            )]),
        );
        delta
    }

    #[test]
    fn computes_spread_for_both_directions() {
        let delta = make_delta();
        let cache = CommissionCache::new();
        let spreads = SpreadAnalyzer::analyze(&delta, &cache, mi, 1000, 500);
        assert!(spreads.contains_key(&("BTCUSDT".to_string(), "binance".to_string(), "bybit".to_string())));
        assert!(spreads.contains_key(&("BTCUSDT".to_string(), "bybit".to_string(), "binance".to_string())));
    }

    #[test]
    fn commission_is_four_taker_fees_as_percent() {
        let delta = make_delta();
        let cache = CommissionCache::new();
        let spreads = SpreadAnalyzer::analyze(&delta, &cache, mi, 1000, 500);
        let s = spreads[&("BTCUSDT".to_string(), "binance".to_string(), "bybit".to_string())];
        assert!((s.commission_pct - 0.16).abs() < 1e-9);
    }

    #[test]
    fn commission_cache_is_idempotent() {
        let cache = CommissionCache::new();
        let a = cache
            .get_or_insert("binance", "bybit", "BTCUSDT", mi)
            .unwrap();
        let b = cache
            .get_or_insert("binance", "bybit", "BTCUSDT", |_, _| None)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn stale_quotes_are_skipped() {
        let delta = make_delta();
        let cache = CommissionCache::new();
        let spreads = SpreadAnalyzer::analyze(&delta, &cache, mi, 10_000, 500);
        assert!(spreads.is_empty());
    }
}
