// =============================================================================
// FeedAggregator — VWAP derivation and change detection
// =============================================================================
//
// Consumes raw `BookSnapshot`s from every ingestor task over a single bounded
// channel, walks each side of the book to the target notional (the same
// walk-and-accumulate algorithm as the original data feed's `get_price`,
// including fractional fill of the final level), and emits a `FeedDelta`
// whenever a quote actually changes.
// =============================================================================

use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::EngineError;
use crate::venue::{BookSnapshot, Level};

use super::{FeedDelta, FeedState, Quote};

pub struct FeedAggregator {
    state: FeedState,
    target_notional: f64,
}

impl FeedAggregator {
    pub fn new(target_notional: f64) -> Self {
        Self {
            state: FeedState::new(),
            target_notional,
        }
    }

    /// Drain `rx` and push a `FeedDelta` to `tx` for every snapshot that
    /// changes at least one quote. Returns when `rx` closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<BookSnapshot>, tx: mpsc::Sender<FeedDelta>) {
        while let Some(snapshot) = rx.recv().await {
            if let Some(delta) = self.ingest(snapshot) {
                if tx.send(delta).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Process one snapshot, updating internal state and returning a delta
    /// if the instrument's quote actually changed on any venue.
    fn ingest(&mut self, snapshot: BookSnapshot) -> Option<FeedDelta> {
        if snapshot.bids.is_empty() || snapshot.asks.is_empty() {
            return None;
        }

        let bid = match vwap(&snapshot.bids, self.target_notional) {
            Some(v) => v,
            None => {
                let err = EngineError::InsufficientLiquidity {
                    instrument: snapshot.instrument.clone(),
                    venue: snapshot.venue.clone(),
                };
                debug!(error = %err, "dropping snapshot: insufficient bid depth");
                return None;
            }
        };
        let ask = match vwap(&snapshot.asks, self.target_notional) {
            Some(v) => v,
            None => {
                let err = EngineError::InsufficientLiquidity {
                    instrument: snapshot.instrument.clone(),
                    venue: snapshot.venue.clone(),
                };
                debug!(error = %err, "dropping snapshot: insufficient ask depth");
                return None;
            }
        };

        let quote = Quote {
            vwap_bid: bid,
            vwap_ask: ask,
            timestamp_ms: snapshot.timestamp_ms,
        };

        let venue_book = self.state.entry(snapshot.venue.clone()).or_default();
        let changed = match venue_book.get(&snapshot.instrument) {
            Some(existing) => existing.vwap_bid != quote.vwap_bid || existing.vwap_ask != quote.vwap_ask,
            None => true,
        };
        venue_book.insert(snapshot.instrument.clone(), quote);

        if !changed {
            return None;
        }

        let mut delta = FeedDelta::new();
        for (venue, instruments) in &self.state {
            if let Some(q) = instruments.get(&snapshot.instrument) {
                delta
                    .entry(venue.clone())
                    .or_insert_with(std::collections::HashMap::new)
                    .insert(snapshot.instrument.clone(), *q);
            }
        }
        Some(delta)
    }
}

/// Walk price levels toward `target_notional`, returning the volume-weighted
/// average execution price, or `None` if the book is too shallow.
fn vwap(levels: &[Level], target_notional: f64) -> Option<f64> {
    let mut notional_sum = 0.0;
    let mut volume_sum = 0.0;

    for &(price, volume) in levels {
        if price <= 0.0 || volume <= 0.0 {
            continue;
        }
        let notional = price * volume;
        if notional_sum + notional >= target_notional {
            let remaining_notional = target_notional - notional_sum;
            let remaining_volume = remaining_notional / price;
            notional_sum += remaining_notional;
            volume_sum += remaining_volume;
            return Some(notional_sum / volume_sum);
        }
        notional_sum += notional;
        volume_sum += volume;
    }

    debug!(target_notional, "order book depth insufficient for target notional");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(venue: &str, instrument: &str, bids: Vec<Level>, asks: Vec<Level>, ts: i64) -> BookSnapshot {
        BookSnapshot {
            venue: venue.to_string(),
            instrument: instrument.to_string(),
            bids,
            asks,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn vwap_walks_levels_with_fractional_final_fill() {
        // target 1500, levels: (100, 10) -> 1000 notional, then (101, 10):
        // need 500 more notional => 500/101 volume at that level.
        let levels = vec![(100.0, 10.0), (101.0, 10.0)];
        let price = vwap(&levels, 1500.0).unwrap();
        let expected_volume = 10.0 + 500.0 / 101.0;
        let expected = 1500.0 / expected_volume;
        assert!((price - expected).abs() < 1e-9);
    }

    #[test]
    fn vwap_rejects_insufficient_depth() {
        let levels = vec![(100.0, 1.0)];
        assert!(vwap(&levels, 1000.0).is_none());
    }

    #[test]
    fn ingest_emits_delta_only_on_change() {
        let mut agg = FeedAggregator::new(100.0);
        let snap = snapshot(
            "binance",
            "BTCUSDT",
            vec![(100.0, 5.0)],
            vec![(101.0, 5.0)],
            1,
        );
        let delta = agg.ingest(snap.clone());
        assert!(delta.is_some());

        // identical quote -> no delta
        let delta2 = agg.ingest(snap);
        assert!(delta2.is_none());
    }

    #[test]
    fn delta_includes_all_venues_for_changed_instrument() {
        let mut agg = FeedAggregator::new(100.0);
        agg.ingest(snapshot("binance", "BTCUSDT", vec![(100.0, 5.0)], vec![(101.0, 5.0)], 1));
        let delta = agg
            .ingest(snapshot("bybit", "BTCUSDT", vec![(99.0, 5.0)], vec![(100.0, 5.0)], 2))
            .unwrap();
        assert_eq!(delta.len(), 2);
        assert!(delta.contains_key("binance"));
        assert!(delta.contains_key("bybit"));
    }
}
