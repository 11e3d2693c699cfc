// =============================================================================
// Feed types shared between the aggregator, analyzer and position manager
// =============================================================================

pub mod aggregator;
pub mod ingestor;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A VWAP-derived quote for one venue/instrument pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub vwap_bid: f64,
    pub vwap_ask: f64,
    pub timestamp_ms: i64,
}

/// Full known state: venue -> instrument -> quote. Owned exclusively by
/// `FeedAggregator`; never shared behind a lock.
pub type FeedState = HashMap<String, HashMap<String, Quote>>;

/// Restriction of `FeedState` to instruments that changed in the most recent
/// snapshot. For each changed instrument this carries every venue's current
/// quote, not just the venue that triggered the change — the analyzer needs
/// both sides of a pair to compute a spread.
pub type FeedDelta = HashMap<String, HashMap<String, Quote>>;
