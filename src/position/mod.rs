// =============================================================================
// Position lifecycle types shared between the manager and trailing-stop logic
// =============================================================================

pub mod manager;
pub mod trailing_stop;

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    /// Orders submitted, acks not yet confirmed filled.
    Pending,
    Open,
    /// Close orders submitted; removed from the map once confirmed.
    Closing,
}

/// One open cash-and-carry pair: long on `buy_venue`, short on `sell_venue`,
/// same instrument, same contract amount on both legs.
///
/// Never (de)serialized — the engine carries no persisted state across
/// restarts; open positions live only in the venues' own records.
#[derive(Debug, Clone)]
pub struct Position {
    pub instrument: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub requested_usd: f64,
    pub leverage: f64,
    pub amount: f64,
    pub bought_contracts: f64,
    pub sold_contracts: f64,
    pub buy_order_id: String,
    pub sell_order_id: String,
    pub buy_trailing_stop_id: Option<String>,
    pub sell_trailing_stop_id: Option<String>,
    pub status: PositionStatus,
    pub opened_at: Instant,
    pub entry_net_spread_pct: f64,
}

/// Decide whether a spread justifies opening a new position.
///
/// `funding_adj_pct` is `(buy_funding_rate - sell_funding_rate) * 100`: paying
/// funding on the long leg while collecting it on the short leg erodes the
/// carry, so it's subtracted from the raw net spread before comparing against
/// the threshold.
pub fn have_to_open_position(
    net_spread_pct: f64,
    funding_adj_pct: f64,
    open_threshold_pct: f64,
) -> bool {
    let effective_net_spread_pct = net_spread_pct - funding_adj_pct;
    effective_net_spread_pct >= open_threshold_pct
}

/// Decide whether an existing position should close this cycle.
///
/// Two independent triggers, either of which is sufficient: the position has
/// been held past `close_position_after_seconds` (`time_based`, computed by
/// the caller against the position's monotonic `opened_at`), or the *raw*
/// spread (not net — the position is already paying commission, closing
/// doesn't add more) has compressed past `close_raw_threshold_pct` once
/// adjusted for funding.
pub fn have_to_close_position(
    raw_spread_pct: f64,
    funding_adj_pct: f64,
    close_raw_threshold_pct: f64,
    time_based: bool,
) -> bool {
    let effective_raw_spread_pct = raw_spread_pct - funding_adj_pct;
    let spread_based = effective_raw_spread_pct <= close_raw_threshold_pct;
    time_based || spread_based
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_when_effective_spread_clears_threshold() {
        assert!(have_to_open_position(0.6, 0.0, 0.4));
        assert!(have_to_open_position(0.4, 0.0, 0.4));
        assert!(!have_to_open_position(0.3, 0.0, 0.4));
    }

    #[test]
    fn funding_adjustment_reduces_effective_spread() {
        // raw spread clears 0.4 but funding erodes it below threshold.
        assert!(!have_to_open_position(0.5, 0.2, 0.4));
    }

    #[test]
    fn closes_when_raw_spread_falls_below_threshold() {
        assert!(have_to_close_position(-0.1, 0.0, 0.0, false));
        assert!(!have_to_close_position(0.1, 0.0, 0.0, false));
    }

    #[test]
    fn closes_when_time_based_even_if_spread_still_wide() {
        assert!(have_to_close_position(0.5, 0.0, 0.0, true));
    }

    #[test]
    fn funding_adjustment_can_trigger_close() {
        // raw spread alone wouldn't close, but funding erodes it past the threshold.
        assert!(have_to_close_position(0.05, 0.1, 0.0, false));
    }
}
