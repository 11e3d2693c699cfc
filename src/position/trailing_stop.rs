// =============================================================================
// Trailing-stop secondary protection — optional, off by default
// =============================================================================
//
// Venues encode a trailing stop differently: Binance wants a percentage
// `callbackRate`, Bybit wants an absolute quote-currency distance computed
// from the live mark price. `build_order_params` picks the right encoding
// per venue id; everything else about the order (reduce-only, side,
// quantity) is identical to a regular close.
// =============================================================================

use crate::venue::OrderParams;

/// Build the trailing-stop order parameters for `venue_id`. `callback_pct` is
/// the configured trailing distance as a percentage (e.g. `0.5` for 0.5%);
/// `reference_price` is the current mark/ticker price, needed to convert that
/// percentage into Bybit's absolute-distance encoding.
pub fn build_order_params(venue_id: &str, callback_pct: f64, reference_price: f64) -> OrderParams {
    let mut params = OrderParams {
        reduce_only: true,
        ..Default::default()
    };
    match venue_id {
        "binance" => {
            params.callback_rate_pct = Some(callback_pct);
        }
        "bybit" => {
            params.trailing_amount = Some(reference_price * callback_pct / 100.0);
        }
        _ => {
            // No native trailing-stop support: caller falls back to a plain
            // reduce-only market close at the close threshold instead.
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_uses_percentage_callback() {
        let p = build_order_params("binance", 0.5, 30000.0);
        assert_eq!(p.callback_rate_pct, Some(0.5));
        assert_eq!(p.trailing_amount, None);
    }

    #[test]
    fn bybit_uses_absolute_distance_from_reference_price() {
        let p = build_order_params("bybit", 0.5, 30000.0);
        assert_eq!(p.trailing_amount, Some(150.0));
        assert_eq!(p.callback_rate_pct, None);
    }

    #[test]
    fn unknown_venue_gets_no_trailing_params() {
        let p = build_order_params("okx", 0.5, 30000.0);
        assert_eq!(p.callback_rate_pct, None);
        assert_eq!(p.trailing_amount, None);
    }
}
