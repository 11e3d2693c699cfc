// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Transient network failures and cancellation flow through `anyhow::Error`
// and are never wrapped here. This enum exists only for the handful of
// conditions a caller needs to branch on.
// =============================================================================

use std::fmt;

/// Classifiable engine errors that callers branch on.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// A quote or spread is older than the caller's max-age threshold.
    DataStale { age_ms: i64, max_age_ms: i64 },
    /// Order book depth was insufficient to fill the target notional.
    InsufficientLiquidity { instrument: String, venue: String },
    /// An order would violate an exchange invariant (min notional, precision).
    InvalidOrder { reason: String },
    /// A venue rejected an order or configuration request outright.
    VenueRejected { venue: String, reason: String },
    /// A required configuration value is missing or out of range at startup.
    ConfigInvariant { reason: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataStale { age_ms, max_age_ms } => {
                write!(f, "data stale: age {age_ms}ms exceeds max {max_age_ms}ms")
            }
            Self::InsufficientLiquidity { instrument, venue } => {
                write!(f, "insufficient liquidity for {instrument} on {venue}")
            }
            Self::InvalidOrder { reason } => write!(f, "invalid order: {reason}"),
            Self::VenueRejected { venue, reason } => {
                write!(f, "{venue} rejected request: {reason}")
            }
            Self::ConfigInvariant { reason } => write!(f, "config invariant violated: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = EngineError::InsufficientLiquidity {
            instrument: "BTCUSDT".into(),
            venue: "binance".into(),
        };
        assert!(e.to_string().contains("BTCUSDT"));
        assert!(e.to_string().contains("binance"));
    }
}
