// =============================================================================
// Reconciliation — compare internal positions against each venue
// =============================================================================
//
// SAFETY POLICY: this module only ever logs drift. It never cancels orders,
// closes positions, or otherwise touches exchange state — a human operator
// resolves discrepancies.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::position::manager::PositionManager;
use crate::venue::VenueClient;

/// Summary of a single reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub positions_matched: u32,
    pub positions_drifted: u32,
    pub orphan_contracts: u32,
    pub timestamp: String,
}

/// Compare the manager's open positions against what each venue reports for
/// the same instruments, and log any mismatch. Never corrects anything.
pub async fn reconcile_once(
    position_manager: &PositionManager,
    venues: &HashMap<String, Arc<dyn VenueClient>>,
) -> ReconcileResult {
    let now = Utc::now().to_rfc3339();
    info!(timestamp = %now, "reconciliation cycle started");

    let open_positions = position_manager.open_positions();
    let instruments: Vec<String> = open_positions.iter().map(|p| p.instrument.clone()).collect();

    let mut venue_positions: HashMap<String, HashMap<String, f64>> = HashMap::new();
    for (venue_id, client) in venues {
        match client.fetch_positions(&instruments).await {
            Ok(positions) => {
                venue_positions.insert(
                    venue_id.clone(),
                    positions.into_iter().map(|(k, v)| (k, v.contracts)).collect(),
                );
            }
            Err(e) => {
                warn!(venue = %venue_id, error = %e, "reconcile: failed to fetch positions");
            }
        }
    }

    let mut matched = 0u32;
    let mut drifted = 0u32;

    for position in &open_positions {
        let buy_reported = venue_positions
            .get(&position.buy_venue)
            .and_then(|m| m.get(&position.instrument))
            .copied();
        let sell_reported = venue_positions
            .get(&position.sell_venue)
            .and_then(|m| m.get(&position.instrument))
            .copied();

        let buy_ok = buy_reported.is_some_and(|c| (c - position.amount).abs() < 1e-6);
        let sell_ok = sell_reported.is_some_and(|c| (c + position.amount).abs() < 1e-6);

        if buy_ok && sell_ok {
            matched += 1;
            debug!(instrument = %position.instrument, "position matches venue state");
        } else {
            drifted += 1;
            warn!(
                instrument = %position.instrument,
                buy_venue = %position.buy_venue,
                sell_venue = %position.sell_venue,
                buy_reported = ?buy_reported,
                sell_reported = ?sell_reported,
                expected_amount = position.amount,
                "position drift detected — no automatic correction applied"
            );
        }
    }

    // Contracts a venue reports that the manager has no tracked position for.
    let tracked_instruments: HashSet<&str> = open_positions.iter().map(|p| p.instrument.as_str()).collect();
    let mut orphan_count = 0u32;
    for (venue_id, positions) in &venue_positions {
        for (instrument, contracts) in positions {
            if contracts.abs() > 1e-9 && !tracked_instruments.contains(instrument.as_str()) {
                orphan_count += 1;
                warn!(venue = %venue_id, instrument = %instrument, contracts, "orphan contracts with no tracked position");
            }
        }
    }

    let result = ReconcileResult {
        positions_matched: matched,
        positions_drifted: drifted,
        orphan_contracts: orphan_count,
        timestamp: now,
    };

    info!(
        positions_matched = matched,
        positions_drifted = drifted,
        orphan_contracts = orphan_count,
        "reconciliation cycle completed"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::manager::PositionManagerConfig;
    use crate::venue::paper::PaperVenueClient;
    use parking_lot::RwLock;

    #[tokio::test]
    async fn reports_clean_when_no_positions_are_tracked() {
        let mgr = PositionManager::new(
            Arc::new(RwLock::new(HashMap::new())),
            PositionManagerConfig {
                open_threshold_pct: 0.4,
                close_raw_threshold_pct: 0.0,
                close_position_after_seconds: 300,
                consider_funding: false,
                usd_amount: 100.0,
                leverage: 1.0,
                size_buffer_factor: 1.0,
                order_type: crate::venue::OrderType::Market,
                trailing_stop_enabled: false,
                trailing_stop_callback_pct: 0.5,
                open_max_data_age_ms: 100_000,
                close_max_data_age_ms: 100_000,
            },
        );
        let mut venues: HashMap<String, Arc<dyn VenueClient>> = HashMap::new();
        venues.insert(
            "a".to_string(),
            Arc::new(PaperVenueClient::new("a", 0.0004, 5.0)),
        );
        let result = reconcile_once(&mgr, &venues).await;
        assert_eq!(result.positions_matched, 0);
        assert_eq!(result.positions_drifted, 0);
    }
}
