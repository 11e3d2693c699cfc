// =============================================================================
// Periodic status reporting
// =============================================================================
//
// The original's status report drove a console table and a Telegram ping;
// the dashboard and notification surfaces are out of scope here, so this
// collapses to a single structured log line per interval.
// =============================================================================

use std::time::Duration;

use tracing::info;

use crate::position::manager::PositionManager;

pub async fn run(position_manager: &PositionManager, interval_seconds: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
    loop {
        ticker.tick().await;
        let positions = position_manager.open_positions();
        let avg_entry_spread_pct = if positions.is_empty() {
            0.0
        } else {
            positions.iter().map(|p| p.entry_net_spread_pct).sum::<f64>() / positions.len() as f64
        };

        info!(
            open_positions = positions.len(),
            avg_entry_spread_pct,
            "status report"
        );
        for position in &positions {
            info!(
                instrument = %position.instrument,
                buy_venue = %position.buy_venue,
                sell_venue = %position.sell_venue,
                amount = position.amount,
                entry_net_spread_pct = position.entry_net_spread_pct,
                status = ?position.status,
                "position status"
            );
        }
    }
}
