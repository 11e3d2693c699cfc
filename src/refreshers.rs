// =============================================================================
// Periodic whole-map-replacement refreshers for balances and funding rates
// =============================================================================
//
// Both loops follow the same shape as the original's `fetch_balance_data`/
// `fetch_funding_rates`: fetch from every venue concurrently, and replace the
// shared map wholesale rather than merging — a venue that errors this tick
// just keeps last cycle's values until the next attempt succeeds.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::RwLock;
use tracing::{error, warn};

use crate::venue::VenueClient;

pub async fn run_balance_refresher(
    venues: HashMap<String, Arc<dyn VenueClient>>,
    balances: Arc<RwLock<HashMap<String, f64>>>,
    base_currency: String,
    interval_seconds: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
    loop {
        ticker.tick().await;
        let fetches = venues.iter().map(|(id, client)| {
            let id = id.clone();
            let client = client.clone();
            async move { (id, client.fetch_balance().await) }
        });
        let results = join_all(fetches).await;

        let mut updated = HashMap::new();
        for (venue_id, result) in results {
            match result {
                Ok(venue_balances) => {
                    // Only the base-currency asset's free balance matters —
                    // the manager reserves and spends in that currency alone.
                    let free = venue_balances.get(base_currency.as_str()).copied().unwrap_or(0.0);
                    updated.insert(venue_id, free);
                }
                Err(e) => {
                    warn!(venue = %venue_id, error = %e, "balance fetch failed, keeping last value");
                }
            }
        }

        let mut guard = balances.write();
        for (venue_id, total) in updated {
            guard.insert(venue_id, total);
        }
    }
}

pub async fn run_funding_refresher(
    venues: HashMap<String, Arc<dyn VenueClient>>,
    funding_rates: Arc<RwLock<HashMap<String, HashMap<String, f64>>>>,
    interval_seconds: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
    loop {
        ticker.tick().await;
        let fetches = venues.iter().map(|(id, client)| {
            let id = id.clone();
            let client = client.clone();
            async move { (id, client.fetch_funding_rates().await) }
        });
        let results = join_all(fetches).await;

        let mut guard = funding_rates.write();
        for (venue_id, result) in results {
            match result {
                Ok(rates) => {
                    guard.insert(venue_id, rates);
                }
                Err(e) => {
                    error!(venue = %venue_id, error = %e, "funding rate fetch failed, keeping last value");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::paper::PaperVenueClient;

    #[tokio::test]
    async fn balance_refresher_keeps_only_base_currency_free_balance() {
        let a = Arc::new(PaperVenueClient::new("a", 0.0004, 5.0));
        a.set_balance("USDT", 500.0);
        a.set_balance("USDC", 100.0);
        let mut venues: HashMap<String, Arc<dyn VenueClient>> = HashMap::new();
        venues.insert("a".to_string(), a.clone());

        let balances = Arc::new(RwLock::new(HashMap::new()));
        let base_currency = "USDT".to_string();
        let fetches = venues.iter().map(|(id, client)| {
            let id = id.clone();
            let client = client.clone();
            async move { (id, client.fetch_balance().await) }
        });
        let results = join_all(fetches).await;
        let mut updated = HashMap::new();
        for (venue_id, result) in results {
            let free = result.unwrap().get(base_currency.as_str()).copied().unwrap_or(0.0);
            updated.insert(venue_id, free);
        }
        balances.write().extend(updated);

        assert_eq!(*balances.read().get("a").unwrap(), 500.0);
    }
}
