// =============================================================================
// FeedIngestor — one task per (venue, instrument), feeds the aggregator
// =============================================================================
//
// `VenueClient::watch_order_book` owns the actual subscription and its own
// staleness watchdog (only the client knows the delivery cadence); this loop
// just retries with a fixed backoff whenever that call returns, mirroring
// the original data feed's distinction between the watchdog-triggered
// immediate retry and the network-error-triggered sleep — both collapse to
// the same backoff here since the client already decided to give up.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::venue::{BookSnapshot, VenueClient};

pub async fn run(
    client: Arc<dyn VenueClient>,
    instrument: String,
    depth: u32,
    retry_seconds: u64,
    tx: mpsc::Sender<BookSnapshot>,
) {
    info!(venue = client.id(), instrument = %instrument, "starting order book watch");
    loop {
        match client
            .watch_order_book(&instrument, depth, tx.clone())
            .await
        {
            Ok(()) => {
                warn!(venue = client.id(), instrument = %instrument, "order book stream ended, reconnecting");
            }
            Err(e) => {
                error!(venue = client.id(), instrument = %instrument, error = %e, "order book stream error, reconnecting");
            }
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
    }
}
