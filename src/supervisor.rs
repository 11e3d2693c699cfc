// =============================================================================
// Supervisor — owns every long-running task and tears them down together
// =============================================================================
//
// Mirrors `BaseModule.work()`'s task-group pattern: every component runs as
// its own task under one `JoinSet`, and a ctrl-c (or any task's unexpected
// exit) drains the set and closes every venue client before returning.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::venue::VenueClient;

pub struct Supervisor {
    tasks: JoinSet<()>,
    venues: HashMap<String, Arc<dyn VenueClient>>,
}

impl Supervisor {
    pub fn new(venues: HashMap<String, Arc<dyn VenueClient>>) -> Self {
        Self {
            tasks: JoinSet::new(),
            venues,
        }
    }

    /// Register a named background task. Panics inside `future` are caught
    /// by `JoinSet` and surfaced as a join error, not propagated.
    pub fn spawn(&mut self, name: &'static str, future: impl std::future::Future<Output = ()> + Send + 'static) {
        self.tasks.spawn(async move {
            info!(task = name, "task started");
            future.await;
            warn!(task = name, "task exited");
        });
    }

    /// Run until either a ctrl-c signal arrives or any supervised task exits
    /// on its own (which should not happen in normal operation), then close
    /// every venue client.
    pub async fn run_until_shutdown(mut self) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
            }
            _ = self.tasks.join_next() => {
                error!("a supervised task exited unexpectedly, shutting down");
            }
        }

        self.tasks.shutdown().await;

        for (id, client) in &self.venues {
            if let Err(e) = client.close().await {
                warn!(venue = %id, error = %e, "error closing venue client");
            }
        }
    }
}
