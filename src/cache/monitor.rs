use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::LocalStore;

/// Starts the periodic eviction pass. Abort the handle to stop it.
pub fn spawn_eviction_monitor(store: Arc<LocalStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        tracing::info!("Eviction monitor started, period {:?}", period);

        loop {
            interval.tick().await;

            // Eviction takes the cache locks; keep it off the async workers.
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.run_monitor()).await {
                Ok(evicted) if evicted > 0 => {
                    tracing::debug!("Eviction pass dropped {} entries", evicted)
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Eviction pass failed: {}", e),
            }
        }
    })
}
