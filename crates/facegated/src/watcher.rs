//! Periodic hot reload of the identity store.

use facegate_core::IdentityStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Poll the persisted snapshot every `interval`; failures keep the current mapping.
pub fn spawn_reload_watcher(store: Arc<IdentityStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.reload()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "identity reload failed, keeping current mapping"),
                Err(e) => tracing::error!(error = %e, "reload task panicked"),
            }
        }
    })
}
