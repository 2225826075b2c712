//! Background task that periodically persists the metadata store.

use super::MetadataStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Spawn a background task that flushes `store` every `interval` while it is dirty.
///
/// The loop exits once `cancel_token` fires. It never performs a final flush;
/// that belongs to the shutdown sequence, which runs after every task has
/// stopped writing records.
pub fn spawn_flush_loop(
    store: Arc<MetadataStore>,
    interval: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !store.is_dirty() {
                        continue;
                    }
                    if let Err(e) = store.flush().await {
                        tracing::error!(
                            path = %store.path().display(),
                            error = %e,
                            "periodic metadata flush failed"
                        );
                    }
                }
                _ = cancel_token.cancelled() => {
                    tracing::debug!("metadata flush loop stopped");
                    break;
                }
            }
        }
    })
}
