//! Scheduled sweep of expired refresh token registrations.

use crate::jwt::unix_now;
use crate::registry::RefreshRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once. Returns the number of entries removed.
pub async fn run_cleanup(registry: &dyn RefreshRegistry) -> u64 {
    let now = match unix_now() {
        Ok(now) => now,
        Err(e) => {
            error!("Skipping cleanup: {}", e);
            return 0;
        }
    };

    match registry.sweep_expired(now).await {
        Ok(count) => {
            if count > 0 {
                info!("Cleaned up {} expired tokens", count);
            }
            count
        }
        Err(e) => {
            error!("Failed to clean up expired tokens: {}", e);
            0
        }
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(registry: Arc<dyn RefreshRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(registry.as_ref()).await;
        }
    })
}
