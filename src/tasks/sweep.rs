//! Retention Sweep Task
//!
//! Background task that periodically deletes records whose age exceeds
//! their family's retention window.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::repo::LocalRepo;

/// Spawns a background task that runs [`LocalRepo::clean_expired`] every
/// `sweep_interval_secs`.
///
/// A failed sweep is logged and the loop carries on with the next interval.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let repo = Arc::new(LocalRepo::from_config(&config).await?);
/// let sweep_handle = spawn_sweep_task(repo.clone(), 7200);
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(repo: Arc<LocalRepo>, sweep_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(sweep_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting retention sweep task with interval of {} seconds",
            sweep_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            match repo.clean_expired().await {
                Ok(deleted) => {
                    let removed: u64 = deleted.values().sum();
                    if removed > 0 {
                        info!("Retention sweep: removed {} records {:?}", removed, deleted);
                    } else {
                        debug!("Retention sweep: nothing to remove");
                    }
                }
                Err(err) => warn!("Retention sweep failed: {}", err),
            }
        }
    })
}
