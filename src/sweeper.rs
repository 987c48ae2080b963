use crate::registry::DownloadRegistry;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Deletes every regular file directly inside `data_dir`.
///
/// Runs before the server accepts requests, when the registry is necessarily empty,
/// so anything on disk belongs to a previous process. Returns the number deleted.
pub fn purge_data_dir(data_dir: &Path) -> usize {
    tracing::info!("Running startup cleanup in {}", data_dir.display());
    let mut deleted = 0;

    for entry in WalkDir::new(data_dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("Startup cleanup failed to read entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::info!("Deleted orphan file: {}", entry.path().display());
                deleted += 1;
            }
            Err(e) => tracing::error!("Failed to delete {}: {}", entry.path().display(), e),
        }
    }
    deleted
}

/// Handle to the background expiry loop.
pub struct Sweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Starts calling [`DownloadRegistry::evict_expired`] every `interval`, first tick immediately.
    pub fn spawn(registry: Arc<DownloadRegistry>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sweep_loop(registry, interval, cancel.clone()));
        Sweeper { cancel, handle }
    }

    /// Signals the loop to exit and waits for it.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!("Sweeper task ended abnormally: {}", e);
        }
    }
}

async fn sweep_loop(registry: Arc<DownloadRegistry>, interval: Duration, cancel: CancellationToken) {
    tracing::info!("Starting cleanup loop every {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                // A panicking sweep must not end the loop.
                let sweep = registry.clone();
                match tokio::spawn(async move { sweep.evict_expired().await }).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(
                        "Evicted {} expired downloads ({} still live)",
                        count,
                        registry.len()
                    ),
                    Err(e) => tracing::error!("Error in cleanup loop: {}", e),
                }
            }
        }
    }
    tracing::info!("Cleanup loop stopped");
}
