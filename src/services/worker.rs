use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

use crate::api::error::UploadError;
use crate::models::PurgeResult;
use crate::services::engine::UploadEngine;

/// Periodically purges stale uploads until told to shut down.
pub struct PurgeWorker {
    engine: Arc<UploadEngine>,
    interval: Duration,
    max_age: Option<Duration>,
    shutdown: watch::Receiver<bool>,
}

impl PurgeWorker {
    pub fn new(
        engine: Arc<UploadEngine>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            interval,
            max_age: None,
            shutdown,
        }
    }

    /// Overrides the idle threshold; the configured expiry applies otherwise.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub async fn run(mut self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "🚀 Purge worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Purge worker shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!("Purge run failed: {}", e);
                    }
                }
            }
        }
    }

    pub async fn run_once(&self) -> Result<PurgeResult, UploadError> {
        tracing::info!("🧹 Running upload purge...");
        let result = self.engine.purge(self.max_age).await?;
        self.engine.cleanup_locks();
        tracing::info!(
            purged = result.items.len(),
            orphans = result.orphans.len(),
            "✅ Purge run completed"
        );
        Ok(result)
    }
}
