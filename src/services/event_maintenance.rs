//! Periodic event-log maintenance: archival and cleanup.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::errors::StorageError;
use crate::domain::models::EventRetentionConfig;
use crate::domain::ports::EventRepository;

pub const ARCHIVE_TABLE: &str = "achievement_events_archive";

pub struct EventMaintenance {
    events: Arc<dyn EventRepository>,
    config: EventRetentionConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventMaintenance {
    pub fn new(events: Arc<dyn EventRepository>, config: EventRetentionConfig) -> Self {
        Self {
            events,
            config,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        let maintenance = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            maintenance.run().await;
        }));
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.maintenance_interval_secs.max(60));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick; maintenance is never urgent at boot.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "event maintenance pass failed");
                    }
                }
            }
        }
    }

    /// One maintenance pass: archive processed events past the archive
    /// horizon, then delete events past the deletion horizon (keeping
    /// processed rows, which archival owns).
    pub async fn run_once(&self) -> Result<(), StorageError> {
        let now = Utc::now();

        if self.config.archive_after_days > 0 {
            let archive_cutoff =
                now - chrono::Duration::days(i64::from(self.config.archive_after_days));
            let archived = self.events.archive_old(archive_cutoff, ARCHIVE_TABLE).await?;
            if archived > 0 {
                info!(archived, "archived processed events");
            }
        }

        if self.config.delete_after_days > 0 {
            let delete_cutoff =
                now - chrono::Duration::days(i64::from(self.config.delete_after_days));
            let deleted = self
                .events
                .cleanup_old(delete_cutoff, self.config.batch_size, true)
                .await?;
            if deleted > 0 {
                info!(deleted, "deleted stale unprocessed events");
            }
        }

        Ok(())
    }
}
