//! Trigger engine: turns activity events into progress and awards.
//!
//! Pipeline per event:
//! received → persisted → candidates resolved → progress applied per
//! candidate → award attempted on a threshold edge → marked processed.
//!
//! Events are durable before `dispatch` returns. Processing is
//! best-effort afterwards: anything that fails on a storage error stays
//! unprocessed and is picked up by the replay loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::EngineError;
use crate::domain::models::{
    event_types, BackpressurePolicy, EventRecord, IncomingEvent, TriggerEngineConfig,
};
use crate::domain::ports::{AchievementRepository, EventRepository};
use crate::services::award::{AwardOutcome, AwardService};
use crate::services::evaluators::EvaluatorRegistry;
use crate::services::progress::{EventOutcome, ProgressTracker};

pub struct TriggerEngine {
    events: Arc<dyn EventRepository>,
    achievements: Arc<dyn AchievementRepository>,
    tracker: Arc<ProgressTracker>,
    awards: Arc<AwardService>,
    registry: Arc<EvaluatorRegistry>,
    config: TriggerEngineConfig,
    queue_tx: mpsc::Sender<EventRecord>,
    queue_rx: Mutex<Option<mpsc::Receiver<EventRecord>>>,
    /// Ids currently queued or being processed; keeps the replay loop
    /// from double-applying live events.
    inflight: Mutex<HashSet<i64>>,
    workers: Arc<Semaphore>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerEngine {
    pub fn new(
        events: Arc<dyn EventRepository>,
        achievements: Arc<dyn AchievementRepository>,
        tracker: Arc<ProgressTracker>,
        awards: Arc<AwardService>,
        registry: Arc<EvaluatorRegistry>,
        config: TriggerEngineConfig,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            events,
            achievements,
            tracker,
            awards,
            registry,
            config,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            inflight: Mutex::new(HashSet::new()),
            workers,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Accept one event. Returns the persisted event id; `Ok` implies the
    /// record is durable. Queue capacity is reserved *before* the write
    /// so a `Busy` rejection never leaves a stray row behind.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, user_id = event.user_id))]
    pub async fn dispatch(&self, mut event: IncomingEvent) -> Result<i64, EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Shutdown);
        }
        event.validate().map_err(EngineError::InvalidEvent)?;
        event
            .correlation_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string());

        let permit = match self.config.backpressure {
            BackpressurePolicy::Block => self
                .queue_tx
                .reserve()
                .await
                .map_err(|_| EngineError::Shutdown)?,
            BackpressurePolicy::Reject => match self.queue_tx.try_reserve() {
                Ok(permit) => permit,
                Err(mpsc::error::TrySendError::Full(())) => return Err(EngineError::Busy),
                Err(mpsc::error::TrySendError::Closed(())) => return Err(EngineError::Shutdown),
            },
        };

        let id = self.events.insert(&event).await?;
        let record = EventRecord {
            id,
            user_id: event.user_id,
            guild_id: event.guild_id,
            event_type: event.event_type,
            event_data: event.event_data,
            timestamp: event.timestamp,
            channel_id: event.channel_id,
            processed: false,
            correlation_id: event.correlation_id,
            created_at: Utc::now(),
        };

        self.inflight.lock().await.insert(id);
        permit.send(record);
        Ok(id)
    }

    /// Spawn the dispatcher and replay loops.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        let dispatcher = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            dispatcher.dispatcher_loop().await;
        }));

        let replayer = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            replayer.replay_loop().await;
        }));
        info!(
            workers = self.config.workers,
            queue = self.config.queue_capacity,
            "trigger engine started"
        );
    }

    /// Stop accepting events, drain in-flight work within the grace
    /// period, and join the background loops. Queued events stay in the
    /// log for the next start.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        info!("trigger engine stopped");
    }

    async fn dispatcher_loop(self: Arc<Self>) {
        let Some(mut queue_rx) = self.queue_rx.lock().await.take() else {
            error!("dispatcher started twice");
            return;
        };

        loop {
            let record = tokio::select! {
                () = self.cancel.cancelled() => break,
                maybe = queue_rx.recv() => match maybe {
                    Some(record) => record,
                    None => break,
                },
            };

            let permit = tokio::select! {
                () = self.cancel.cancelled() => break,
                acquired = Arc::clone(&self.workers).acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                let terminal = engine.run_event(&record).await;
                if terminal {
                    if let Err(e) = engine.events.mark_processed(&[record.id]).await {
                        warn!(event_id = record.id, error = %e, "failed to mark event processed");
                    }
                }
                engine.inflight.lock().await.remove(&record.id);
            });
        }

        // Drain: wait for every worker slot to come back.
        let grace = Duration::from_secs(self.config.shutdown_grace_secs.max(1));
        let workers = self.config.workers.max(1) as u32;
        if tokio::time::timeout(grace, Arc::clone(&self.workers).acquire_many_owned(workers))
            .await
            .is_err()
        {
            warn!("shutdown grace period expired with events still in flight");
        }
    }

    async fn replay_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.replay_interval_seconds.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => self.replay_batch().await,
            }
        }
    }

    /// Fetch a batch of unprocessed events, process them concurrently,
    /// and mark the terminal ones processed in one call.
    async fn replay_batch(self: &Arc<Self>) {
        let batch = match self
            .events
            .list_unprocessed(self.config.batch_size, None)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "replay fetch failed");
                return;
            }
        };

        let batch: Vec<EventRecord> = {
            let mut inflight = self.inflight.lock().await;
            batch
                .into_iter()
                .filter(|record| inflight.insert(record.id))
                .collect()
        };
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "replaying unprocessed events");

        let mut handles = Vec::with_capacity(batch.len());
        for record in batch {
            let permit = match Arc::clone(&self.workers).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let engine = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let terminal = engine.run_event(&record).await;
                (record.id, terminal)
            }));
        }

        let mut terminal_ids = Vec::new();
        let mut all_ids = Vec::new();
        for result in futures::future::join_all(handles).await {
            if let Ok((id, terminal)) = result {
                all_ids.push(id);
                if terminal {
                    terminal_ids.push(id);
                }
            }
        }

        if !terminal_ids.is_empty() {
            if let Err(e) = self.events.mark_processed(&terminal_ids).await {
                warn!(error = %e, "failed to mark replayed batch processed");
            }
        }

        let mut inflight = self.inflight.lock().await;
        for id in all_ids {
            inflight.remove(&id);
        }
    }

    /// Returns whether the event reached a terminal state (safe to mark
    /// processed). Storage errors are the only non-terminal outcome.
    async fn run_event(&self, record: &EventRecord) -> bool {
        match self.handle_event(record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    event_id = record.id,
                    event_type = %record.event_type,
                    error = %e,
                    "event processing failed; left unprocessed for replay"
                );
                false
            }
        }
    }

    async fn handle_event(&self, record: &EventRecord) -> Result<(), EngineError> {
        // Admin events bypass evaluation.
        match record.event_type.as_str() {
            event_types::GRANTED => return self.handle_admin_grant(record).await,
            event_types::REVOKED => return self.handle_admin_revoke(record).await,
            _ => {}
        }

        let candidate_types = self.registry.candidate_types_for(&record.event_type);
        if candidate_types.is_empty() {
            debug!(event_type = %record.event_type, "no candidates for event type");
            return Ok(());
        }

        for ty in candidate_types {
            let candidates = self.achievements.list_active_by_type(*ty).await?;
            for achievement in candidates {
                match self.tracker.apply_event(&achievement, record).await? {
                    Ok(EventOutcome::Applied(report)) if report.crossed_threshold => {
                        let outcome = self
                            .awards
                            .maybe_award(record.user_id, achievement.id, record.guild_id)
                            .await?;
                        match outcome {
                            AwardOutcome::Awarded(_) => {}
                            AwardOutcome::AlreadyAwarded => debug!(
                                user_id = record.user_id,
                                achievement_id = achievement.id,
                                "award collision absorbed"
                            ),
                            AwardOutcome::NotEligible => warn!(
                                user_id = record.user_id,
                                achievement_id = achievement.id,
                                "crossed threshold but award found progress ineligible"
                            ),
                        }
                    }
                    Ok(EventOutcome::AlreadyApplied { complete: true }) => {
                        // Replay of a crashed run: progress committed but
                        // the award may be missing. maybe_award is
                        // idempotent either way.
                        self.awards
                            .maybe_award(record.user_id, achievement.id, record.guild_id)
                            .await?;
                    }
                    Ok(_) => {}
                    Err(evaluator_error) => {
                        // Poison-pill protection: a broken evaluator must
                        // not wedge the event log.
                        error!(
                            event_id = record.id,
                            achievement_id = evaluator_error.achievement_id,
                            error = %evaluator_error,
                            "evaluator failed; candidate skipped"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_admin_grant(&self, record: &EventRecord) -> Result<(), EngineError> {
        let Some(achievement_id) = record.event_data.get("achievement_id").and_then(|v| v.as_i64())
        else {
            warn!(event_id = record.id, "grant event missing achievement_id");
            return Ok(());
        };
        match self
            .awards
            .award_directly(record.user_id, achievement_id, record.guild_id)
            .await
        {
            Ok(_) => Ok(()),
            Err(crate::domain::errors::StorageError::NotFound) => {
                warn!(event_id = record.id, achievement_id, "grant for unknown achievement");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_admin_revoke(&self, record: &EventRecord) -> Result<(), EngineError> {
        let Some(achievement_id) = record.event_data.get("achievement_id").and_then(|v| v.as_i64())
        else {
            warn!(event_id = record.id, "revoke event missing achievement_id");
            return Ok(());
        };
        self.awards.revoke(record.user_id, achievement_id).await?;
        Ok(())
    }
}
