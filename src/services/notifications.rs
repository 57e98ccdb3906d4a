//! Notification router: preference resolution, rate limiting, delivery
//! tracking, and retries.
//!
//! Consumes `AwardEvent`s from the award service, merges user preferences
//! with guild settings, and pushes payloads through the host-provided
//! `Notifier`. Every attempt is journaled in `notification_events`:
//! PENDING → SENT, or PENDING → FAILED → PENDING (retry) → SENT/FAILED.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::cache::{CacheManager, CacheType};
use crate::domain::errors::{NotifyError, StorageError};
use crate::domain::models::{
    DeliveryStatus, GlobalNotificationSettings, NotificationConfig, NotificationKind,
    NotificationPreference, RateLimitPolicy, ResolvedRoute,
};
use crate::domain::ports::{
    DeliveryOutcome, NotificationPayload, NotificationRepository, Notifier,
};
use crate::services::award::{AwardEvent, AwardService};

pub struct NotificationRouter {
    repo: Arc<dyn NotificationRepository>,
    notifier: Arc<dyn Notifier>,
    awards: Arc<AwardService>,
    cache: Arc<CacheManager>,
    config: NotificationConfig,
    /// One direct limiter per guild, rebuilt when the guild's configured
    /// gap changes.
    guild_limiters: Mutex<HashMap<u64, (u32, Arc<DefaultDirectRateLimiter>)>>,
    dm_limiter: Option<DefaultKeyedRateLimiter<u64>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationRouter {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        notifier: Arc<dyn Notifier>,
        awards: Arc<AwardService>,
        cache: Arc<CacheManager>,
        config: NotificationConfig,
    ) -> Self {
        let dm_limiter = NonZeroU32::new(1).and_then(|burst| {
            Quota::with_period(Duration::from_secs(u64::from(config.dm_rate_limit_seconds)))
                .map(|quota| RateLimiter::keyed(quota.allow_burst(burst)))
        });
        Self {
            repo,
            notifier,
            awards,
            cache,
            config,
            guild_limiters: Mutex::new(HashMap::new()),
            dm_limiter,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the award stream and start routing.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        let router = Arc::clone(self);
        let receiver = self.awards.subscribe();
        tasks.push(tokio::spawn(async move {
            router.run(receiver).await;
        }));
        info!("notification router started");
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        info!("notification router stopped");
    }

    async fn run(self: Arc<Self>, mut receiver: broadcast::Receiver<AwardEvent>) {
        loop {
            let award = tokio::select! {
                () = self.cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(award) => award,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "award stream lagged; some notifications were missed");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if let Err(e) = self.handle_award(&award).await {
                warn!(
                    user_id = award.user_achievement.user_id,
                    achievement_id = award.achievement.id,
                    error = %e,
                    "award notification failed"
                );
            }
        }
    }

    #[instrument(skip(self, award), fields(user_id = award.user_achievement.user_id, achievement_id = award.achievement.id))]
    async fn handle_award(&self, award: &AwardEvent) -> Result<(), NotifyError> {
        let user_id = award.user_achievement.user_id;
        let guild_id = award.guild_id;
        let route = self.resolve(user_id, guild_id, award).await?;

        let payload = NotificationPayload {
            user_id,
            guild_id,
            achievement_id: award.achievement.id,
            achievement_name: award.achievement.name.clone(),
            achievement_description: award.achievement.description.clone(),
            points: award.achievement.points,
            badge_url: award.achievement.badge_url.clone(),
        };

        let mut delivered = false;

        if route.send_dm {
            match self.attempt_dm(award, &payload).await {
                Ok(true) => delivered = true,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "dm delivery failed"),
            }
        }

        if let Some(channel_id) = route.announce_channel {
            match self.attempt_announcement(award, channel_id, &payload).await {
                Ok(true) => delivered = true,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "announcement delivery failed"),
            }
        }

        if delivered {
            self.awards
                .mark_notified(award.user_achievement.id)
                .await
                .map_err(NotifyError::Storage)?;
        }
        Ok(())
    }

    /// Merge the user's preferences (defaults when absent) with the guild
    /// settings into a concrete route for this award.
    pub async fn resolve(
        &self,
        user_id: u64,
        guild_id: u64,
        award: &AwardEvent,
    ) -> Result<ResolvedRoute, NotifyError> {
        let preference = self.preference(user_id, guild_id).await?;
        let settings = self.guild_settings(guild_id).await?;

        // An explicit type list narrows which achievement families notify.
        if !preference.notification_types.is_empty()
            && !preference
                .notification_types
                .iter()
                .any(|ty| ty == award.achievement.achievement_type.as_str())
        {
            return Ok(ResolvedRoute {
                send_dm: false,
                announce_channel: None,
            });
        }

        let announce_channel = if settings.announcement_enabled
            && preference.announcement_enabled
            && !award.achievement.is_hidden
            && (!settings.important_only || award.achievement.is_important())
        {
            settings.announcement_channel_id
        } else {
            None
        };

        Ok(ResolvedRoute {
            send_dm: preference.dm_enabled,
            announce_channel,
        })
    }

    async fn attempt_dm(
        &self,
        award: &AwardEvent,
        payload: &NotificationPayload,
    ) -> Result<bool, NotifyError> {
        let user_id = award.user_achievement.user_id;
        if let Some(ref limiter) = self.dm_limiter {
            if limiter.check_key(&user_id).is_err() {
                match self.config.rate_limit_policy {
                    RateLimitPolicy::Defer => limiter.until_key_ready(&user_id).await,
                    RateLimitPolicy::Drop => {
                        self.record_rate_limited(award, NotificationKind::Dm).await?;
                        return Ok(false);
                    }
                }
            }
        }
        self.deliver(award, NotificationKind::Dm, None, payload)
            .await
            .map(|()| true)
    }

    async fn attempt_announcement(
        &self,
        award: &AwardEvent,
        channel_id: u64,
        payload: &NotificationPayload,
    ) -> Result<bool, NotifyError> {
        let settings = self.guild_settings(award.guild_id).await?;
        if !self
            .admit_guild(award.guild_id, settings.rate_limit_seconds)
            .await
        {
            self.record_rate_limited(award, NotificationKind::Announcement)
                .await?;
            return Ok(false);
        }
        self.deliver(
            award,
            NotificationKind::Announcement,
            Some(channel_id),
            payload,
        )
        .await
        .map(|()| true)
    }

    /// Sliding-window admission for guild announcements. Returns false
    /// only under the Drop policy; Defer waits for the window.
    async fn admit_guild(&self, guild_id: u64, rate_limit_seconds: u32) -> bool {
        if rate_limit_seconds == 0 {
            return true;
        }
        let limiter = {
            let mut limiters = self.guild_limiters.lock().await;
            match limiters.get(&guild_id) {
                Some((rate, limiter)) if *rate == rate_limit_seconds => Arc::clone(limiter),
                _ => {
                    let quota = Quota::with_period(Duration::from_secs(u64::from(
                        rate_limit_seconds,
                    )))
                    .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
                    let limiter = Arc::new(RateLimiter::direct(quota));
                    limiters.insert(guild_id, (rate_limit_seconds, Arc::clone(&limiter)));
                    limiter
                }
            }
        };

        if limiter.check().is_ok() {
            return true;
        }
        match self.config.rate_limit_policy {
            RateLimitPolicy::Defer => {
                limiter.until_ready().await;
                true
            }
            RateLimitPolicy::Drop => false,
        }
    }

    async fn record_rate_limited(
        &self,
        award: &AwardEvent,
        kind: NotificationKind,
    ) -> Result<(), NotifyError> {
        let record = self
            .repo
            .create_delivery(
                award.user_achievement.user_id,
                award.guild_id,
                award.achievement.id,
                kind,
            )
            .await
            .map_err(NotifyError::Storage)?;
        self.repo
            .update_delivery(record.id, DeliveryStatus::Failed, Some("rate limited"), 0)
            .await
            .map_err(NotifyError::Storage)?;
        debug!(kind = kind.as_str(), "delivery dropped by rate limit");
        Ok(())
    }

    /// One delivery with exponential-backoff retries for transient
    /// failures, journaled throughout.
    async fn deliver(
        &self,
        award: &AwardEvent,
        kind: NotificationKind,
        channel_id: Option<u64>,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        let user_id = award.user_achievement.user_id;
        let record = self
            .repo
            .create_delivery(user_id, award.guild_id, award.achievement.id, kind)
            .await
            .map_err(NotifyError::Storage)?;

        let attempts = AtomicU32::new(0);
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_secs(self.config.retry_backoff_base_seconds.max(1)),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let operation = || async {
            let attempt = attempts.load(Ordering::SeqCst);
            if attempt > 0 {
                // Back in flight after a transient failure.
                self.repo
                    .update_delivery(record.id, DeliveryStatus::Pending, None, attempt)
                    .await
                    .map_err(|e| backoff::Error::permanent(NotifyError::Storage(e)))?;
            }

            let outcome = match kind {
                NotificationKind::Dm => self.notifier.send_dm(user_id, payload).await,
                NotificationKind::Announcement => {
                    let channel = channel_id.unwrap_or_default();
                    self.notifier
                        .send_announcement(award.guild_id, channel, payload)
                        .await
                }
            };

            match outcome {
                DeliveryOutcome::Ok => Ok(()),
                DeliveryOutcome::Transient(message) => {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    self.repo
                        .update_delivery(
                            record.id,
                            DeliveryStatus::Failed,
                            Some(&message),
                            attempt,
                        )
                        .await
                        .map_err(|e| backoff::Error::permanent(NotifyError::Storage(e)))?;
                    if attempt > self.config.retry_max {
                        Err(backoff::Error::permanent(NotifyError::Transient(message)))
                    } else {
                        Err(backoff::Error::transient(NotifyError::Transient(message)))
                    }
                }
                DeliveryOutcome::Permanent(message) => {
                    let attempt = attempts.load(Ordering::SeqCst);
                    self.repo
                        .update_delivery(
                            record.id,
                            DeliveryStatus::Failed,
                            Some(&message),
                            attempt,
                        )
                        .await
                        .map_err(|e| backoff::Error::permanent(NotifyError::Storage(e)))?;
                    Err(backoff::Error::permanent(NotifyError::Permanent(message)))
                }
            }
        };

        match backoff::future::retry(policy, operation).await {
            Ok(()) => {
                self.repo
                    .update_delivery(
                        record.id,
                        DeliveryStatus::Sent,
                        None,
                        attempts.load(Ordering::SeqCst),
                    )
                    .await
                    .map_err(NotifyError::Storage)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // -- preference management ---------------------------------------------

    pub async fn preference(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<NotificationPreference, NotifyError> {
        let key = preference_key(user_id, guild_id);
        if let Some(cached) = self
            .cache
            .get::<NotificationPreference>(CacheType::UserPreference, &key)
            .await
        {
            return Ok(cached);
        }
        let preference = self
            .repo
            .get_preference(user_id, guild_id)
            .await
            .map_err(NotifyError::Storage)?
            .unwrap_or_else(|| NotificationPreference::defaults(user_id, guild_id));
        self.cache
            .insert(CacheType::UserPreference, key, &preference)
            .await;
        Ok(preference)
    }

    pub async fn set_preference(
        &self,
        preference: NotificationPreference,
    ) -> Result<(), NotifyError> {
        self.repo
            .upsert_preference(&preference)
            .await
            .map_err(NotifyError::Storage)?;
        self.cache
            .invalidate(
                CacheType::UserPreference,
                &preference_key(preference.user_id, preference.guild_id),
            )
            .await;
        Ok(())
    }

    pub async fn guild_settings(
        &self,
        guild_id: u64,
    ) -> Result<GlobalNotificationSettings, NotifyError> {
        let key = guild_key(guild_id);
        if let Some(cached) = self
            .cache
            .get::<GlobalNotificationSettings>(CacheType::GuildSettings, &key)
            .await
        {
            return Ok(cached);
        }
        let settings = self
            .repo
            .get_guild_settings(guild_id)
            .await
            .map_err(NotifyError::Storage)?
            .unwrap_or_else(|| GlobalNotificationSettings::defaults(guild_id));
        self.cache
            .insert(CacheType::GuildSettings, key, &settings)
            .await;
        Ok(settings)
    }

    pub async fn set_guild_settings(
        &self,
        settings: GlobalNotificationSettings,
    ) -> Result<(), NotifyError> {
        self.repo
            .upsert_guild_settings(&settings)
            .await
            .map_err(NotifyError::Storage)?;
        self.cache
            .invalidate(CacheType::GuildSettings, &guild_key(settings.guild_id))
            .await;
        Ok(())
    }

    pub async fn delivery_history(
        &self,
        user_id: u64,
        limit: u32,
    ) -> Result<Vec<crate::domain::models::NotificationDeliveryRecord>, StorageError> {
        self.repo.list_deliveries_for_user(user_id, limit).await
    }
}

fn preference_key(user_id: u64, guild_id: u64) -> String {
    format!("pref:{user_id}:{guild_id}")
}

fn guild_key(guild_id: u64) -> String {
    format!("guild:{guild_id}")
}
