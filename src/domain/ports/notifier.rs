//! Outbound notification sink, provided by the host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the router hands to the chat platform for rendering. The engine
/// does not format messages; the host owns presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub user_id: u64,
    pub guild_id: u64,
    pub achievement_id: i64,
    pub achievement_name: String,
    pub achievement_description: String,
    pub points: i64,
    pub badge_url: Option<String>,
}

/// Result of one send attempt, as classified by the host adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ok,
    /// Retry with backoff (network blip, upstream rate limit).
    Transient(String),
    /// Terminal: do not retry (forbidden DM, missing channel).
    Permanent(String),
}

/// Chat-platform sender injected by the host.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_dm(&self, user_id: u64, payload: &NotificationPayload) -> DeliveryOutcome;

    async fn send_announcement(
        &self,
        guild_id: u64,
        channel_id: u64,
        payload: &NotificationPayload,
    ) -> DeliveryOutcome;
}
