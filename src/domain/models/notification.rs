//! Notification preferences, guild settings, and the delivery log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery sink for an award notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Dm,
    Announcement,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Announcement => "announcement",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dm" => Some(Self::Dm),
            "announcement" => Some(Self::Announcement),
            _ => None,
        }
    }
}

/// Lifecycle of one delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Per-user notification preferences within one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: u64,
    pub guild_id: u64,
    pub dm_enabled: bool,
    pub announcement_enabled: bool,
    /// Enabled notification categories; empty means "all".
    pub notification_types: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreference {
    /// Defaults applied when a user has no explicit preference row:
    /// DMs on, announcements deferred to the guild settings.
    pub fn defaults(user_id: u64, guild_id: u64) -> Self {
        Self {
            user_id,
            guild_id,
            dm_enabled: true,
            announcement_enabled: true,
            notification_types: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Guild-wide announcement settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalNotificationSettings {
    pub guild_id: u64,
    pub announcement_channel_id: Option<u64>,
    pub announcement_enabled: bool,
    /// Minimum gap between announcements in this guild.
    pub rate_limit_seconds: u32,
    pub important_only: bool,
    pub updated_at: DateTime<Utc>,
}

impl GlobalNotificationSettings {
    pub fn defaults(guild_id: u64) -> Self {
        Self {
            guild_id,
            announcement_channel_id: None,
            announcement_enabled: false,
            rate_limit_seconds: 60,
            important_only: false,
            updated_at: Utc::now(),
        }
    }
}

/// Where an award notification should go after merging user preferences
/// with guild settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub send_dm: bool,
    /// Channel to announce in, when announcements are enabled end-to-end.
    pub announce_channel: Option<u64>,
}

/// One delivery attempt in the notification log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDeliveryRecord {
    pub id: i64,
    pub user_id: u64,
    pub guild_id: u64,
    pub achievement_id: i64,
    pub kind: NotificationKind,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        assert_eq!(
            NotificationKind::from_str(NotificationKind::Dm.as_str()),
            Some(NotificationKind::Dm)
        );
        assert_eq!(NotificationKind::from_str("webhook"), None);
    }

    #[test]
    fn test_preference_defaults() {
        let p = NotificationPreference::defaults(42, 7);
        assert!(p.dm_enabled);
        assert!(p.announcement_enabled);
        assert!(p.notification_types.is_empty());
    }

    #[test]
    fn test_guild_defaults_disable_announcements() {
        let s = GlobalNotificationSettings::defaults(7);
        assert!(!s.announcement_enabled);
        assert_eq!(s.rate_limit_seconds, 60);
    }
}
