//! Activity events: the inbound record shape and the persisted log row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known event types. The evaluator registry decides which types are
/// actually consumed; unknown types are logged and marked processed with
/// zero candidates.
pub mod event_types {
    pub const MESSAGE_SENT: &str = "achievement.message_sent";
    pub const REACTION_ADDED: &str = "achievement.reaction_added";
    pub const VOICE_JOINED: &str = "achievement.voice_joined";
    pub const COMMAND_USED: &str = "achievement.command_used";
    pub const GRANTED: &str = "achievement.granted";
    pub const REVOKED: &str = "achievement.revoked";
}

/// An activity event as handed to `dispatch` by the chat-platform adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub user_id: u64,
    pub guild_id: u64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl IncomingEvent {
    pub fn new(user_id: u64, guild_id: u64, event_type: impl Into<String>) -> Self {
        Self {
            user_id,
            guild_id,
            event_type: event_type.into(),
            event_data: serde_json::Value::Object(serde_json::Map::new()),
            timestamp: Utc::now(),
            channel_id: None,
            correlation_id: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Basic shape validation before the event is accepted into the log.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_type.trim().is_empty() {
            return Err("event_type must not be empty".to_string());
        }
        if !self.event_data.is_object() {
            return Err("event_data must be a JSON object".to_string());
        }
        Ok(())
    }
}

/// A persisted event-log row. Append-only; `processed` flips false→true
/// exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub user_id: u64,
    pub guild_id: u64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub channel_id: Option<u64>,
    pub processed: bool,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filters for per-user / per-guild event queries.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_types: Option<Vec<String>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl EventFilter {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}

/// Aggregate counts over the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub total: u64,
    pub processed: u64,
    pub unprocessed: u64,
    pub by_type: Vec<(String, u64)>,
}
