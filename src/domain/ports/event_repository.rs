//! Event-log repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::StorageError;
use crate::domain::models::{EventFilter, EventRecord, EventStats, IncomingEvent};

/// Persistence interface for the durable activity-event log.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Append one event; returns the assigned id.
    async fn insert(&self, event: &IncomingEvent) -> Result<i64, StorageError>;

    /// Append a batch in one transaction; returns assigned ids in order.
    async fn insert_batch(&self, events: &[IncomingEvent]) -> Result<Vec<i64>, StorageError>;

    async fn get(&self, id: i64) -> Result<Option<EventRecord>, StorageError>;

    /// Unprocessed events ordered `timestamp ASC`, optionally filtered by
    /// type. The replay cursor.
    async fn list_unprocessed(
        &self,
        limit: u32,
        event_types: Option<&[String]>,
    ) -> Result<Vec<EventRecord>, StorageError>;

    /// Flip `processed` to true. Idempotent: already-processed ids do not
    /// count toward the returned total.
    async fn mark_processed(&self, ids: &[i64]) -> Result<u64, StorageError>;

    async fn list_by_user(
        &self,
        user_id: u64,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>, StorageError>;

    async fn list_by_guild(
        &self,
        guild_id: u64,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>, StorageError>;

    /// Batched deletion of events older than the cutoff.
    ///
    /// `keep_processed=true` preserves processed rows (only old
    /// unprocessed rows are deleted); `false` makes every old row
    /// eligible. Returns total rows deleted.
    async fn cleanup_old(
        &self,
        older_than: DateTime<Utc>,
        batch_size: u32,
        keep_processed: bool,
    ) -> Result<u64, StorageError>;

    /// Copy processed events older than the cutoff into `archive_table`
    /// (created on demand, identical columns plus `archived_at`), then
    /// delete them. Copy and delete share one transaction.
    async fn archive_old(
        &self,
        older_than: DateTime<Utc>,
        archive_table: &str,
    ) -> Result<u64, StorageError>;

    async fn stats(&self) -> Result<EventStats, StorageError>;
}
