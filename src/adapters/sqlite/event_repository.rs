//! SQLite implementation of the `EventRepository` port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::parse_datetime;
use crate::domain::errors::StorageError;
use crate::domain::models::{EventFilter, EventRecord, EventStats, IncomingEvent};
use crate::domain::ports::EventRepository;

#[derive(Clone)]
pub struct SqliteEventRepository {
    pool: SqlitePool,
}

impl SqliteEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, user_id, guild_id, event_type, event_data, timestamp, \
     channel_id, processed, correlation_id, created_at";

const INSERT_SQL: &str = "INSERT INTO achievement_events \
     (user_id, guild_id, event_type, event_data, timestamp, channel_id, processed, correlation_id) \
     VALUES (?, ?, ?, ?, ?, ?, 0, ?)";

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    user_id: i64,
    guild_id: i64,
    event_type: String,
    event_data: String,
    timestamp: String,
    channel_id: Option<i64>,
    processed: i64,
    correlation_id: Option<String>,
    created_at: String,
}

fn row_to_event(row: EventRow) -> Result<EventRecord, StorageError> {
    let event_data = serde_json::from_str(&row.event_data)
        .map_err(|e| StorageError::Integrity(format!("invalid event_data: {e}")))?;

    Ok(EventRecord {
        id: row.id,
        user_id: row.user_id as u64,
        guild_id: row.guild_id as u64,
        event_type: row.event_type,
        event_data,
        timestamp: parse_datetime(&row.timestamp),
        channel_id: row.channel_id.map(|id| id as u64),
        processed: row.processed != 0,
        correlation_id: row.correlation_id,
        created_at: parse_datetime(&row.created_at),
    })
}

fn event_data_json(event: &IncomingEvent) -> Result<String, StorageError> {
    serde_json::to_string(&event.event_data)
        .map_err(|e| StorageError::Unknown(format!("event_data serialization: {e}")))
}

/// Archive table names are interpolated into DDL; restrict them to plain
/// identifiers.
fn validate_table_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().is_some_and(|c| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StorageError::Integrity(format!(
            "invalid archive table name '{name}'"
        )))
    }
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn insert(&self, event: &IncomingEvent) -> Result<i64, StorageError> {
        let result = sqlx::query(INSERT_SQL)
            .bind(event.user_id as i64)
            .bind(event.guild_id as i64)
            .bind(&event.event_type)
            .bind(event_data_json(event)?)
            .bind(event.timestamp.to_rfc3339())
            .bind(event.channel_id.map(|id| id as i64))
            .bind(&event.correlation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_batch(&self, events: &[IncomingEvent]) -> Result<Vec<i64>, StorageError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            let result = sqlx::query(INSERT_SQL)
                .bind(event.user_id as i64)
                .bind(event.guild_id as i64)
                .bind(&event.event_type)
                .bind(event_data_json(event)?)
                .bind(event.timestamp.to_rfc3339())
                .bind(event.channel_id.map(|id| id as i64))
                .bind(&event.correlation_id)
                .execute(&mut *tx)
                .await?;
            ids.push(result.last_insert_rowid());
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn get(&self, id: i64) -> Result<Option<EventRecord>, StorageError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM achievement_events WHERE id = ?");
        let row: Option<EventRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_event).transpose()
    }

    async fn list_unprocessed(
        &self,
        limit: u32,
        event_types: Option<&[String]>,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM achievement_events WHERE processed = 0"
        );
        if let Some(types) = event_types {
            if types.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; types.len()].join(", ");
            sql.push_str(&format!(" AND event_type IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY timestamp ASC LIMIT ?");

        let mut query = sqlx::query_as::<_, EventRow>(&sql);
        if let Some(types) = event_types {
            for ty in types {
                query = query.bind(ty);
            }
        }
        let rows = query.bind(i64::from(limit)).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_event).collect()
    }

    async fn mark_processed(&self, ids: &[i64]) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        // processed flips false→true exactly once; re-marking counts zero.
        let sql = format!(
            "UPDATE achievement_events SET processed = 1 \
             WHERE processed = 0 AND id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn list_by_user(
        &self,
        user_id: u64,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>, StorageError> {
        self.list_by_column("user_id", user_id as i64, filter).await
    }

    async fn list_by_guild(
        &self,
        guild_id: u64,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>, StorageError> {
        self.list_by_column("guild_id", guild_id as i64, filter).await
    }

    async fn cleanup_old(
        &self,
        older_than: DateTime<Utc>,
        batch_size: u32,
        keep_processed: bool,
    ) -> Result<u64, StorageError> {
        let cutoff = older_than.to_rfc3339();
        // `keep_processed` preserves processed rows; only stale unprocessed
        // rows go. Without it every old row is eligible.
        let processed_clause = if keep_processed {
            " AND processed = 0"
        } else {
            ""
        };
        let sql = format!(
            "DELETE FROM achievement_events WHERE id IN ( \
                 SELECT id FROM achievement_events \
                 WHERE timestamp < ?{processed_clause} \
                 ORDER BY timestamp ASC LIMIT ?)"
        );

        let batch = i64::from(batch_size.max(1));
        let mut total = 0u64;
        loop {
            let result = sqlx::query(&sql)
                .bind(&cutoff)
                .bind(batch)
                .execute(&self.pool)
                .await?;
            let deleted = result.rows_affected();
            total += deleted;
            if deleted < batch as u64 {
                break;
            }
        }
        Ok(total)
    }

    async fn archive_old(
        &self,
        older_than: DateTime<Utc>,
        archive_table: &str,
    ) -> Result<u64, StorageError> {
        validate_table_name(archive_table)?;
        let cutoff = older_than.to_rfc3339();

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {archive_table} ( \
                 id INTEGER PRIMARY KEY, \
                 user_id INTEGER NOT NULL, \
                 guild_id INTEGER NOT NULL, \
                 event_type TEXT NOT NULL, \
                 event_data TEXT NOT NULL, \
                 timestamp TEXT NOT NULL, \
                 channel_id INTEGER, \
                 processed INTEGER NOT NULL DEFAULT 0, \
                 correlation_id TEXT, \
                 created_at TEXT NOT NULL, \
                 archived_at TEXT NOT NULL DEFAULT (datetime('now')) \
             )"
        ))
        .execute(&self.pool)
        .await?;

        // Copy then delete inside one transaction so a crash cannot lose
        // or duplicate rows between the two.
        let mut tx = self.pool.begin().await?;
        let copied = sqlx::query(&format!(
            "INSERT INTO {archive_table} \
                 (id, user_id, guild_id, event_type, event_data, timestamp, \
                  channel_id, processed, correlation_id, created_at, archived_at) \
             SELECT id, user_id, guild_id, event_type, event_data, timestamp, \
                    channel_id, processed, correlation_id, created_at, ? \
             FROM achievement_events \
             WHERE timestamp < ? AND processed = 1"
        ))
        .bind(Utc::now().to_rfc3339())
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if copied > 0 {
            sqlx::query(
                "DELETE FROM achievement_events WHERE timestamp < ? AND processed = 1",
            )
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(copied)
    }

    async fn stats(&self) -> Result<EventStats, StorageError> {
        let (total, processed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(processed), 0) FROM achievement_events",
        )
        .fetch_one(&self.pool)
        .await?;

        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT event_type, COUNT(*) FROM achievement_events \
             GROUP BY event_type ORDER BY COUNT(*) DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(EventStats {
            total: total as u64,
            processed: processed as u64,
            unprocessed: (total - processed) as u64,
            by_type: by_type
                .into_iter()
                .map(|(ty, count)| (ty, count as u64))
                .collect(),
        })
    }
}

impl SqliteEventRepository {
    async fn list_by_column(
        &self,
        column: &str,
        value: i64,
        filter: &EventFilter,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM achievement_events WHERE {column} = ?"
        );
        if let Some(ref types) = filter.event_types {
            if types.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; types.len()].join(", ");
            sql.push_str(&format!(" AND event_type IN ({placeholders})"));
        }
        if filter.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as::<_, EventRow>(&sql).bind(value);
        if let Some(ref types) = filter.event_types {
            for ty in types {
                query = query.bind(ty);
            }
        }
        if let Some(since) = filter.since {
            query = query.bind(since.to_rfc3339());
        }
        if let Some(until) = filter.until {
            query = query.bind(until.to_rfc3339());
        }
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        let rows = query
            .bind(i64::from(limit))
            .bind(i64::from(filter.offset))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_event).collect()
    }
}
