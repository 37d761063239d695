//! Segment store: staged segment payloads keyed by (task, index).
//!
//! Every write is a single statement, so readers never observe a partially
//! written entry. A failed segment simply has no row.

use crate::error::DatabaseError;
use crate::types::TaskId;
use crate::{Error, Result};
use std::time::Duration;

use super::{Database, SegmentLayout, StoredSegment};

impl Database {
    /// Store a segment payload, replacing any existing entry for the same key
    pub async fn put_segment(&self, task_id: TaskId, index: u64, data: &[u8]) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO segments (task_id, segment_index, data, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(task_id, segment_index) DO UPDATE SET
                data = excluded.data,
                size_bytes = excluded.size_bytes,
                created_at = excluded.created_at
            "#,
        )
        .bind(task_id)
        .bind(index as i64)
        .bind(data)
        .bind(data.len() as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to store segment: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get one segment payload
    pub async fn get_segment(&self, task_id: TaskId, index: u64) -> Result<Option<Vec<u8>>> {
        let data: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT data FROM segments WHERE task_id = ? AND segment_index = ?",
        )
        .bind(task_id)
        .bind(index as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get segment: {}",
                e
            )))
        })?;

        Ok(data)
    }

    /// All stored segments of a task, ascending by index
    pub async fn list_segments_ordered(&self, task_id: TaskId) -> Result<Vec<StoredSegment>> {
        let rows = sqlx::query_as::<_, StoredSegment>(
            r#"
            SELECT segment_index, data
            FROM segments
            WHERE task_id = ?
            ORDER BY segment_index ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list segments: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Index and size of every stored segment of a task, ascending by index
    pub async fn segment_layout(&self, task_id: TaskId) -> Result<Vec<SegmentLayout>> {
        let rows = sqlx::query_as::<_, SegmentLayout>(
            r#"
            SELECT segment_index, size_bytes
            FROM segments
            WHERE task_id = ?
            ORDER BY segment_index ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read segment layout: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Stored segments with `first <= index <= last`, ascending by index
    pub async fn segments_in_range(
        &self,
        task_id: TaskId,
        first: u64,
        last: u64,
    ) -> Result<Vec<StoredSegment>> {
        let rows = sqlx::query_as::<_, StoredSegment>(
            r#"
            SELECT segment_index, data
            FROM segments
            WHERE task_id = ? AND segment_index BETWEEN ? AND ?
            ORDER BY segment_index ASC
            "#,
        )
        .bind(task_id)
        .bind(first as i64)
        .bind(last as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read segment range: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Number of stored segments for a task
    pub async fn count_segments(&self, task_id: TaskId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM segments WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count segments: {}",
                    e
                )))
            })?;

        Ok(count as u64)
    }

    /// Remove every segment of a task; returns the number removed
    ///
    /// Calling this for a task with no stored segments is a no-op.
    pub async fn delete_task_segments(&self, task_id: TaskId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM segments WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete segments: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    /// Remove segments written more than `max_age` ago, across all tasks
    pub async fn sweep_segments_older_than(&self, max_age: Duration) -> Result<u64> {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = chrono::Utc::now()
            .timestamp_millis()
            .saturating_sub(max_age_ms);

        let result = sqlx::query("DELETE FROM segments WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to sweep segments: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }
}
