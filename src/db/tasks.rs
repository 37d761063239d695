//! Task record persistence.

use crate::error::{DatabaseError, ErrorKind};
use crate::types::{DownloadTask, Status, TaskId};
use crate::{Error, Result};
use std::time::Duration;

use super::{Database, TaskRecord};

const TERMINAL_STATUSES: [i32; 3] = [
    Status::Completed.to_i32(),
    Status::Error.to_i32(),
    Status::Cancelled.to_i32(),
];

impl Database {
    /// Insert a new task record
    pub async fn insert_task(&self, task: &DownloadTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO download_tasks (
                id, manifest_url, title, quality, status,
                total_segments, downloaded_segments, failed_segments,
                file_name, error_message, error_kind, started_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id)
        .bind(&task.manifest_url)
        .bind(&task.title)
        .bind(&task.quality)
        .bind(task.status.to_i32())
        .bind(task.progress.total as i64)
        .bind(task.progress.downloaded as i64)
        .bind(task.progress.failed as i64)
        .bind(&task.file_name)
        .bind(&task.last_error)
        .bind(task.error_kind.map(|k| k.as_str()))
        .bind(task.started_at.timestamp_millis())
        .bind(task.ended_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert task: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Overwrite the mutable fields of a task record
    pub async fn update_task(&self, task: &DownloadTask) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE download_tasks SET
                status = ?,
                total_segments = ?,
                downloaded_segments = ?,
                failed_segments = ?,
                file_name = ?,
                error_message = ?,
                error_kind = ?,
                ended_at = ?
            WHERE id = ?
            "#,
        )
        .bind(task.status.to_i32())
        .bind(task.progress.total as i64)
        .bind(task.progress.downloaded as i64)
        .bind(task.progress.failed as i64)
        .bind(&task.file_name)
        .bind(&task.last_error)
        .bind(task.error_kind.map(|k| k.as_str()))
        .bind(task.ended_at.map(|t| t.timestamp_millis()))
        .bind(task.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update task: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a task record by ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        let row = sqlx::query_as::<_, TaskRecord>(
            r#"
            SELECT
                id, manifest_url, title, quality, status,
                total_segments, downloaded_segments, failed_segments,
                file_name, error_message, error_kind, started_at, ended_at
            FROM download_tasks
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all task records, oldest first
    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query_as::<_, TaskRecord>(
            r#"
            SELECT
                id, manifest_url, title, quality, status,
                total_segments, downloaded_segments, failed_segments,
                file_name, error_message, error_kind, started_at, ended_at
            FROM download_tasks
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list tasks: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Delete a task record (its segments are left to the caller)
    pub async fn delete_task(&self, id: TaskId) -> Result<()> {
        sqlx::query("DELETE FROM download_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete task: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Mark tasks left non-terminal by a previous process as failed
    ///
    /// Returns the IDs that were changed.
    pub async fn fail_interrupted_tasks(&self, message: &str) -> Result<Vec<TaskId>> {
        let ids: Vec<TaskId> = sqlx::query_scalar(
            "SELECT id FROM download_tasks WHERE status NOT IN (?, ?, ?) ORDER BY id",
        )
        .bind(TERMINAL_STATUSES[0])
        .bind(TERMINAL_STATUSES[1])
        .bind(TERMINAL_STATUSES[2])
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find interrupted tasks: {}",
                e
            )))
        })?;

        if ids.is_empty() {
            return Ok(ids);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut query_builder = sqlx::QueryBuilder::new("UPDATE download_tasks SET status = ");
        query_builder.push_bind(Status::Error.to_i32());
        query_builder.push(", error_message = ");
        query_builder.push_bind(message);
        query_builder.push(", error_kind = ");
        query_builder.push_bind(ErrorKind::Interrupted.as_str());
        query_builder.push(", ended_at = ");
        query_builder.push_bind(now);
        query_builder.push(" WHERE id IN (");
        let mut separated = query_builder.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        query_builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark interrupted tasks: {}",
                    e
                )))
            })?;

        Ok(ids)
    }

    /// Delete terminal task records that ended more than `max_age` ago
    ///
    /// Returns the IDs that were removed.
    pub async fn prune_finished_tasks(&self, max_age: Duration) -> Result<Vec<TaskId>> {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = chrono::Utc::now()
            .timestamp_millis()
            .saturating_sub(max_age_ms);

        let ids: Vec<TaskId> = sqlx::query_scalar(
            r#"
            DELETE FROM download_tasks
            WHERE status IN (?, ?, ?) AND ended_at IS NOT NULL AND ended_at < ?
            RETURNING id
            "#,
        )
        .bind(TERMINAL_STATUSES[0])
        .bind(TERMINAL_STATUSES[1])
        .bind(TERMINAL_STATUSES[2])
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to prune finished tasks: {}",
                e
            )))
        })?;

        Ok(ids)
    }
}
