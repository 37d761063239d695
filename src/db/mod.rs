//! Database layer for hls-dl
//!
//! SQLite persistence for staged segment payloads and task records.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`segments`] - Segment store keyed by (task, index)
//! - [`tasks`] - Task records mirrored from the in-memory registry

use crate::error::ErrorKind;
use crate::types::{DownloadTask, Progress, Status, TaskId};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod segments;
mod tasks;

/// Segment payload read back from the store
#[derive(Debug, Clone, FromRow)]
pub struct StoredSegment {
    /// Position of the segment in its playlist
    pub segment_index: i64,
    /// Segment bytes
    pub data: Vec<u8>,
}

impl StoredSegment {
    /// Index as stored in the playlist
    pub fn index(&self) -> u64 {
        self.segment_index as u64
    }
}

/// Index and size of a stored segment, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct SegmentLayout {
    /// Position of the segment in its playlist
    pub segment_index: i64,
    /// Payload size in bytes
    pub size_bytes: i64,
}

/// Task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRecord {
    /// Task ID
    pub id: TaskId,
    /// Playlist URL
    pub manifest_url: String,
    /// Optional title
    pub title: Option<String>,
    /// Quality label
    pub quality: String,
    /// Status code (see [`Status::to_i32`])
    pub status: i32,
    /// Segments in the resolved playlist
    pub total_segments: i64,
    /// Segments stored successfully
    pub downloaded_segments: i64,
    /// Segments that failed
    pub failed_segments: i64,
    /// Output file name
    pub file_name: Option<String>,
    /// Last error message
    pub error_message: Option<String>,
    /// Last error classification
    pub error_kind: Option<String>,
    /// Unix timestamp in milliseconds
    pub started_at: i64,
    /// Unix timestamp in milliseconds
    pub ended_at: Option<i64>,
}

impl TaskRecord {
    /// Convert to a task snapshot (segment list is not persisted)
    pub fn into_task(self) -> DownloadTask {
        DownloadTask {
            id: self.id,
            manifest_url: self.manifest_url,
            title: self.title,
            quality: self.quality,
            segments: Vec::new(),
            status: Status::from_i32(self.status),
            progress: Progress {
                downloaded: self.downloaded_segments.max(0) as u64,
                total: self.total_segments.max(0) as u64,
                failed: self.failed_segments.max(0) as u64,
            },
            started_at: from_millis(self.started_at),
            ended_at: self.ended_at.map(from_millis),
            file_name: self.file_name,
            last_error: self.error_message,
            error_kind: self.error_kind.as_deref().map(ErrorKind::parse),
        }
    }
}

/// Database handle for hls-dl
pub struct Database {
    pool: SqlitePool,
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests;
