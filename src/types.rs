//! Core types for hls-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Unique identifier for a download task
///
/// Issued from the wall clock in milliseconds and bumped when two tasks
/// would otherwise share a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Task status
///
/// `pending → parsing → downloading → merging → saving → completed`, with
/// `error` and `cancelled` reachable from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Accepted, not started
    Pending,
    /// Fetching and resolving the playlist
    Parsing,
    /// Segment workers running
    Downloading,
    /// Reassembling stored segments
    Merging,
    /// Handing the artifact to the sink
    Saving,
    /// Delivered successfully
    Completed,
    /// Failed with error
    Error,
    /// Cancelled by the caller
    Cancelled,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Pending,
            1 => Status::Parsing,
            2 => Status::Downloading,
            3 => Status::Merging,
            4 => Status::Saving,
            5 => Status::Completed,
            6 => Status::Error,
            7 => Status::Cancelled,
            _ => Status::Error,
        }
    }

    /// Convert Status enum to integer status code
    pub const fn to_i32(&self) -> i32 {
        match self {
            Status::Pending => 0,
            Status::Parsing => 1,
            Status::Downloading => 2,
            Status::Merging => 3,
            Status::Saving => 4,
            Status::Completed => 5,
            Status::Error => 6,
            Status::Cancelled => 7,
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Error | Status::Cancelled)
    }

    /// Whether the task may currently own segments in the store
    pub fn holds_segments(&self) -> bool {
        matches!(self, Status::Downloading | Status::Merging | Status::Saving)
    }

    /// Lowercase name, as shown to listing surfaces
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Parsing => "parsing",
            Status::Downloading => "downloading",
            Status::Merging => "merging",
            Status::Saving => "saving",
            Status::Completed => "completed",
            Status::Error => "error",
            Status::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Segment counters for a task
///
/// `downloaded + failed <= total` holds for every value the registry stores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Segments fetched and persisted
    pub downloaded: u64,
    /// Segments in the resolved playlist
    pub total: u64,
    /// Segments whose attempts all failed
    pub failed: u64,
}

impl Progress {
    /// Segments that have reached an outcome
    pub fn attempted(&self) -> u64 {
        self.downloaded + self.failed
    }

    /// Percentage of segments with an outcome (0.0 when total is unknown)
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.attempted() as f64 / self.total as f64 * 100.0) as f32
        }
    }
}

/// One media segment reference from a playlist
///
/// `index` equals declaration order in the playlist and the segment's
/// position in the reassembled artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    /// 0-based position in the playlist
    pub index: u64,
    /// Absolute segment URL
    pub url: String,
    /// Duration in seconds, when the playlist declared one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// A request to download one stream
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Master or media playlist URL
    pub manifest_url: String,
    /// Human-readable title used for the output file name
    #[serde(default)]
    pub title: Option<String>,
    /// Quality label (e.g. "1080p"); guessed from the URL when absent
    #[serde(default)]
    pub quality: Option<String>,
}

impl DownloadRequest {
    /// Request for a playlist URL with no title or quality label
    pub fn new(manifest_url: impl Into<String>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            title: None,
            quality: None,
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the quality label
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }
}

/// Snapshot of a download task
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Task ID
    pub id: TaskId,
    /// Playlist URL the task was created for
    pub manifest_url: String,
    /// Title, if one was supplied
    pub title: Option<String>,
    /// Quality label
    pub quality: String,
    /// Resolved segments (empty until parsing finishes)
    #[serde(default)]
    pub segments: Vec<SegmentDescriptor>,
    /// Current status
    pub status: Status,
    /// Segment counters
    pub progress: Progress,
    /// When the task was accepted
    pub started_at: DateTime<Utc>,
    /// When the task reached a terminal status
    pub ended_at: Option<DateTime<Utc>>,
    /// Output file name, once known
    pub file_name: Option<String>,
    /// Message of the error that ended the task
    pub last_error: Option<String>,
    /// Classification of `last_error`
    pub error_kind: Option<ErrorKind>,
}

impl DownloadTask {
    /// Fresh pending task
    pub fn new(id: TaskId, manifest_url: String, title: Option<String>, quality: String) -> Self {
        Self {
            id,
            manifest_url,
            title,
            quality,
            segments: Vec::new(),
            status: Status::Pending,
            progress: Progress::default(),
            started_at: Utc::now(),
            ended_at: None,
            file_name: None,
            last_error: None,
            error_kind: None,
        }
    }
}

/// Event emitted during the task lifecycle
///
/// Delivered over a broadcast channel on a best-effort basis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task accepted
    Queued {
        /// Task ID
        id: TaskId,
        /// Playlist URL
        manifest_url: String,
    },

    /// Task moved to a new non-terminal status
    StatusChanged {
        /// Task ID
        id: TaskId,
        /// New status
        status: Status,
    },

    /// A segment attempt finished
    Progress {
        /// Task ID
        id: TaskId,
        /// Index of the segment that just finished
        segment_index: u64,
        /// Whether that attempt succeeded
        success: bool,
        /// Cumulative counters
        progress: Progress,
    },

    /// A reassembly batch was copied
    Merging {
        /// Task ID
        id: TaskId,
        /// Segments copied so far
        merged: u64,
        /// Segments to copy
        total: u64,
    },

    /// A delivery handoff was acknowledged
    Delivering {
        /// Task ID
        id: TaskId,
        /// Chunks acknowledged so far (1 for single-shot)
        chunks_sent: usize,
        /// Total chunks (1 for single-shot)
        total_chunks: usize,
    },

    /// Task delivered its artifact
    Completed {
        /// Task ID
        id: TaskId,
        /// File name handed to the sink
        file_name: String,
        /// Artifact size in bytes
        size_bytes: u64,
        /// Final counters
        progress: Progress,
    },

    /// Task failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Failure classification
        kind: ErrorKind,
        /// Error message
        error: String,
    },

    /// Task cancelled by the caller
    Cancelled {
        /// Task ID
        id: TaskId,
    },

    /// Background sweep removed stale segments
    SegmentsSwept {
        /// Number of segment rows deleted
        count: u64,
    },

    /// Downloader is shutting down
    Shutdown,
}
