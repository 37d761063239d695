//! Error types for hls-dl
//!
//! This module provides the error handling for the library:
//! - Domain-specific error types (Manifest, Download, Delivery, Database)
//! - A stable [`ErrorKind`] classification recorded on failed tasks
//! - The per-segment [`SegmentFetchError`], which never leaves the segment pool

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for hls-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hls-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrency")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Manifest retrieval or resolution error
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Output delivery error
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new downloads
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Errors raised while turning a manifest URL into a segment list
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Network or HTTP failure while retrieving a manifest
    #[error("failed to fetch manifest {url}: {reason}")]
    FetchFailed {
        /// The manifest URL that could not be retrieved
        url: String,
        /// Transport error or HTTP status description
        reason: String,
    },

    /// The variant selected from a master playlist is itself a master playlist
    #[error("variant playlist {url} is itself a master playlist")]
    UnsupportedNestedMaster {
        /// URL of the nested master playlist
        url: String,
    },

    /// The resolved media playlist contains no segment references
    #[error("no segments found in playlist {url}")]
    NoSegmentsFound {
        /// URL of the playlist that produced no segments
        url: String,
    },
}

/// Download-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Every segment fetch failed
    #[error("no segments downloaded ({failed} of {total} failed)")]
    NoSegmentsDownloaded {
        /// Number of segments in the playlist
        total: u64,
        /// Number of segments that failed
        failed: u64,
    },

    /// Reassembly found nothing in the segment store
    #[error("no stored segments for task {task_id}")]
    NoStoredSegments {
        /// The task whose segments are missing
        task_id: i64,
    },

    /// A stored segment changed size between planning and copying
    #[error("segment {index} of task {task_id} changed size during merge (expected {expected} bytes, found {actual})")]
    SegmentSizeMismatch {
        /// The task being merged
        task_id: i64,
        /// Index of the offending segment
        index: u64,
        /// Size recorded when the merge was planned
        expected: u64,
        /// Size found when the payload was read
        actual: u64,
    },

    /// Task not found in the registry
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: i64,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task ID that is in an invalid state for the operation
        id: i64,
        /// The operation that was attempted (e.g., "cancel", "remove")
        operation: String,
        /// The current state that prevents the operation (e.g., "completed")
        current_state: String,
    },
}

/// Output delivery errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The sink rejected or failed a handoff
    #[error("delivery of {file_name} failed{}: {reason}", chunk_suffix(.chunk_index))]
    Failed {
        /// Target file name
        file_name: String,
        /// Chunk being delivered when the failure happened (None for single-shot)
        chunk_index: Option<usize>,
        /// Underlying sink error
        reason: String,
    },

    /// Output file already exists and the collision policy forbids replacing it
    #[error("file collision at {path}: {reason}")]
    FileCollision {
        /// The conflicting path
        path: PathBuf,
        /// Why the path could not be used
        reason: String,
    },
}

fn chunk_suffix(chunk_index: &Option<usize>) -> String {
    chunk_index
        .map(|i| format!(" at chunk {i}"))
        .unwrap_or_default()
}

/// Stable classification of task failures
///
/// Recorded on a failed task next to the verbatim error message, so listing
/// surfaces can branch on the failure without parsing strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Manifest could not be retrieved
    ManifestFetch,
    /// Selected variant was another master playlist
    UnsupportedNestedMaster,
    /// Playlist resolved to zero segments
    NoSegmentsFound,
    /// Every segment fetch failed
    NoSegmentsDownloaded,
    /// Nothing stored to reassemble
    NoStoredSegments,
    /// Sink failed during handoff
    DeliveryFailed,
    /// Task was interrupted by a process restart
    Interrupted,
    /// Storage layer failure
    Storage,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Stable string form used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ManifestFetch => "manifest_fetch",
            ErrorKind::UnsupportedNestedMaster => "unsupported_nested_master",
            ErrorKind::NoSegmentsFound => "no_segments_found",
            ErrorKind::NoSegmentsDownloaded => "no_segments_downloaded",
            ErrorKind::NoStoredSegments => "no_stored_segments",
            ErrorKind::DeliveryFailed => "delivery_failed",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }

    /// Parse the persisted string form, falling back to `Internal`
    pub fn parse(s: &str) -> Self {
        match s {
            "manifest_fetch" => ErrorKind::ManifestFetch,
            "unsupported_nested_master" => ErrorKind::UnsupportedNestedMaster,
            "no_segments_found" => ErrorKind::NoSegmentsFound,
            "no_segments_downloaded" => ErrorKind::NoSegmentsDownloaded,
            "no_stored_segments" => ErrorKind::NoStoredSegments,
            "delivery_failed" => ErrorKind::DeliveryFailed,
            "interrupted" => ErrorKind::Interrupted,
            "storage" => ErrorKind::Storage,
            _ => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error for the task record
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Manifest(ManifestError::FetchFailed { .. }) => ErrorKind::ManifestFetch,
            Error::Manifest(ManifestError::UnsupportedNestedMaster { .. }) => {
                ErrorKind::UnsupportedNestedMaster
            }
            Error::Manifest(ManifestError::NoSegmentsFound { .. }) => ErrorKind::NoSegmentsFound,
            Error::Download(DownloadError::NoSegmentsDownloaded { .. }) => {
                ErrorKind::NoSegmentsDownloaded
            }
            Error::Download(DownloadError::NoStoredSegments { .. })
            | Error::Download(DownloadError::SegmentSizeMismatch { .. }) => {
                ErrorKind::NoStoredSegments
            }
            Error::Delivery(_) => ErrorKind::DeliveryFailed,
            Error::Database(_) | Error::Sqlx(_) => ErrorKind::Storage,
            _ => ErrorKind::Internal,
        }
    }
}

/// Failure of a single segment attempt
///
/// Swallowed into the failure counter by the segment pool; never propagated
/// to the task.
#[derive(Debug, Error)]
pub enum SegmentFetchError {
    /// Server answered with a non-success status
    #[error("segment {index} returned HTTP {status}")]
    Status {
        /// Segment index
        index: u64,
        /// HTTP status code
        status: u16,
    },

    /// Transport-level failure
    #[error("segment {index} transport error: {source}")]
    Transport {
        /// Segment index
        index: u64,
        /// Underlying fetch error
        source: crate::fetch::FetchError,
    },

    /// Payload fetched but could not be persisted
    #[error("segment {index} could not be stored: {reason}")]
    Store {
        /// Segment index
        index: u64,
        /// Storage error description
        reason: String,
    },
}
