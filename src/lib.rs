//! # hls-dl
//!
//! Backend library for downloading HTTP Live Streaming (m3u8) streams.
//!
//! ## Design Philosophy
//!
//! hls-dl is designed to be:
//! - **Memory-bounded** - Segments are staged in SQLite, not held in memory
//! - **Failure-tolerant** - A failed segment is counted and skipped, never fatal on its own
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! A download resolves a master or media playlist to a segment list, fetches
//! the segments through a bounded worker pool into the segment store,
//! concatenates whatever was stored in playlist order and hands the result to
//! a [`DeliverySink`](delivery::DeliverySink).
//!
//! ## Quick Start
//!
//! ```no_run
//! use hls_dl::{Config, DownloadRequest, HlsDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.download.concurrency = 4;
//!     config.delivery.output_dir = "./videos".into();
//!
//!     let downloader = HlsDownloader::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let task = downloader
//!         .run(DownloadRequest::new("https://cdn.example.com/live/master.m3u8"))
//!         .await?;
//!     println!("{} -> {:?}", task.status, task.file_name);
//!
//!     downloader.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Segment store and task records
pub mod db;
/// Output delivery and sinks
pub mod delivery;
/// Task controller (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Network fetch capability
pub mod fetch;
/// m3u8 parsing
pub mod manifest;
/// Reassembly of stored segments
pub mod reassembly;
/// Master to media playlist resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, FileCollisionAction};
pub use db::Database;
pub use delivery::{DeliverySink, FileSink};
pub use downloader::{HlsDownloader, MaintenanceReport};
pub use error::{
    DatabaseError, DeliveryError, DownloadError, Error, ErrorKind, ManifestError, Result,
};
pub use fetch::{HttpFetcher, ReqwestFetcher};
pub use types::{DownloadRequest, DownloadTask, Event, Progress, SegmentDescriptor, Status, TaskId};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use hls_dl::{Config, DownloadRequest, HlsDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = HlsDownloader::new(Config::default()).await?;
///     downloader
///         .download(DownloadRequest::new("https://cdn.example.com/live/master.m3u8"))
///         .await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: HlsDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
