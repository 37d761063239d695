//! Task controller split into focused submodules.
//!
//! The `HlsDownloader` struct and its methods are organized by domain:
//! - [`control`] - Task submission, queries, cancel and removal
//! - [`download_task`] - Per-task pipeline (resolve, download, merge, deliver)
//! - [`lifecycle`] - Startup recovery and shutdown coordination
//! - [`background_tasks`] - Delayed segment cleanup and the periodic sweep
//! - [`registry`] - In-memory task registry

mod background_tasks;
mod control;
mod download_task;
mod lifecycle;
mod registry;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use background_tasks::MaintenanceReport;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::delivery::{DeliverySink, FileSink};
use crate::error::Result;
use crate::fetch::{HttpFetcher, ReqwestFetcher};
use crate::types::{Event, TaskId};

use registry::TaskRegistry;

/// Active task and cleanup bookkeeping
#[derive(Clone)]
pub(crate) struct TaskState {
    /// Cancellation tokens of tasks whose pipeline has not returned yet
    pub(crate) active: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
    /// Delayed segment cleanups that have not run yet
    pub(crate) pending_cleanups: Arc<Mutex<HashMap<TaskId, JoinHandle<()>>>>,
    /// Cleared during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Last issued task ID
    pub(crate) last_id: Arc<AtomicI64>,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct HlsDownloader {
    /// Segment store and task records
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Network fetch capability shared by the resolver and segment workers
    pub(crate) fetcher: Arc<dyn HttpFetcher>,
    /// Destination for finished artifacts
    pub(crate) sink: Arc<dyn DeliverySink>,
    /// Task registry
    pub(crate) registry: TaskRegistry,
    /// Active task and cleanup bookkeeping
    pub(crate) task_state: TaskState,
    /// Stops the periodic sweep
    pub(crate) maintenance_token: CancellationToken,
}

impl HlsDownloader {
    /// Create a new HlsDownloader with the reqwest fetcher and a file sink
    ///
    /// This initializes all core components:
    /// - Opens/creates the SQLite database and runs migrations
    /// - Recovers tasks interrupted by a previous process
    /// - Starts the periodic segment sweep
    pub async fn new(config: Config) -> Result<Self> {
        let fetcher = Arc::new(ReqwestFetcher::new(config.download.request_timeout)?);
        let sink = Arc::new(FileSink::from_config(&config.delivery));
        Self::with_components(config, fetcher, sink).await
    }

    /// Create a new HlsDownloader with injected collaborators
    pub async fn with_components(
        config: Config,
        fetcher: Arc<dyn HttpFetcher>,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;

        let (event_tx, _rx) = tokio::sync::broadcast::channel(config.event_channel_capacity);

        tracing::info!(
            sink = sink.name(),
            concurrency = config.download.concurrency,
            database = %config.persistence.database_path.display(),
            "Downloader initialized"
        );

        let downloader = Self {
            db: Arc::new(db),
            event_tx,
            config: Arc::new(config),
            fetcher,
            sink,
            registry: TaskRegistry::new(),
            task_state: TaskState {
                active: Arc::new(Mutex::new(HashMap::new())),
                pending_cleanups: Arc::new(Mutex::new(HashMap::new())),
                accepting_new: Arc::new(AtomicBool::new(true)),
                last_id: Arc::new(AtomicI64::new(0)),
            },
            maintenance_token: CancellationToken::new(),
        };

        downloader.recover_tasks().await?;
        downloader.start_maintenance();

        Ok(downloader)
    }

    /// Subscribe to task events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than the channel capacity receives
    /// `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hls_dl::{Config, HlsDownloader};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = HlsDownloader::new(Config::default()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "task event");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Issue a task ID from the wall clock, strictly greater than the last one
    pub(crate) fn next_task_id(&self) -> TaskId {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self
            .task_state
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        TaskId(now.max(previous + 1))
    }
}
