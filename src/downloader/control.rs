//! Task submission, queries and control.

use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, Error, Result};
use crate::types::{DownloadRequest, DownloadTask, Event, Status, TaskId};
use crate::utils::quality_from_url;

use super::HlsDownloader;

impl HlsDownloader {
    /// Start downloading a stream in the background
    ///
    /// Returns as soon as the task is registered; follow it through
    /// [`subscribe`](Self::subscribe) or [`task`](Self::task).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown) began,
    /// or a database error if the task record cannot be written.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use hls_dl::{DownloadRequest, HlsDownloader, Result};
    /// # async fn example(downloader: HlsDownloader) -> Result<()> {
    /// let request = DownloadRequest::new("https://cdn.example.com/master.m3u8")
    ///     .with_title("Launch stream");
    /// let id = downloader.download(request).await?;
    /// println!("started task {id}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn download(&self, request: DownloadRequest) -> Result<TaskId> {
        let (id, cancel_token) = self.accept(request).await?;

        let downloader = self.clone();
        tokio::spawn(async move { downloader.run_task(id, cancel_token).await });

        Ok(id)
    }

    /// Download a stream and wait for the task to reach a terminal status
    ///
    /// Pipeline failures do not make this return `Err`; they are recorded on
    /// the returned task (`status`, `last_error`, `error_kind`).
    pub async fn run(&self, request: DownloadRequest) -> Result<DownloadTask> {
        let (id, cancel_token) = self.accept(request).await?;

        self.run_task(id, cancel_token).await;

        self.registry
            .get(id)
            .ok_or_else(|| Error::Download(DownloadError::NotFound { id: id.get() }))
    }

    /// Register a new pending task
    async fn accept(&self, request: DownloadRequest) -> Result<(TaskId, CancellationToken)> {
        if !self.task_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let id = self.next_task_id();
        let quality = request
            .quality
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| quality_from_url(&request.manifest_url).to_string());

        let task = DownloadTask::new(id, request.manifest_url, request.title, quality);
        self.db.insert_task(&task).await?;

        let cancel_token = CancellationToken::new();
        self.task_state
            .active
            .lock()
            .insert(id, cancel_token.clone());
        self.registry.insert(task.clone());

        tracing::info!(
            task_id = id.get(),
            manifest_url = %task.manifest_url,
            quality = %task.quality,
            "Task queued"
        );
        self.emit_event(Event::Queued {
            id,
            manifest_url: task.manifest_url,
        });

        Ok((id, cancel_token))
    }

    /// Snapshot of every known task, ordered by ID
    pub fn tasks(&self) -> Vec<DownloadTask> {
        self.registry.snapshot()
    }

    /// Snapshot of one task
    pub fn task(&self, id: TaskId) -> Option<DownloadTask> {
        self.registry.get(id)
    }

    /// Cancel a task
    ///
    /// The task is marked cancelled immediately. Its workers stop claiming
    /// segments; fetches already in flight finish and are stored, and the
    /// stored segments are cleaned up after the usual grace window.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::NotFound`] for an unknown ID
    /// - [`DownloadError::InvalidState`] when the task already finished
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let task = self
            .registry
            .get(id)
            .ok_or(Error::Download(DownloadError::NotFound { id: id.get() }))?;

        if task.status.is_terminal() {
            return Err(invalid_state(id, "cancel", task.status));
        }

        if let Some(token) = self.task_state.active.lock().get(&id) {
            token.cancel();
        }

        match self.registry.finish(id, Status::Cancelled, None) {
            Some(task) => {
                tracing::info!(task_id = id.get(), "Task cancelled");
                self.persist_task(&task).await;
                self.emit_event(Event::Cancelled { id });
                Ok(())
            }
            // Finished between the check and the cancel
            None => {
                let status = self
                    .registry
                    .get(id)
                    .map(|task| task.status)
                    .unwrap_or(Status::Completed);
                Err(invalid_state(id, "cancel", status))
            }
        }
    }

    /// Forget a finished task, its record and any segments it still holds
    ///
    /// # Errors
    ///
    /// - [`DownloadError::NotFound`] for an unknown ID
    /// - [`DownloadError::InvalidState`] while the task is still running
    pub async fn remove_task(&self, id: TaskId) -> Result<()> {
        let task = self
            .registry
            .get(id)
            .ok_or(Error::Download(DownloadError::NotFound { id: id.get() }))?;

        if !task.status.is_terminal() {
            return Err(invalid_state(id, "remove", task.status));
        }

        self.registry.remove(id);
        self.purge_segments(id).await;
        self.db.delete_task(id).await?;

        tracing::debug!(task_id = id.get(), "Task removed");
        Ok(())
    }
}

fn invalid_state(id: TaskId, operation: &str, status: Status) -> Error {
    Error::Download(DownloadError::InvalidState {
        id: id.get(),
        operation: operation.to_string(),
        current_state: status.to_string(),
    })
}
