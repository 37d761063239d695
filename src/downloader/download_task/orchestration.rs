//! Download task orchestration: top-level lifecycle for a single task.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::delivery::DeliveryReport;
use crate::error::{DownloadError, Result};
use crate::resolver::PlaylistResolver;
use crate::types::{DownloadTask, Event, SegmentDescriptor, Status, TaskId};

use super::super::HlsDownloader;
use super::segment_pool::{PoolOutcome, SegmentPoolParams, run_segment_pool};

/// How the pipeline of a task ended, when it did not fail
pub(crate) enum PipelineOutcome {
    Completed(DeliveryReport),
    Cancelled,
}

impl HlsDownloader {
    /// Drive one task to a terminal status
    ///
    /// Phases:
    /// 1. Resolve the playlist to a segment list
    /// 2. Download segments through the bounded pool
    /// 3. Merge stored segments
    /// 4. Deliver the artifact and record completion
    ///
    /// Cancellation is checked between phases and by the pool before each claim.
    pub(crate) async fn run_task(&self, id: TaskId, cancel_token: CancellationToken) {
        match self.execute_pipeline(id, &cancel_token).await {
            Ok(PipelineOutcome::Completed(report)) => self.complete_task(id, report).await,
            Ok(PipelineOutcome::Cancelled) => self.finish_cancelled(id).await,
            Err(e) => self.fail_task(id, &e).await,
        }

        self.task_state.active.lock().remove(&id);
    }

    async fn execute_pipeline(
        &self,
        id: TaskId,
        cancel_token: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        // Phase 1: resolve
        let Some(task) = self.transition(id, Status::Parsing).await else {
            return Ok(PipelineOutcome::Cancelled);
        };

        let resolver = PlaylistResolver::new(
            Arc::clone(&self.fetcher),
            self.config.download.user_agent.clone(),
        );
        let segments = resolver.resolve(&task.manifest_url).await?;

        if cancel_token.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled);
        }

        // Phase 2: download
        let total = segments.len() as u64;
        if self.registry.set_segments(id, segments.clone()).is_none()
            || self.transition(id, Status::Downloading).await.is_none()
        {
            return Ok(PipelineOutcome::Cancelled);
        }

        tracing::info!(task_id = id.get(), segments = total, "Downloading segments");

        let outcome = self
            .download_segments(id, segments, cancel_token.clone())
            .await;

        if cancel_token.is_cancelled() {
            tracing::info!(
                task_id = id.get(),
                downloaded = outcome.downloaded,
                unclaimed = outcome.unclaimed,
                "Segment download stopped by cancellation"
            );
            return Ok(PipelineOutcome::Cancelled);
        }

        if outcome.downloaded == 0 {
            return Err(DownloadError::NoSegmentsDownloaded {
                total,
                failed: outcome.failed,
            }
            .into());
        }

        if outcome.failed > 0 {
            tracing::warn!(
                task_id = id.get(),
                downloaded = outcome.downloaded,
                failed = outcome.failed,
                first_error = outcome.first_error.as_deref().unwrap_or(""),
                "Continuing with partial segment set"
            );
        }

        // Phase 3: merge
        if self.transition(id, Status::Merging).await.is_none() {
            return Ok(PipelineOutcome::Cancelled);
        }
        let artifact = self.merge_segments(id).await?;

        if cancel_token.is_cancelled() {
            return Ok(PipelineOutcome::Cancelled);
        }

        // Phase 4: deliver
        let Some(task) = self.transition(id, Status::Saving).await else {
            return Ok(PipelineOutcome::Cancelled);
        };
        let report = self.deliver_artifact(&task, &artifact).await?;

        Ok(PipelineOutcome::Completed(report))
    }

    async fn download_segments(
        &self,
        id: TaskId,
        segments: Vec<SegmentDescriptor>,
        cancel_token: CancellationToken,
    ) -> PoolOutcome {
        let downloader = self.clone();
        let on_segment = Arc::new(move |segment_index: u64, success: bool| {
            if let Some(progress) = downloader.registry.record_segment(id, success) {
                downloader.emit_event(Event::Progress {
                    id,
                    segment_index,
                    success,
                    progress,
                });
            }
        });

        run_segment_pool(SegmentPoolParams {
            task_id: id,
            segments,
            concurrency: self.config.download.concurrency,
            fetcher: Arc::clone(&self.fetcher),
            db: Arc::clone(&self.db),
            user_agent: self.config.download.user_agent.clone(),
            retry: self.config.download.segment_retry.clone(),
            cancel_token,
            on_segment,
        })
        .await
    }

    /// Move a task to a non-terminal status, persist it and notify subscribers
    ///
    /// Returns `None` when the task already reached a terminal status.
    pub(crate) async fn transition(&self, id: TaskId, status: Status) -> Option<DownloadTask> {
        let task = self.registry.set_status(id, status)?;

        tracing::info!(task_id = id.get(), status = %status, "Task status changed");
        self.persist_task(&task).await;
        self.emit_event(Event::StatusChanged { id, status });

        Some(task)
    }

    /// Mirror a task snapshot to the database
    ///
    /// Failures are logged; the in-memory registry stays authoritative.
    pub(crate) async fn persist_task(&self, task: &DownloadTask) {
        if let Err(e) = self.db.update_task(task).await {
            tracing::warn!(task_id = task.id.get(), error = %e, "Failed to persist task record");
        }
    }
}
