//! Merge, delivery and terminal transitions.

use crate::delivery::{self, DeliveryReport};
use crate::error::{Error, Result};
use crate::reassembly;
use crate::types::{DownloadTask, Event, Status, TaskId};
use crate::utils::generate_file_name;

use super::super::HlsDownloader;

impl HlsDownloader {
    pub(super) async fn merge_segments(&self, id: TaskId) -> Result<Vec<u8>> {
        let artifact = reassembly::merge(&self.db, id, &self.config.reassembly, |progress| {
            self.emit_event(Event::Merging {
                id,
                merged: progress.merged,
                total: progress.total,
            });
        })
        .await?;

        tracing::info!(
            task_id = id.get(),
            size_bytes = artifact.len(),
            "Segments merged"
        );
        Ok(artifact)
    }

    pub(super) async fn deliver_artifact(
        &self,
        task: &DownloadTask,
        artifact: &[u8],
    ) -> Result<DeliveryReport> {
        let id = task.id;
        let file_name =
            generate_file_name(task.title.as_deref(), &task.quality, chrono::Utc::now());
        if let Some(task) = self.registry.set_file_name(id, &file_name) {
            self.persist_task(&task).await;
        }

        delivery::deliver(
            self.sink.as_ref(),
            id,
            artifact,
            &file_name,
            &self.config.delivery,
            |chunks_sent, total_chunks| {
                self.emit_event(Event::Delivering {
                    id,
                    chunks_sent,
                    total_chunks,
                });
            },
        )
        .await
    }

    /// Record completion and schedule the delayed segment cleanup
    pub(super) async fn complete_task(&self, id: TaskId, report: DeliveryReport) {
        if let Some(task) = self.registry.finish(id, Status::Completed, None) {
            self.persist_task(&task).await;

            tracing::info!(
                task_id = id.get(),
                file_name = %report.file_name,
                size_bytes = report.size_bytes,
                downloaded = task.progress.downloaded,
                failed = task.progress.failed,
                chunked = report.chunked,
                "Task completed"
            );

            self.emit_event(Event::Completed {
                id,
                file_name: report.file_name,
                size_bytes: report.size_bytes,
                progress: task.progress,
            });
        }

        self.schedule_cleanup(id, self.config.persistence.completed_cleanup_delay);
    }

    /// Record a fatal error and purge the task's segments immediately
    pub(super) async fn fail_task(&self, id: TaskId, error: &Error) {
        let kind = error.kind();
        let message = error.to_string();

        tracing::error!(task_id = id.get(), error = %message, kind = %kind, "Task failed");

        if let Some(task) = self
            .registry
            .finish(id, Status::Error, Some((message.clone(), kind)))
        {
            self.persist_task(&task).await;
            self.emit_event(Event::Failed {
                id,
                kind,
                error: message,
            });
        }

        self.purge_segments(id).await;
    }

    /// Record cancellation (unless `cancel` already did) and schedule cleanup
    ///
    /// Segments stored before the cancel stay until the cleanup runs.
    pub(super) async fn finish_cancelled(&self, id: TaskId) {
        if let Some(task) = self.registry.finish(id, Status::Cancelled, None) {
            tracing::info!(task_id = id.get(), "Task cancelled");
            self.persist_task(&task).await;
            self.emit_event(Event::Cancelled { id });
        }

        self.schedule_cleanup(id, self.config.persistence.completed_cleanup_delay);
    }
}
