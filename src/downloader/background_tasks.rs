//! Background maintenance: delayed segment cleanup and the periodic sweep.

use std::time::Duration;

use crate::error::Result;
use crate::types::{Event, TaskId};

use super::HlsDownloader;

/// What one maintenance pass removed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Segment rows older than the maximum age
    pub segments_removed: u64,
    /// Finished task records older than the retention window
    pub tasks_pruned: Vec<TaskId>,
}

impl HlsDownloader {
    /// Delete a task's segments after `delay`
    ///
    /// Replaces any cleanup already scheduled for the task.
    pub(crate) fn schedule_cleanup(&self, id: TaskId, delay: Duration) {
        let downloader = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            downloader.task_state.pending_cleanups.lock().remove(&id);
            downloader.delete_segments(id).await;
        });

        if let Some(previous) = self.task_state.pending_cleanups.lock().insert(id, handle) {
            previous.abort();
        }

        tracing::debug!(
            task_id = id.get(),
            delay_secs = delay.as_secs_f64(),
            "Segment cleanup scheduled"
        );
    }

    /// Delete a task's segments now, dropping any scheduled cleanup
    pub(crate) async fn purge_segments(&self, id: TaskId) {
        if let Some(handle) = self.task_state.pending_cleanups.lock().remove(&id) {
            handle.abort();
        }
        self.delete_segments(id).await;
    }

    /// Run every scheduled cleanup immediately
    pub(crate) async fn flush_pending_cleanups(&self) {
        let pending: Vec<(TaskId, tokio::task::JoinHandle<()>)> =
            self.task_state.pending_cleanups.lock().drain().collect();

        for (id, handle) in pending {
            handle.abort();
            self.delete_segments(id).await;
        }
    }

    async fn delete_segments(&self, id: TaskId) {
        match self.db.delete_task_segments(id).await {
            Ok(removed) => {
                tracing::debug!(task_id = id.get(), removed, "Segments deleted");
            }
            Err(e) => {
                tracing::warn!(task_id = id.get(), error = %e, "Failed to delete segments");
            }
        }
    }

    /// Sweep stale segments and prune old finished tasks
    ///
    /// Runs automatically on `persistence.sweep_interval`; callers may also
    /// trigger a pass directly.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let persistence = &self.config.persistence;

        let segments_removed = self
            .db
            .sweep_segments_older_than(persistence.segment_max_age)
            .await?;
        let tasks_pruned = self
            .db
            .prune_finished_tasks(persistence.task_retention)
            .await?;

        for id in &tasks_pruned {
            self.registry.remove(*id);
        }

        if segments_removed > 0 {
            self.emit_event(Event::SegmentsSwept {
                count: segments_removed,
            });
        }

        if segments_removed > 0 || !tasks_pruned.is_empty() {
            tracing::info!(
                segments_removed,
                tasks_pruned = tasks_pruned.len(),
                "Maintenance pass removed stale data"
            );
        }

        Ok(MaintenanceReport {
            segments_removed,
            tasks_pruned,
        })
    }

    /// Spawn the periodic sweep
    ///
    /// The first pass runs after `sweep_startup_delay`, then every
    /// `sweep_interval` until shutdown.
    pub(crate) fn start_maintenance(&self) {
        let downloader = self.clone();
        let token = self.maintenance_token.clone();
        let startup_delay = self.config.persistence.sweep_startup_delay;
        let interval = self.config.persistence.sweep_interval;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(startup_delay) => {}
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = downloader.run_maintenance().await {
                            tracing::warn!(error = %e, "Maintenance pass failed");
                        }
                    }
                }
            }

            tracing::debug!("Maintenance task stopped");
        });
    }
}
