//! In-memory task registry owned by the controller.
//!
//! Holds one [`DownloadTask`] per accepted request. Terminal statuses are
//! written exactly once; later transitions and progress reports for a
//! terminal task are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::ErrorKind;
use crate::types::{DownloadTask, Progress, SegmentDescriptor, Status, TaskId};

/// Shared handle to the task map
#[derive(Clone, Default)]
pub(crate) struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, DownloadTask>>>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, task: DownloadTask) {
        self.tasks.write().insert(task.id, task);
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<DownloadTask> {
        self.tasks.read().get(&id).cloned()
    }

    /// All tasks, ordered by ID
    pub(crate) fn snapshot(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> = self.tasks.read().values().cloned().collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }

    pub(crate) fn remove(&self, id: TaskId) -> Option<DownloadTask> {
        self.tasks.write().remove(&id)
    }

    /// Move a non-terminal task to another non-terminal status
    ///
    /// Returns the updated task, or `None` when the task is missing or
    /// already terminal.
    pub(crate) fn set_status(&self, id: TaskId, status: Status) -> Option<DownloadTask> {
        debug_assert!(!status.is_terminal(), "use finish() for terminal states");
        self.update_active(id, |task| task.status = status)
    }

    /// Record the resolved segment list; the total is fixed from here on
    pub(crate) fn set_segments(
        &self,
        id: TaskId,
        segments: Vec<SegmentDescriptor>,
    ) -> Option<DownloadTask> {
        self.update_active(id, |task| {
            task.progress = Progress {
                downloaded: 0,
                failed: 0,
                total: segments.len() as u64,
            };
            task.segments = segments;
        })
    }

    /// Count one finished segment attempt
    pub(crate) fn record_segment(&self, id: TaskId, success: bool) -> Option<Progress> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id)?;
        if task.status.is_terminal() {
            return None;
        }
        if task.progress.attempted() >= task.progress.total {
            return Some(task.progress);
        }
        if success {
            task.progress.downloaded += 1;
        } else {
            task.progress.failed += 1;
        }
        Some(task.progress)
    }

    pub(crate) fn set_file_name(&self, id: TaskId, file_name: &str) -> Option<DownloadTask> {
        self.update_active(id, |task| task.file_name = Some(file_name.to_string()))
    }

    /// Move a task to a terminal status, once
    ///
    /// Returns the final task only for the call that performed the
    /// transition.
    pub(crate) fn finish(
        &self,
        id: TaskId,
        status: Status,
        error: Option<(String, ErrorKind)>,
    ) -> Option<DownloadTask> {
        debug_assert!(status.is_terminal(), "finish() requires a terminal state");
        self.update_active(id, |task| {
            task.status = status;
            task.ended_at = Some(Utc::now());
            if let Some((message, kind)) = error {
                task.last_error = Some(message);
                task.error_kind = Some(kind);
            }
        })
    }

    fn update_active(
        &self,
        id: TaskId,
        apply: impl FnOnce(&mut DownloadTask),
    ) -> Option<DownloadTask> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id)?;
        if task.status.is_terminal() {
            return None;
        }
        apply(task);
        Some(task.clone())
    }
}
