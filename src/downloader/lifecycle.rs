//! Startup recovery and shutdown coordination.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::types::Event;

use super::HlsDownloader;

/// Message recorded on tasks a previous process left unfinished
const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

impl HlsDownloader {
    /// Load persisted tasks into the registry
    ///
    /// Tasks persisted in a non-terminal status cannot be resumed (their
    /// pipeline died with the previous process), so they are marked failed
    /// and their segments purged.
    pub(crate) async fn recover_tasks(&self) -> Result<()> {
        let interrupted = self.db.fail_interrupted_tasks(INTERRUPTED_MESSAGE).await?;
        for id in &interrupted {
            if let Err(e) = self.db.delete_task_segments(*id).await {
                tracing::warn!(task_id = id.get(), error = %e, "Failed to purge segments of interrupted task");
            }
        }

        let records = self.db.list_tasks().await?;
        let restored = records.len();
        let mut max_id = 0;
        for record in records {
            let task = record.into_task();
            max_id = max_id.max(task.id.get());
            self.registry.insert(task);
        }
        self.task_state.last_id.fetch_max(max_id, Ordering::SeqCst);

        if restored > 0 {
            tracing::info!(
                restored,
                interrupted = interrupted.len(),
                "Restored task records from database"
            );
        }

        Ok(())
    }

    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new requests
    /// 2. Cancels all active tasks (in-flight segment fetches finish)
    /// 3. Waits for their pipelines to return, up to `shutdown_timeout`
    /// 4. Runs scheduled segment cleanups immediately
    /// 5. Stops the periodic sweep and emits [`Event::Shutdown`]
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new tasks
        self.task_state.accepting_new.store(false, Ordering::SeqCst);

        // 2. Cancel active tasks
        self.cancel_all_active();

        // 3. Wait for pipelines to return
        let wait_result = tokio::time::timeout(
            self.config.shutdown_timeout,
            self.wait_for_active_tasks(),
        )
        .await;

        match wait_result {
            Ok(()) => tracing::info!("All active tasks stopped"),
            Err(_) => tracing::warn!(
                remaining = self.task_state.active.lock().len(),
                "Timeout waiting for tasks to stop, proceeding with shutdown"
            ),
        }

        // 4. Cleanups would otherwise die with the runtime
        self.flush_pending_cleanups().await;

        // 5. Stop maintenance and notify subscribers
        self.maintenance_token.cancel();
        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    fn cancel_all_active(&self) {
        let active = self.task_state.active.lock();
        tracing::debug!(active_count = active.len(), "Cancelling active tasks");
        for (id, token) in active.iter() {
            tracing::debug!(task_id = id.get(), "Signaling cancellation");
            token.cancel();
        }
    }

    async fn wait_for_active_tasks(&self) {
        loop {
            let active_count = self.task_state.active.lock().len();
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for active tasks to stop");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
