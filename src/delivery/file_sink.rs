//! Filesystem delivery sink.

use crate::config::{DeliveryConfig, FileCollisionAction};
use crate::error::{Error, Result};
use crate::types::TaskId;
use crate::utils::get_unique_path;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{ChunkAnnouncement, ChunkPayload, DeliverySink};

/// Writes artifacts into a directory
///
/// Data lands in `<name>.part` first and is renamed into place once complete,
/// so a visible output file is always whole. Chunked deliveries are finalized
/// only when the last chunk arrives and the chunk count matches the
/// announcement; anything else discards the partial file.
pub struct FileSink {
    output_dir: PathBuf,
    collision: FileCollisionAction,
    pending: tokio::sync::Mutex<HashMap<TaskId, PartialFile>>,
}

struct PartialFile {
    file_name: String,
    part_path: PathBuf,
    file: tokio::fs::File,
    expected_chunks: usize,
    next_index: usize,
}

impl FileSink {
    /// Create a sink writing into `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>, collision: FileCollisionAction) -> Self {
        Self {
            output_dir: output_dir.into(),
            collision,
            pending: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Create a sink from the delivery settings
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(config.output_dir.clone(), config.file_collision)
    }

    /// Directory artifacts are written into
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn ensure_output_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create output directory '{}': {}",
                        self.output_dir.display(),
                        e
                    ),
                ))
            })
    }

    fn part_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.part", file_name))
    }

    /// Move a finished `.part` file to its final, collision-free name
    async fn finalize(&self, part_path: &Path, file_name: &str) -> Result<PathBuf> {
        let target = match get_unique_path(&self.output_dir.join(file_name), self.collision) {
            Ok(target) => target,
            Err(e) => {
                remove_part(part_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(part_path, &target).await {
            remove_part(part_path).await;
            return Err(Error::Io(e));
        }

        tracing::info!(path = %target.display(), "Artifact written");
        Ok(target)
    }
}

#[async_trait]
impl DeliverySink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn save_file(&self, file_name: &str, data: &[u8]) -> Result<()> {
        self.ensure_output_dir().await?;

        let part_path = self.part_path(file_name);
        if let Err(e) = tokio::fs::write(&part_path, data).await {
            remove_part(&part_path).await;
            return Err(Error::Io(e));
        }

        self.finalize(&part_path, file_name).await?;
        Ok(())
    }

    async fn prepare(&self, announcement: &ChunkAnnouncement) -> Result<()> {
        self.ensure_output_dir().await?;

        let part_path = self.part_path(&announcement.file_name);
        let file = tokio::fs::File::create(&part_path).await?;

        let mut pending = self.pending.lock().await;
        if let Some(stale) = pending.insert(
            announcement.task_id,
            PartialFile {
                file_name: announcement.file_name.clone(),
                part_path,
                file,
                expected_chunks: announcement.total_chunks,
                next_index: 0,
            },
        ) {
            tracing::warn!(
                task_id = announcement.task_id.get(),
                file_name = %stale.file_name,
                "Replacing unfinished chunked delivery"
            );
            drop(stale.file);
            if stale.part_path != self.part_path(&announcement.file_name) {
                remove_part(&stale.part_path).await;
            }
        }

        Ok(())
    }

    async fn save_chunk(&self, chunk: ChunkPayload<'_>) -> Result<()> {
        let mut pending = self.pending.lock().await;

        let Some(partial) = pending.get_mut(&chunk.task_id) else {
            return Err(Error::Other(format!(
                "chunk {} for task {} arrived without an announcement",
                chunk.chunk_index, chunk.task_id
            )));
        };

        if chunk.chunk_index != partial.next_index || chunk.chunk_index >= partial.expected_chunks
        {
            let reason = format!(
                "expected chunk {} of {}, received chunk {}",
                partial.next_index, partial.expected_chunks, chunk.chunk_index
            );
            if let Some(partial) = pending.remove(&chunk.task_id) {
                discard(partial).await;
            }
            return Err(Error::Other(reason));
        }

        if let Err(e) = partial.file.write_all(chunk.data).await {
            if let Some(partial) = pending.remove(&chunk.task_id) {
                discard(partial).await;
            }
            return Err(Error::Io(e));
        }
        partial.next_index += 1;

        if !chunk.is_last {
            return Ok(());
        }

        let Some(mut partial) = pending.remove(&chunk.task_id) else {
            return Ok(());
        };
        drop(pending);

        if partial.next_index != partial.expected_chunks {
            let reason = format!(
                "last chunk arrived after {} of {} chunks",
                partial.next_index, partial.expected_chunks
            );
            discard(partial).await;
            return Err(Error::Other(reason));
        }

        if let Err(e) = partial.file.flush().await {
            discard(partial).await;
            return Err(Error::Io(e));
        }

        let PartialFile {
            file_name,
            part_path,
            file,
            ..
        } = partial;
        drop(file);

        self.finalize(&part_path, &file_name).await?;
        Ok(())
    }
}

async fn discard(partial: PartialFile) {
    tracing::warn!(file_name = %partial.file_name, "Discarding partial delivery");
    drop(partial.file);
    remove_part(&partial.part_path).await;
}

async fn remove_part(part_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(part_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %part_path.display(), error = %e, "Failed to remove partial file");
    }
}
