//! Output delivery
//!
//! Hands a finished artifact to a [`DeliverySink`]. Artifacts smaller than
//! [`DeliveryConfig::single_shot_limit`] go out in one call; larger ones are
//! announced and then streamed as fixed-size chunks in index order, with a
//! short pause every few chunks.
//!
//! Any sink failure aborts the delivery with [`DeliveryError::Failed`].
//! Discarding partially received chunks is the sink's job.

mod file_sink;

pub use file_sink::FileSink;

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, Result};
use crate::types::TaskId;
use async_trait::async_trait;
use std::time::Duration;

/// Announcement sent before the first chunk of a chunked delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkAnnouncement {
    /// Task the artifact belongs to
    pub task_id: TaskId,
    /// Suggested file name
    pub file_name: String,
    /// Artifact size in bytes
    pub total_size: u64,
    /// Number of chunks that will follow
    pub total_chunks: usize,
    /// Size of every chunk except possibly the last
    pub chunk_size: usize,
}

/// One chunk of a chunked delivery
#[derive(Clone, Copy, Debug)]
pub struct ChunkPayload<'a> {
    /// Task the artifact belongs to
    pub task_id: TaskId,
    /// 0-based chunk position
    pub chunk_index: usize,
    /// Chunk bytes
    pub data: &'a [u8],
    /// Set on the final chunk only
    pub is_last: bool,
}

/// Destination for finished artifacts
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Receive a complete artifact in one call
    async fn save_file(&self, file_name: &str, data: &[u8]) -> Result<()>;

    /// Prepare for a chunked delivery
    async fn prepare(&self, announcement: &ChunkAnnouncement) -> Result<()>;

    /// Receive one chunk; chunks arrive strictly in index order
    async fn save_chunk(&self, chunk: ChunkPayload<'_>) -> Result<()>;
}

/// Outcome of a successful delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReport {
    /// File name handed to the sink
    pub file_name: String,
    /// Artifact size in bytes
    pub size_bytes: u64,
    /// Handoffs performed (1 for single-shot)
    pub chunks: usize,
    /// Whether the chunked path was used
    pub chunked: bool,
}

/// Deliver `artifact` to `sink` under `file_name`
///
/// `on_handoff(sent, total)` is called after every acknowledged handoff.
pub async fn deliver(
    sink: &dyn DeliverySink,
    task_id: TaskId,
    artifact: &[u8],
    file_name: &str,
    config: &DeliveryConfig,
    mut on_handoff: impl FnMut(usize, usize),
) -> Result<DeliveryReport> {
    let size_bytes = artifact.len() as u64;

    if size_bytes < config.single_shot_limit || artifact.is_empty() {
        tracing::debug!(
            task_id = task_id.get(),
            sink = sink.name(),
            file_name,
            size_bytes,
            "Delivering artifact in one call"
        );

        sink.save_file(file_name, artifact)
            .await
            .map_err(|e| failed(file_name, None, e))?;
        on_handoff(1, 1);

        return Ok(DeliveryReport {
            file_name: file_name.to_string(),
            size_bytes,
            chunks: 1,
            chunked: false,
        });
    }

    let chunk_size = config.chunk_size.max(1);
    let total_chunks = artifact.len().div_ceil(chunk_size);

    tracing::debug!(
        task_id = task_id.get(),
        sink = sink.name(),
        file_name,
        size_bytes,
        total_chunks,
        chunk_size,
        "Delivering artifact in chunks"
    );

    let announcement = ChunkAnnouncement {
        task_id,
        file_name: file_name.to_string(),
        total_size: size_bytes,
        total_chunks,
        chunk_size,
    };
    sink.prepare(&announcement)
        .await
        .map_err(|e| failed(file_name, None, e))?;

    let pause = Duration::from_millis(config.throttle_pause_ms);

    for (chunk_index, data) in artifact.chunks(chunk_size).enumerate() {
        let sent = chunk_index + 1;
        let chunk = ChunkPayload {
            task_id,
            chunk_index,
            data,
            is_last: sent == total_chunks,
        };

        sink.save_chunk(chunk)
            .await
            .map_err(|e| failed(file_name, Some(chunk_index), e))?;
        on_handoff(sent, total_chunks);

        if config.throttle_every > 0 && sent % config.throttle_every == 0 && sent < total_chunks {
            tokio::time::sleep(pause).await;
        }
    }

    Ok(DeliveryReport {
        file_name: file_name.to_string(),
        size_bytes,
        chunks: total_chunks,
        chunked: true,
    })
}

fn failed(file_name: &str, chunk_index: Option<usize>, source: crate::Error) -> crate::Error {
    DeliveryError::Failed {
        file_name: file_name.to_string(),
        chunk_index,
        reason: source.to_string(),
    }
    .into()
}
