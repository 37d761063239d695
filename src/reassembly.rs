//! Reassembly of stored segments into one artifact
//!
//! Segments are copied in ascending index order. Missing indices (segments
//! that never made it into the store) are skipped without reserving space.
//!
//! Small artifacts are copied in a single pass. Once the total size reaches
//! [`ReassemblyConfig::large_file_threshold`] the copy runs in batches of
//! [`ReassemblyConfig::batch_size`] segments, loading one batch at a time and
//! yielding to the scheduler in between. Both paths produce identical bytes.

use crate::config::ReassemblyConfig;
use crate::db::{Database, SegmentLayout};
use crate::error::{DownloadError, Error, Result};
use crate::types::TaskId;

/// Reassembly progress after a batch was copied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeProgress {
    /// Segments copied so far
    pub merged: u64,
    /// Segments to copy
    pub total: u64,
}

/// Concatenate every stored segment of `task_id`
///
/// `on_batch` is called after each batch is copied.
///
/// # Errors
///
/// Returns [`DownloadError::NoStoredSegments`] when the store holds nothing
/// for the task, and [`DownloadError::SegmentSizeMismatch`] when a payload
/// changes between planning and copying.
pub async fn merge(
    db: &Database,
    task_id: TaskId,
    config: &ReassemblyConfig,
    mut on_batch: impl FnMut(MergeProgress),
) -> Result<Vec<u8>> {
    let layout = db.segment_layout(task_id).await?;
    if layout.is_empty() {
        return Err(DownloadError::NoStoredSegments {
            task_id: task_id.get(),
        }
        .into());
    }

    let plan = plan_offsets(&layout);
    let total_size: u64 = layout.iter().map(|s| s.size_bytes.max(0) as u64).sum();
    let total_len = usize::try_from(total_size).map_err(|_| {
        Error::Other(format!(
            "artifact of {} bytes does not fit in memory",
            total_size
        ))
    })?;

    let batched = total_size >= config.large_file_threshold;
    let batch_len = if batched {
        config.batch_size.max(1)
    } else {
        plan.len()
    };

    tracing::debug!(
        task_id = task_id.get(),
        segments = plan.len(),
        total_size,
        batched,
        batch_len,
        "Planned reassembly"
    );

    let mut output = vec![0u8; total_len];
    let total = plan.len() as u64;
    let mut merged = 0u64;
    let batch_count = plan.len().div_ceil(batch_len);

    for (batch_number, batch) in plan.chunks(batch_len).enumerate() {
        copy_batch(db, task_id, batch, &mut output).await?;

        merged += batch.len() as u64;
        on_batch(MergeProgress { merged, total });

        if batched && batch_number + 1 < batch_count {
            tokio::task::yield_now().await;
        }
    }

    Ok(output)
}

/// Planned placement of one segment in the artifact
#[derive(Clone, Copy, Debug)]
struct Placement {
    index: u64,
    offset: usize,
    len: usize,
}

fn plan_offsets(layout: &[SegmentLayout]) -> Vec<Placement> {
    let mut offset = 0usize;
    layout
        .iter()
        .map(|segment| {
            let len = segment.size_bytes.max(0) as usize;
            let placement = Placement {
                index: segment.segment_index as u64,
                offset,
                len,
            };
            offset += len;
            placement
        })
        .collect()
}

async fn copy_batch(
    db: &Database,
    task_id: TaskId,
    batch: &[Placement],
    output: &mut [u8],
) -> Result<()> {
    let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
        return Ok(());
    };

    let rows = db
        .segments_in_range(task_id, first.index, last.index)
        .await?;
    let mut rows = rows.into_iter().peekable();

    for placement in batch {
        // Rows written after planning are not part of this artifact
        while rows.next_if(|row| row.index() < placement.index).is_some() {}

        let data = match rows.next_if(|row| row.index() == placement.index) {
            Some(row) => row.data,
            None => Vec::new(),
        };

        if data.len() != placement.len {
            return Err(DownloadError::SegmentSizeMismatch {
                task_id: task_id.get(),
                index: placement.index,
                expected: placement.len as u64,
                actual: data.len() as u64,
            }
            .into());
        }

        output[placement.offset..placement.offset + placement.len].copy_from_slice(&data);
    }

    Ok(())
}
