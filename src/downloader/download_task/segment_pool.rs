//! Bounded segment downloader: a fixed pool of workers draining one FIFO queue.
//!
//! Every worker claims the front descriptor under a lock, so no two workers
//! ever fetch the same segment. A failed segment is counted and the worker
//! moves on; it never stops the pool. Cancellation is observed before each
//! claim, so a fetch already in flight finishes (and is stored) normally.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::db::Database;
use crate::error::SegmentFetchError;
use crate::fetch::{HttpFetcher, RequestKind, request_headers};
use crate::retry::download_with_retry;
use crate::types::{SegmentDescriptor, TaskId};

/// Called after every finished segment: `(segment_index, success)`
pub(crate) type SegmentCallback = Arc<dyn Fn(u64, bool) + Send + Sync>;

/// Parameters for one pool run
pub(crate) struct SegmentPoolParams {
    pub(crate) task_id: TaskId,
    pub(crate) segments: Vec<SegmentDescriptor>,
    pub(crate) concurrency: usize,
    pub(crate) fetcher: Arc<dyn HttpFetcher>,
    pub(crate) db: Arc<Database>,
    pub(crate) user_agent: String,
    pub(crate) retry: RetryConfig,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) on_segment: SegmentCallback,
}

/// Counters after the pool drained
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PoolOutcome {
    pub(crate) downloaded: u64,
    pub(crate) failed: u64,
    /// Segments never claimed because the run was cancelled
    pub(crate) unclaimed: u64,
    pub(crate) first_error: Option<String>,
}

struct PoolShared {
    task_id: TaskId,
    queue: Mutex<VecDeque<SegmentDescriptor>>,
    fetcher: Arc<dyn HttpFetcher>,
    db: Arc<Database>,
    user_agent: String,
    retry: RetryConfig,
    cancel_token: CancellationToken,
    on_segment: SegmentCallback,
    downloaded: AtomicU64,
    failed: AtomicU64,
    first_error: Mutex<Option<String>>,
}

/// Download every segment with at most `concurrency` requests in flight
///
/// Returns once the queue is empty (or cancelled) and every worker returned.
pub(crate) async fn run_segment_pool(params: SegmentPoolParams) -> PoolOutcome {
    let SegmentPoolParams {
        task_id,
        segments,
        concurrency,
        fetcher,
        db,
        user_agent,
        retry,
        cancel_token,
        on_segment,
    } = params;

    let worker_count = concurrency.min(segments.len()).max(1);
    let shared = Arc::new(PoolShared {
        task_id,
        queue: Mutex::new(segments.into_iter().collect()),
        fetcher,
        db,
        user_agent,
        retry,
        cancel_token,
        on_segment,
        downloaded: AtomicU64::new(0),
        failed: AtomicU64::new(0),
        first_error: Mutex::new(None),
    });

    tracing::debug!(
        task_id = task_id.get(),
        worker_count,
        "Starting segment workers"
    );

    let workers: Vec<_> = (0..worker_count)
        .map(|worker| {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { worker_loop(worker, &shared).await })
        })
        .collect();

    for result in futures::future::join_all(workers).await {
        if let Err(e) = result {
            tracing::error!(task_id = task_id.get(), error = %e, "Segment worker panicked");
        }
    }

    let unclaimed = shared.queue.lock().len() as u64;
    let first_error = shared.first_error.lock().take();

    PoolOutcome {
        downloaded: shared.downloaded.load(Ordering::SeqCst),
        failed: shared.failed.load(Ordering::SeqCst),
        unclaimed,
        first_error,
    }
}

async fn worker_loop(worker: usize, shared: &PoolShared) {
    loop {
        if shared.cancel_token.is_cancelled() {
            tracing::debug!(
                task_id = shared.task_id.get(),
                worker,
                "Worker stopping: task cancelled"
            );
            return;
        }

        let Some(segment) = shared.queue.lock().pop_front() else {
            return;
        };

        let result = download_with_retry(&shared.retry, || fetch_and_store(shared, &segment)).await;

        match result {
            Ok(()) => {
                shared.downloaded.fetch_add(1, Ordering::SeqCst);
                (shared.on_segment)(segment.index, true);
            }
            Err(e) => {
                tracing::warn!(
                    task_id = shared.task_id.get(),
                    segment_index = segment.index,
                    url = %segment.url,
                    error = %e,
                    "Segment failed"
                );
                shared.failed.fetch_add(1, Ordering::SeqCst);
                shared
                    .first_error
                    .lock()
                    .get_or_insert_with(|| e.to_string());
                (shared.on_segment)(segment.index, false);
            }
        }
    }
}

/// One attempt: fetch, check status, persist
///
/// The segment only counts as downloaded once the store accepted it.
async fn fetch_and_store(
    shared: &PoolShared,
    segment: &SegmentDescriptor,
) -> Result<(), SegmentFetchError> {
    let headers = request_headers(&segment.url, &shared.user_agent, RequestKind::Segment);

    let response = shared
        .fetcher
        .fetch(&segment.url, &headers)
        .await
        .map_err(|source| SegmentFetchError::Transport {
            index: segment.index,
            source,
        })?;

    if !response.is_success() {
        return Err(SegmentFetchError::Status {
            index: segment.index,
            status: response.status,
        });
    }

    shared
        .db
        .put_segment(shared.task_id, segment.index, &response.body)
        .await
        .map_err(|e| SegmentFetchError::Store {
            index: segment.index,
            reason: e.to_string(),
        })?;

    tracing::debug!(
        task_id = shared.task_id.get(),
        segment_index = segment.index,
        bytes = response.body.len(),
        "Segment stored"
    );

    Ok(())
}
