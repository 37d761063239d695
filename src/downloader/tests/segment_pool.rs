use super::*;
use crate::config::RetryConfig;
use crate::db::Database;
use crate::downloader::download_task::segment_pool::{
    PoolOutcome, SegmentPoolParams, run_segment_pool,
};
use crate::types::{SegmentDescriptor, TaskId};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

fn descriptors(count: usize) -> Vec<SegmentDescriptor> {
    (0..count)
        .map(|i| SegmentDescriptor {
            index: i as u64,
            url: segment_url(i),
            duration: Some(4.0),
        })
        .collect()
}

fn segment_bodies(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| format!("segment-{i}").into_bytes()).collect()
}

fn fetcher_for(bodies: &[Vec<u8>]) -> MockFetcher {
    bodies
        .iter()
        .enumerate()
        .fold(MockFetcher::new(), |fetcher, (i, body)| {
            fetcher.with_body(&segment_url(i), body.clone())
        })
}

struct PoolRun {
    outcome: PoolOutcome,
    reported: Vec<(u64, bool)>,
    db: Arc<Database>,
    _temp_file: NamedTempFile,
}

async fn run_pool(
    fetcher: Arc<MockFetcher>,
    segments: Vec<SegmentDescriptor>,
    concurrency: usize,
    retry: RetryConfig,
    cancel_token: CancellationToken,
) -> PoolRun {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(temp_file.path()).await.unwrap());

    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);

    let outcome = run_segment_pool(SegmentPoolParams {
        task_id: TaskId(1),
        segments,
        concurrency,
        fetcher,
        db: Arc::clone(&db),
        user_agent: "test-agent".to_string(),
        retry,
        cancel_token,
        on_segment: Arc::new(move |index: u64, success: bool| sink.lock().push((index, success))),
    })
    .await;

    let reported = reported.lock().clone();
    PoolRun {
        outcome,
        reported,
        db,
        _temp_file: temp_file,
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

#[tokio::test]
async fn test_every_segment_is_stored_once() {
    let bodies = segment_bodies(10);
    let fetcher = Arc::new(fetcher_for(&bodies));

    let run = run_pool(
        Arc::clone(&fetcher),
        descriptors(10),
        3,
        RetryConfig::default(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(run.outcome.downloaded, 10);
    assert_eq!(run.outcome.failed, 0);
    assert_eq!(run.outcome.unclaimed, 0);
    assert_eq!(run.reported.len(), 10);

    // No segment was claimed by two workers
    for i in 0..10 {
        assert_eq!(fetcher.request_count(&segment_url(i)), 1);
    }

    let stored = run.db.list_segments_ordered(TaskId(1)).await.unwrap();
    let stored: Vec<Vec<u8>> = stored.into_iter().map(|s| s.data).collect();
    assert_eq!(stored, bodies);
}

#[tokio::test]
async fn test_concurrency_bounds_requests_in_flight() {
    let bodies = segment_bodies(12);
    let fetcher = Arc::new(fetcher_for(&bodies).with_delay(Duration::from_millis(20)));

    let run = run_pool(
        Arc::clone(&fetcher),
        descriptors(12),
        3,
        RetryConfig::default(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(run.outcome.downloaded, 12);
    assert!(
        fetcher.max_in_flight() <= 3,
        "at most 3 requests in flight, saw {}",
        fetcher.max_in_flight()
    );
    assert!(fetcher.max_in_flight() >= 2, "workers should overlap");
}

#[tokio::test]
async fn test_failed_segments_do_not_stop_the_pool() {
    let bodies = segment_bodies(5);
    let fetcher = fetcher_for(&bodies)
        .with_status(&segment_url(1), 404)
        .with_error(
            &segment_url(3),
            FetchError::Connect {
                url: segment_url(3),
                reason: "connection refused".to_string(),
            },
        );

    let run = run_pool(
        Arc::new(fetcher),
        descriptors(5),
        2,
        RetryConfig::default(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(run.outcome.downloaded, 3);
    assert_eq!(run.outcome.failed, 2);
    assert!(run.outcome.first_error.is_some());

    let mut failures: Vec<u64> = run
        .reported
        .iter()
        .filter(|(_, success)| !success)
        .map(|(index, _)| *index)
        .collect();
    failures.sort_unstable();
    assert_eq!(failures, vec![1, 3]);

    let layout = run.db.segment_layout(TaskId(1)).await.unwrap();
    let stored: Vec<i64> = layout.iter().map(|s| s.segment_index).collect();
    assert_eq!(stored, vec![0, 2, 4]);
}

#[tokio::test]
async fn test_transient_failure_is_not_retried_by_default() {
    let bodies = segment_bodies(2);
    let fetcher = Arc::new(fetcher_for(&bodies).failing_first(&segment_url(0), 1, 503));

    let run = run_pool(
        Arc::clone(&fetcher),
        descriptors(2),
        1,
        RetryConfig::default(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(run.outcome.downloaded, 1);
    assert_eq!(run.outcome.failed, 1);
    assert_eq!(fetcher.request_count(&segment_url(0)), 1);
}

#[tokio::test]
async fn test_transient_failure_is_retried_when_enabled() {
    let bodies = segment_bodies(2);
    let fetcher = Arc::new(fetcher_for(&bodies).failing_first(&segment_url(0), 2, 503));

    let run = run_pool(
        Arc::clone(&fetcher),
        descriptors(2),
        1,
        fast_retry(2),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(run.outcome.downloaded, 2);
    assert_eq!(run.outcome.failed, 0);
    assert_eq!(fetcher.request_count(&segment_url(0)), 3);
}

#[tokio::test]
async fn test_permanent_status_is_never_retried() {
    let fetcher = Arc::new(MockFetcher::new().with_status(&segment_url(0), 404));

    let run = run_pool(
        Arc::clone(&fetcher),
        descriptors(1),
        1,
        fast_retry(3),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(run.outcome.failed, 1);
    assert_eq!(fetcher.request_count(&segment_url(0)), 1);
}

#[tokio::test]
async fn test_segment_requests_carry_origin_headers() {
    let bodies = segment_bodies(1);
    let fetcher = Arc::new(fetcher_for(&bodies));

    run_pool(
        Arc::clone(&fetcher),
        descriptors(1),
        1,
        RetryConfig::default(),
        CancellationToken::new(),
    )
    .await;

    let headers = fetcher.headers_for(&segment_url(0)).unwrap();
    assert!(headers.contains(&("Referer", "https://cdn.example.com".to_string())));
    assert!(headers.contains(&("User-Agent", "test-agent".to_string())));
    assert!(headers.contains(&("Accept", "*/*".to_string())));
}

#[tokio::test]
async fn test_cancel_lets_in_flight_fetches_finish() {
    let bodies = segment_bodies(10);
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = Arc::new(fetcher_for(&bodies).with_segment_gate(Arc::clone(&gate)));
    let cancel_token = CancellationToken::new();

    let pool = tokio::spawn({
        let fetcher = Arc::clone(&fetcher);
        let cancel_token = cancel_token.clone();
        async move {
            run_pool(
                fetcher,
                descriptors(10),
                2,
                RetryConfig::default(),
                cancel_token,
            )
            .await
        }
    });

    // Both workers hold a claimed segment at the gate
    wait_until(|| fetcher.segment_request_count() == 2).await;

    cancel_token.cancel();
    gate.add_permits(10);

    let run = pool.await.unwrap();

    assert_eq!(run.outcome.downloaded, 2, "in-flight fetches complete");
    assert_eq!(run.outcome.unclaimed, 8);
    assert_eq!(
        fetcher.segment_request_count(),
        2,
        "nothing claimed after cancel"
    );
    assert_eq!(run.db.count_segments(TaskId(1)).await.unwrap(), 2);
}

#[tokio::test]
async fn test_worker_count_never_exceeds_segment_count() {
    let bodies = segment_bodies(2);
    let fetcher = Arc::new(fetcher_for(&bodies).with_delay(Duration::from_millis(10)));

    let run = run_pool(
        Arc::clone(&fetcher),
        descriptors(2),
        16,
        RetryConfig::default(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(run.outcome.downloaded, 2);
    assert!(fetcher.max_in_flight() <= 2);
}
