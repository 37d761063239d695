//! Shared test helpers: scripted fetcher, recording sink, downloader factory.

use crate::config::Config;
use crate::delivery::{ChunkAnnouncement, ChunkPayload, DeliverySink};
use crate::downloader::HlsDownloader;
use crate::error::{Error, Result};
use crate::fetch::{FetchError, FetchResponse, HttpFetcher, RequestHeaders};
use crate::manifest::is_segment_reference;
use crate::types::{Event, Status, TaskId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::Semaphore;

#[derive(Clone)]
enum Route {
    Respond { status: u16, body: Vec<u8> },
    Fail(FetchError),
}

/// [`HttpFetcher`] answering from a per-URL script
///
/// Unknown URLs answer 404. Every request is logged before any delay or
/// gate, so tests can observe fetches that are still in flight.
#[derive(Default)]
pub(crate) struct MockFetcher {
    routes: HashMap<String, Route>,
    delay: Option<Duration>,
    segment_gate: Option<Arc<Semaphore>>,
    flaky: Mutex<HashMap<String, (u32, u16)>>,
    requests: Mutex<Vec<(String, RequestHeaders)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.routes.insert(
            url.to_string(),
            Route::Respond {
                status: 200,
                body: body.into(),
            },
        );
        self
    }

    pub(crate) fn with_status(mut self, url: &str, status: u16) -> Self {
        self.routes.insert(
            url.to_string(),
            Route::Respond {
                status,
                body: Vec::new(),
            },
        );
        self
    }

    pub(crate) fn with_error(mut self, url: &str, error: FetchError) -> Self {
        self.routes.insert(url.to_string(), Route::Fail(error));
        self
    }

    /// Answer `status` to the first `failures` requests for `url`, then the scripted route
    pub(crate) fn failing_first(self, url: &str, failures: u32, status: u16) -> Self {
        self.flaky
            .lock()
            .insert(url.to_string(), (failures, status));
        self
    }

    /// Delay every response
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Segment requests wait for (and consume) one permit of `gate`
    pub(crate) fn with_segment_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.segment_gate = Some(gate);
        self
    }

    /// Serve a media playlist at `playlist_url` plus one body per segment
    pub(crate) fn with_media_playlist(mut self, playlist_url: &str, bodies: &[&[u8]]) -> Self {
        let base = playlist_url
            .rsplit_once('/')
            .map(|(base, _)| base)
            .unwrap_or(playlist_url);

        let mut playlist = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:4\n");
        for (index, body) in bodies.iter().enumerate() {
            playlist.push_str(&format!("#EXTINF:4.0,\nseg{index}.ts\n"));
            self = self.with_body(&format!("{base}/seg{index}.ts"), body.to_vec());
        }
        playlist.push_str("#EXT-X-ENDLIST\n");

        self.with_body(playlist_url, playlist)
    }

    pub(crate) fn was_requested(&self, url: &str) -> bool {
        self.requests.lock().iter().any(|(u, _)| u == url)
    }

    /// Highest number of delayed requests observed at once
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    pub(crate) fn segment_request_count(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(url, _)| is_segment_reference(url))
            .count()
    }

    pub(crate) fn headers_for(&self, url: &str) -> Option<RequestHeaders> {
        self.requests
            .lock()
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, headers)| headers.clone())
    }
}

#[async_trait]
impl HttpFetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        headers: &RequestHeaders,
    ) -> std::result::Result<FetchResponse, FetchError> {
        self.requests
            .lock()
            .push((url.to_string(), headers.clone()));

        if let Some(gate) = &self.segment_gate
            && is_segment_reference(url)
        {
            gate.acquire().await.unwrap().forget();
        }

        if let Some(delay) = self.delay {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        if let Some((remaining, status)) = self.flaky.lock().get_mut(url)
            && *remaining > 0
        {
            *remaining -= 1;
            return Ok(FetchResponse {
                status: *status,
                body: Vec::new(),
            });
        }

        match self.routes.get(url).cloned() {
            Some(Route::Respond { status, body }) => Ok(FetchResponse { status, body }),
            Some(Route::Fail(error)) => Err(error),
            None => Ok(FetchResponse {
                status: 404,
                body: Vec::new(),
            }),
        }
    }
}

/// Received chunk: `(chunk_index, data, is_last)`
pub(crate) type ReceivedChunk = (usize, Vec<u8>, bool);

/// [`DeliverySink`] keeping everything in memory
#[derive(Default)]
pub(crate) struct MemorySink {
    files: Mutex<HashMap<String, Vec<u8>>>,
    announcements: Mutex<Vec<ChunkAnnouncement>>,
    chunks: Mutex<HashMap<TaskId, Vec<ReceivedChunk>>>,
    fail_on_chunk: Option<usize>,
    fail_single_shot: bool,
}

impl MemorySink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_on_chunk(mut self, chunk_index: usize) -> Self {
        self.fail_on_chunk = Some(chunk_index);
        self
    }

    pub(crate) fn fail_single_shot(mut self) -> Self {
        self.fail_single_shot = true;
        self
    }

    /// Completed artifact, single-shot or reassembled from chunks
    pub(crate) fn file(&self, file_name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(file_name).cloned()
    }

    pub(crate) fn file_names(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    pub(crate) fn announcements(&self) -> Vec<ChunkAnnouncement> {
        self.announcements.lock().clone()
    }

    pub(crate) fn chunks(&self, task_id: TaskId) -> Vec<ReceivedChunk> {
        self.chunks
            .lock()
            .get(&task_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeliverySink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save_file(&self, file_name: &str, data: &[u8]) -> Result<()> {
        if self.fail_single_shot {
            return Err(Error::Other("sink refused the file".to_string()));
        }
        self.files
            .lock()
            .insert(file_name.to_string(), data.to_vec());
        Ok(())
    }

    async fn prepare(&self, announcement: &ChunkAnnouncement) -> Result<()> {
        self.announcements.lock().push(announcement.clone());
        self.chunks.lock().insert(announcement.task_id, Vec::new());
        Ok(())
    }

    async fn save_chunk(&self, chunk: ChunkPayload<'_>) -> Result<()> {
        if self.fail_on_chunk == Some(chunk.chunk_index) {
            return Err(Error::Other(format!(
                "sink refused chunk {}",
                chunk.chunk_index
            )));
        }

        let mut chunks = self.chunks.lock();
        let received = chunks.entry(chunk.task_id).or_default();
        received.push((chunk.chunk_index, chunk.data.to_vec(), chunk.is_last));

        if chunk.is_last {
            let assembled: Vec<u8> = received
                .iter()
                .flat_map(|(_, data, _)| data.iter().copied())
                .collect();
            let file_name = self
                .announcements
                .lock()
                .iter()
                .rev()
                .find(|a| a.task_id == chunk.task_id)
                .map(|a| a.file_name.clone())
                .unwrap_or_default();
            self.files.lock().insert(file_name, assembled);
        }

        Ok(())
    }
}

/// Config pointing every path into `temp_dir`, with fast timings
pub(crate) fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.delivery.output_dir = temp_dir.path().join("downloads");
    config.delivery.throttle_pause_ms = 1;
    config.persistence.completed_cleanup_delay = Duration::from_millis(50);
    config.persistence.sweep_startup_delay = Duration::from_secs(3600);
    config.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Helper to create a test HlsDownloader with injected collaborators.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader(
    fetcher: Arc<MockFetcher>,
    sink: Arc<MemorySink>,
    configure: impl FnOnce(&mut Config),
) -> (HlsDownloader, TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(&temp_dir);
    configure(&mut config);

    let downloader = HlsDownloader::with_components(config, fetcher, sink)
        .await
        .unwrap();

    (downloader, temp_dir)
}

/// Wait until `id` reaches a terminal status
pub(crate) async fn wait_for_terminal(downloader: &HlsDownloader, id: TaskId) -> Status {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(task) = downloader.task(id)
                && task.status.is_terminal()
            {
                return task.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task did not finish in time")
}

/// Poll `condition` until it holds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Drain every event currently buffered in `rx`
pub(crate) fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
