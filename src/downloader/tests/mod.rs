use super::test_helpers::*;
use super::*;
use crate::error::{DownloadError, Error, ErrorKind};
use crate::fetch::FetchError;
use crate::types::{DownloadRequest, Progress, Status};
use std::sync::Arc;
use std::time::Duration;

mod segment_pool;

const MASTER_URL: &str = "https://cdn.example.com/live/master.m3u8";
const MEDIA_URL: &str = "https://cdn.example.com/live/720p/index.m3u8";

const MASTER_PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
360p/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720\n\
720p/index.m3u8\n";

fn segment_url(index: usize) -> String {
    format!("https://cdn.example.com/live/720p/seg{index}.ts")
}

/// Master playlist pointing at a 720p media playlist with `bodies` as segments
fn stream_fetcher(bodies: &[&[u8]]) -> MockFetcher {
    MockFetcher::new()
        .with_body(MASTER_URL, MASTER_PLAYLIST)
        .with_media_playlist(MEDIA_URL, bodies)
}
