//! End-to-end tests against a local HTTP server
//!
//! These drive the public API with the production fetcher and file sink:
//! master playlist -> media playlist -> segments -> file on disk.

use std::path::Path;
use std::time::Duration;

use hls_dl::{Config, DownloadRequest, ErrorKind, HlsDownloader, Status};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER_AGENT: &str = "hls-dl-tests/1.0";

const MASTER_PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=640000,RESOLUTION=640x360\n\
360p/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080\n\
1080p/index.m3u8\n";

const MEDIA_PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:6\n\
#EXTINF:6.0,\n\
seg0.ts\n\
#EXTINF:6.0,\n\
seg1.ts\n\
#EXTINF:6.0,\n\
/live/1080p/seg2.ts?token=abc\n\
#EXT-X-ENDLIST\n";

fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("hls-dl.db");
    config.delivery.output_dir = temp_dir.path().join("downloads");
    config.download.user_agent = USER_AGENT.to_string();
    config.download.request_timeout = Duration::from_secs(5);
    config.persistence.sweep_startup_delay = Duration::from_secs(3600);
    config
}

async fn mount_text(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Segments only answer requests carrying the expected headers
async fn mount_segment(server: &MockServer, route: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("User-Agent", USER_AGENT))
        .and(header("Referer", server.uri().as_str()))
        .and(header("Accept", "*/*"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(1)
        .mount(server)
        .await;
}

fn read_output(output_dir: &Path, file_name: &str) -> Vec<u8> {
    std::fs::read(output_dir.join(file_name)).expect("output file should exist")
}

#[tokio::test]
async fn test_master_playlist_download_writes_concatenated_file() {
    let server = MockServer::start().await;
    mount_text(&server, "/live/master.m3u8", MASTER_PLAYLIST).await;
    mount_text(&server, "/live/1080p/index.m3u8", MEDIA_PLAYLIST).await;
    mount_segment(&server, "/live/1080p/seg0.ts", b"first-").await;
    mount_segment(&server, "/live/1080p/seg1.ts", b"second-").await;
    mount_segment(&server, "/live/1080p/seg2.ts", b"third").await;

    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let output_dir = config.delivery.output_dir.clone();
    let downloader = HlsDownloader::new(config).await.unwrap();

    let task = downloader
        .run(
            DownloadRequest::new(format!("{}/live/master.m3u8", server.uri()))
                .with_title("Evening news"),
        )
        .await
        .unwrap();

    assert_eq!(
        task.status,
        Status::Completed,
        "error: {:?}",
        task.last_error
    );
    assert_eq!(task.progress.downloaded, 3);
    assert_eq!(task.progress.failed, 0);

    let file_name = task.file_name.expect("completed task has a file name");
    assert!(file_name.starts_with("Evening_news_unknown_"));
    assert_eq!(read_output(&output_dir, &file_name), b"first-second-third");
    assert!(
        !output_dir.join(format!("{file_name}.part")).exists(),
        "partial file is renamed away"
    );

    let record = downloader.db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(record.status, Status::Completed.to_i32());
    assert_eq!(record.downloaded_segments, 3);

    downloader.shutdown().await.unwrap();
    assert_eq!(
        downloader.db.count_segments(task.id).await.unwrap(),
        0,
        "segments are purged by shutdown at the latest"
    );
}

#[tokio::test]
async fn test_missing_segment_is_skipped() {
    let server = MockServer::start().await;
    mount_text(&server, "/live/1080p/index.m3u8", MEDIA_PLAYLIST).await;
    mount_segment(&server, "/live/1080p/seg0.ts", b"first-").await;
    Mock::given(method("GET"))
        .and(path("/live/1080p/seg1.ts"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_segment(&server, "/live/1080p/seg2.ts", b"third").await;

    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let output_dir = config.delivery.output_dir.clone();
    let downloader = HlsDownloader::new(config).await.unwrap();

    let task = downloader
        .run(DownloadRequest::new(format!(
            "{}/live/1080p/index.m3u8",
            server.uri()
        )))
        .await
        .unwrap();

    assert_eq!(task.status, Status::Completed);
    assert_eq!(task.quality, "1080p");
    assert_eq!(task.progress.failed, 1);
    assert_eq!(
        read_output(&output_dir, &task.file_name.unwrap()),
        b"first-third"
    );
}

#[tokio::test]
async fn test_unreachable_master_fails_the_task() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/live/master.m3u8"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let downloader = HlsDownloader::new(test_config(&temp_dir)).await.unwrap();

    let task = downloader
        .run(DownloadRequest::new(format!(
            "{}/live/master.m3u8",
            server.uri()
        )))
        .await
        .unwrap();

    assert_eq!(task.status, Status::Error);
    assert_eq!(task.error_kind, Some(ErrorKind::ManifestFetch));
    assert!(
        task.last_error.unwrap().contains("HTTP 503"),
        "error should carry the status"
    );
}

#[tokio::test]
async fn test_tasks_survive_restart() {
    let server = MockServer::start().await;
    mount_text(&server, "/live/1080p/index.m3u8", MEDIA_PLAYLIST).await;
    mount_segment(&server, "/live/1080p/seg0.ts", b"a").await;
    mount_segment(&server, "/live/1080p/seg1.ts", b"b").await;
    mount_segment(&server, "/live/1080p/seg2.ts", b"c").await;

    let temp_dir = TempDir::new().unwrap();

    let first = HlsDownloader::new(test_config(&temp_dir)).await.unwrap();
    let task = first
        .run(DownloadRequest::new(format!(
            "{}/live/1080p/index.m3u8",
            server.uri()
        )))
        .await
        .unwrap();
    first.shutdown().await.unwrap();

    let second = HlsDownloader::new(test_config(&temp_dir)).await.unwrap();
    let restored = second.task(task.id).expect("task record restored");

    assert_eq!(restored.status, Status::Completed);
    assert_eq!(restored.file_name, task.file_name);
    assert_eq!(restored.progress.downloaded, 3);
}
