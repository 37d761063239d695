//! Basic download example
//!
//! Downloads one HLS stream and writes the reassembled file to `./downloads`.
//!
//! ```text
//! RUST_LOG=hls_dl=debug cargo run --example basic_download -- \
//!     https://cdn.example.com/live/master.m3u8 "Launch stream"
//! ```

use hls_dl::config::{Config, DownloadConfig};
use hls_dl::{DownloadRequest, Event, HlsDownloader, Status};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hls_dl=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(manifest_url) = args.next() else {
        eprintln!("usage: basic_download <playlist-url> [title]");
        std::process::exit(2);
    };
    let title = args.next();

    let config = Config {
        download: DownloadConfig {
            concurrency: 4,
            ..Default::default()
        },
        ..Default::default()
    };

    let downloader = HlsDownloader::new(config).await?;

    let mut events = downloader.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::StatusChanged { id, status } => {
                    println!("task {}: {}", id, status);
                }
                Event::Progress { id, progress, .. } => {
                    println!(
                        "task {}: {}/{} segments ({} failed, {:.1}%)",
                        id,
                        progress.downloaded,
                        progress.total,
                        progress.failed,
                        progress.percent()
                    );
                }
                Event::Merging { id, merged, total } => {
                    println!("task {}: merged {}/{}", id, merged, total);
                }
                Event::Completed {
                    id,
                    file_name,
                    size_bytes,
                    ..
                } => {
                    println!(
                        "task {}: saved {} ({:.2} MiB)",
                        id,
                        file_name,
                        size_bytes as f64 / 1_048_576.0
                    );
                }
                Event::Failed { id, kind, error } => {
                    println!("task {}: failed ({}): {}", id, kind, error);
                }
                _ => {}
            }
        }
    });

    let mut request = DownloadRequest::new(manifest_url);
    if let Some(title) = title {
        request = request.with_title(title);
    }

    let task = downloader.run(request).await?;
    downloader.shutdown().await?;

    if task.status != Status::Completed {
        std::process::exit(1);
    }

    Ok(())
}
