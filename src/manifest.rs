//! HLS playlist parsing
//!
//! Pure text-to-model translation of `.m3u8` playlists. No I/O happens here;
//! the [`resolver`](crate::resolver) fetches the text and calls [`parse`].
//!
//! A playlist containing an `#EXT-X-STREAM-INF:` tag is a master playlist
//! listing variant streams. Anything else is treated as a media playlist
//! listing segments.

use crate::types::SegmentDescriptor;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

/// Tag that marks a playlist as a master playlist
pub const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF:";

/// Path extensions accepted as media segment references
pub const SEGMENT_EXTENSIONS: &[&str] = &[".ts", ".m4s", ".mp4", ".m4a", ".m4v", ".aac"];

/// Playlist classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    /// Lists variant streams
    Master,
    /// Lists media segments
    Media,
}

/// Video dimensions from a `RESOLUTION=WxH` attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Pixel count
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One entry of a master playlist
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantStream {
    /// Peak bit rate in bits per second
    pub bandwidth: Option<u64>,
    /// Video dimensions
    pub resolution: Option<Resolution>,
    /// Codec list, e.g. `avc1.640028,mp4a.40.2`
    pub codecs: Option<String>,
    /// Frames per second
    pub frame_rate: Option<f64>,
    /// Absolute URL of the variant's media playlist
    pub url: String,
}

/// A parsed playlist
#[derive(Clone, Debug, PartialEq)]
pub enum Manifest {
    /// Master playlist and its variants, in declaration order
    Master(Vec<VariantStream>),
    /// Media playlist and its segments, in declaration order
    Media(Vec<SegmentDescriptor>),
}

impl Manifest {
    /// Classification of this playlist
    pub fn kind(&self) -> ManifestKind {
        match self {
            Manifest::Master(_) => ManifestKind::Master,
            Manifest::Media(_) => ManifestKind::Media,
        }
    }
}

/// Parse playlist text fetched from `manifest_url`
///
/// Relative references are resolved against `manifest_url`.
pub fn parse(text: &str, manifest_url: &str) -> Manifest {
    if is_master(text) {
        Manifest::Master(parse_master(text, manifest_url))
    } else {
        Manifest::Media(parse_media(text, manifest_url))
    }
}

/// Whether the text is a master playlist
pub fn is_master(text: &str) -> bool {
    text.contains(STREAM_INF_TAG)
}

/// Extract segment references from a media playlist
///
/// An `#EXTINF` duration stays pending until the next segment reference
/// consumes it, even across unrelated tags or unrecognized lines.
pub fn parse_media(text: &str, manifest_url: &str) -> Vec<SegmentDescriptor> {
    let mut segments = Vec::new();
    let mut pending_duration: Option<f64> = None;

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            if let Some(caps) = extinf_regex().captures(line)
                && let Ok(duration) = caps[1].parse::<f64>()
            {
                pending_duration = Some(duration);
            }
            continue;
        }

        if is_segment_reference(line) {
            segments.push(SegmentDescriptor {
                index: segments.len() as u64,
                url: resolve_url(line, manifest_url),
                duration: pending_duration.take(),
            });
        }
    }

    segments
}

/// Extract variant streams from a master playlist
///
/// A stream-info tag whose next non-blank line is another tag (or the end of
/// the text) is skipped.
pub fn parse_master(text: &str, manifest_url: &str) -> Vec<VariantStream> {
    let mut variants = Vec::new();
    let mut lines = text.lines().map(str::trim).peekable();

    while let Some(line) = lines.next() {
        let Some(attributes) = line.strip_prefix(STREAM_INF_TAG) else {
            continue;
        };

        while lines.peek().is_some_and(|next| next.is_empty()) {
            lines.next();
        }

        let Some(uri) = lines.next_if(|next| !next.starts_with('#')) else {
            tracing::debug!(attributes, "Skipping stream-info tag without a URI line");
            continue;
        };

        variants.push(parse_stream_info(
            attributes,
            resolve_url(uri, manifest_url),
        ));
    }

    variants
}

fn parse_stream_info(attributes: &str, url: String) -> VariantStream {
    let bandwidth = bandwidth_regex()
        .captures(attributes)
        .and_then(|c| c[1].parse().ok());

    let resolution = resolution_regex().captures(attributes).and_then(|c| {
        Some(Resolution {
            width: c[1].parse().ok()?,
            height: c[2].parse().ok()?,
        })
    });

    let codecs = codecs_regex()
        .captures(attributes)
        .map(|c| c[1].to_string());

    let frame_rate = frame_rate_regex()
        .captures(attributes)
        .and_then(|c| c[1].parse().ok());

    VariantStream {
        bandwidth,
        resolution,
        codecs,
        frame_rate,
        url,
    }
}

/// Whether a playlist line references a media segment
///
/// Query strings and fragments are ignored when checking the extension.
pub fn is_segment_reference(line: &str) -> bool {
    if line.is_empty() || line.starts_with('#') {
        return false;
    }
    let path = line.split(['?', '#']).next().unwrap_or(line);
    let path = path.to_ascii_lowercase();
    SEGMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Resolve a playlist reference against the playlist's own URL
///
/// - absolute `http(s)://` references pass through unchanged
/// - `/rooted` references resolve against the playlist origin
/// - other references resolve against the playlist's directory
///
/// Resolution never fails: an unusable base returns `reference` unchanged and
/// the eventual fetch surfaces the problem.
pub fn resolve_url(reference: &str, base: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }

    match Url::parse(base).and_then(|base| base.join(reference)) {
        Ok(resolved) => resolved.to_string(),
        Err(e) => {
            tracing::debug!(reference, base, error = %e, "Could not resolve playlist reference");
            reference.to_string()
        }
    }
}

fn extinf_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r"#EXTINF:\s*([\d.]+)"))
}

fn bandwidth_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Lookbehind is unsupported, so require a delimiter to avoid AVERAGE-BANDWIDTH
    RE.get_or_init(|| compile(r"(?:^|,)BANDWIDTH=(\d+)"))
}

fn resolution_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r"RESOLUTION=(\d+)x(\d+)"))
}

fn codecs_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#"CODECS="([^"]+)""#))
}

fn frame_rate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r"FRAME-RATE=([\d.]+)"))
}

// Patterns are literals checked by the tests below
#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static playlist pattern must compile")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://cdn.example.com/videos/show/index.m3u8";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXTINF:9.009,
seg0.ts
#EXTINF:9.009,
seg1.ts
#EXTINF:4.5,
/abs/seg2.ts
#EXTINF:10.0,
https://other.example.com/seg3.ts
#EXTINF:3.2,
seg4.ts
#EXT-X-ENDLIST
";

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\",FRAME-RATE=29.97
720p/index.m3u8
#EXT-X-STREAM-INF:AVERAGE-BANDWIDTH=2800000,BANDWIDTH=3000000,RESOLUTION=1920x1080
1080p/index.m3u8
";

    #[test]
    fn media_playlist_yields_one_descriptor_per_segment_line() {
        let manifest = parse(MEDIA, BASE);
        assert_eq!(manifest.kind(), ManifestKind::Media);

        let Manifest::Media(segments) = manifest else {
            panic!("expected media playlist");
        };
        assert_eq!(segments.len(), 5);
        for (position, segment) in segments.iter().enumerate() {
            assert_eq!(
                segment.index, position as u64,
                "index must equal discovery position"
            );
        }
    }

    #[test]
    fn media_segments_resolve_relative_rooted_and_absolute_urls() {
        let segments = parse_media(MEDIA, BASE);

        assert_eq!(
            segments[0].url,
            "https://cdn.example.com/videos/show/seg0.ts"
        );
        assert_eq!(segments[2].url, "https://cdn.example.com/abs/seg2.ts");
        assert_eq!(segments[3].url, "https://other.example.com/seg3.ts");
    }

    #[test]
    fn durations_attach_to_the_following_segment() {
        let segments = parse_media(MEDIA, BASE);

        assert_eq!(segments[0].duration, Some(9.009));
        assert_eq!(segments[2].duration, Some(4.5));
        assert_eq!(segments[4].duration, Some(3.2));
    }

    #[test]
    fn pending_duration_carries_over_unrelated_lines() {
        let text = "#EXTM3U
#EXTINF:6.0,
#EXT-X-DISCONTINUITY
not-a-segment.txt

chunk.m4s
plain.ts
";
        let segments = parse_media(text, BASE);

        assert_eq!(segments.len(), 2, "only .m4s/.ts lines are segments");
        assert_eq!(
            segments[0].duration,
            Some(6.0),
            "duration must survive interleaved tags and non-segment lines"
        );
        assert_eq!(
            segments[1].duration, None,
            "a consumed duration must not leak to the next segment"
        );
    }

    #[test]
    fn segment_extension_check_ignores_query_strings() {
        assert!(is_segment_reference("seg-001.ts?token=abc/def"));
        assert!(is_segment_reference("SEG.TS"));
        assert!(is_segment_reference("init/part.m4s#t=1"));
        assert!(!is_segment_reference("#EXTINF:1.0,"));
        assert!(!is_segment_reference("index.m3u8"));
        assert!(!is_segment_reference("key.bin"));
    }

    #[test]
    fn media_playlist_without_segments_is_empty_not_master() {
        let manifest = parse("#EXTM3U\n#EXT-X-ENDLIST\n", BASE);
        assert_eq!(manifest, Manifest::Media(Vec::new()));
    }

    #[test]
    fn master_playlist_extracts_all_attributes() {
        let Manifest::Master(variants) = parse(MASTER, BASE) else {
            panic!("expected master playlist");
        };

        assert_eq!(variants.len(), 2);
        let first = &variants[0];
        assert_eq!(first.bandwidth, Some(1_500_000));
        assert_eq!(
            first.resolution,
            Some(Resolution {
                width: 1280,
                height: 720,
            })
        );
        assert_eq!(first.codecs.as_deref(), Some("avc1.4d401f,mp4a.40.2"));
        assert_eq!(first.frame_rate, Some(29.97));
        assert_eq!(
            first.url,
            "https://cdn.example.com/videos/show/720p/index.m3u8"
        );
    }

    #[test]
    fn bandwidth_is_not_confused_with_average_bandwidth() {
        let variants = parse_master(MASTER, BASE);
        assert_eq!(variants[1].bandwidth, Some(3_000_000));
    }

    #[test]
    fn stream_info_without_uri_line_is_skipped() {
        let text = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000
#EXT-X-STREAM-INF:BANDWIDTH=1200000

low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2400000
";
        let variants = parse_master(text, BASE);

        assert_eq!(variants.len(), 1, "malformed entries must be skipped");
        assert_eq!(variants[0].bandwidth, Some(1_200_000));
        assert_eq!(
            variants[0].url,
            "https://cdn.example.com/videos/show/low/index.m3u8"
        );
    }

    #[test]
    fn variant_without_optional_attributes_still_parses() {
        let variants = parse_master("#EXT-X-STREAM-INF:PROGRAM-ID=1\nonly.m3u8\n", BASE);

        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].bandwidth, None);
        assert_eq!(variants[0].resolution, None);
        assert_eq!(variants[0].codecs, None);
        assert_eq!(variants[0].frame_rate, None);
    }

    #[test]
    fn resolve_url_handles_each_reference_form() {
        assert_eq!(
            resolve_url("https://a.example.com/x.ts", BASE),
            "https://a.example.com/x.ts"
        );
        assert_eq!(
            resolve_url("/root/x.ts", BASE),
            "https://cdn.example.com/root/x.ts"
        );
        assert_eq!(
            resolve_url("x.ts", BASE),
            "https://cdn.example.com/videos/show/x.ts"
        );
        assert_eq!(
            resolve_url("x.ts", "https://cdn.example.com:8443/a/b.m3u8"),
            "https://cdn.example.com:8443/a/x.ts"
        );
    }

    #[test]
    fn resolve_url_falls_back_to_reference_when_base_is_unusable() {
        assert_eq!(resolve_url("seg0.ts", "not a url"), "seg0.ts");
    }

    #[test]
    fn resolution_area_and_display() {
        let res = Resolution {
            width: 1920,
            height: 1080,
        };
        assert_eq!(res.area(), 2_073_600);
        assert_eq!(res.to_string(), "1920x1080");
    }
}
