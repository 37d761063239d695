//! Utility functions for output naming and path handling

use crate::config::FileCollisionAction;
use crate::error::{DeliveryError, Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Maximum length of the title part of a generated file name, in characters
pub const MAX_TITLE_CHARS: usize = 50;

/// Title used when none is supplied
pub const DEFAULT_TITLE: &str = "video";

/// Quality label used when the URL gives no hint
pub const UNKNOWN_QUALITY: &str = "unknown";

/// Make a title safe to use as a file name component
///
/// Collapses each run of whitespace into one `_`, replaces characters
/// forbidden on common filesystems with `_`, then truncates to
/// [`MAX_TITLE_CHARS`] characters. An empty title becomes [`DEFAULT_TITLE`].
///
/// # Examples
///
/// ```
/// use hls_dl::utils::sanitize_title;
///
/// assert_eq!(sanitize_title("My: Video / Part 1?"), "My__Video___Part_1_");
/// assert_eq!(sanitize_title("   "), "_");
/// assert_eq!(sanitize_title(""), "video");
/// ```
pub fn sanitize_title(title: &str) -> String {
    if title.is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    whitespace_regex()
        .replace_all(title, "_")
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_TITLE_CHARS)
        .collect()
}

/// Build the output file name for a download
///
/// Format: `{title}_{quality}_{YYYY-MM-DD_HH-MM-SS-mmm}.mp4`
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use hls_dl::utils::generate_file_name;
///
/// let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
/// assert_eq!(
///     generate_file_name(Some("Launch stream"), "1080p", at),
///     "Launch_stream_1080p_2024-03-09_14-05-07-000.mp4"
/// );
/// ```
pub fn generate_file_name(title: Option<&str>, quality: &str, at: DateTime<Utc>) -> String {
    let safe_title = sanitize_title(title.unwrap_or(DEFAULT_TITLE));
    let safe_quality = sanitize_title(quality);
    let timestamp = at.format("%Y-%m-%d_%H-%M-%S-%3f");
    format!("{}_{}_{}.mp4", safe_title, safe_quality, timestamp)
}

/// Guess a quality label from a playlist URL
///
/// Checks `360p`, `480p`, `720p`, `1080p`, `4k` in that order; the first
/// matching pattern wins.
pub fn quality_from_url(url: &str) -> &'static str {
    quality_patterns()
        .iter()
        .find(|(_, pattern)| pattern.is_match(url))
        .map(|(label, _)| *label)
        .unwrap_or(UNKNOWN_QUALITY)
}

/// Get a unique path for a file, handling collisions according to the specified action
///
/// # Arguments
///
/// * `path` - The desired file path
/// * `action` - How to handle file collisions
///
/// # Returns
///
/// Returns the final path to use. For Rename action, this may have a suffix added.
/// For Skip action, returns an error if the file already exists.
/// For Overwrite action, returns the original path unchanged.
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(Error::Delivery(DeliveryError::FileCollision {
                    path: path.to_path_buf(),
                    reason: "File already exists and collision action is Skip".to_string(),
                }));
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
                Error::Delivery(DeliveryError::FileCollision {
                    path: path.to_path_buf(),
                    reason: "Cannot extract file stem".to_string(),
                })
            })?;
            let extension = path.extension().and_then(|e| e.to_str());
            let parent = path.parent().unwrap_or_else(|| Path::new(""));

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(Error::Delivery(DeliveryError::FileCollision {
                path: path.to_path_buf(),
                reason: format!(
                    "Could not find unique filename after {} attempts",
                    MAX_RENAME_ATTEMPTS
                ),
            }))
        }
    }
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r"\s+"))
}

fn quality_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            ("360p", compile(r"(?i)360|low")),
            ("480p", compile(r"(?i)480|sd")),
            ("720p", compile(r"(?i)720|hd")),
            ("1080p", compile(r"(?i)1080|fhd")),
            ("4k", compile(r"(?i)2160|4k|uhd")),
        ]
    })
}

// Patterns are literals exercised by the tests below
#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern must compile")
}
