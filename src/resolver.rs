//! Playlist resolution
//!
//! Turns a root playlist URL into the ordered segment list of one media
//! playlist, following at most one master → media hop.

use crate::error::{ManifestError, Result};
use crate::fetch::{HttpFetcher, RequestKind, request_headers};
use crate::manifest::{self, Manifest, VariantStream};
use crate::types::SegmentDescriptor;
use std::sync::Arc;

/// Resolves playlist URLs to segment lists through an [`HttpFetcher`]
#[derive(Clone)]
pub struct PlaylistResolver {
    fetcher: Arc<dyn HttpFetcher>,
    user_agent: String,
}

impl PlaylistResolver {
    /// Create a resolver sending `user_agent` with every playlist request
    pub fn new(fetcher: Arc<dyn HttpFetcher>, user_agent: impl Into<String>) -> Self {
        Self {
            fetcher,
            user_agent: user_agent.into(),
        }
    }

    /// Resolve `manifest_url` to its segments, in playlist order
    ///
    /// # Errors
    ///
    /// - [`ManifestError::FetchFailed`] when a playlist cannot be retrieved
    /// - [`ManifestError::UnsupportedNestedMaster`] when the selected variant
    ///   is itself a master playlist
    /// - [`ManifestError::NoSegmentsFound`] when the media playlist lists no
    ///   segments (or a master playlist lists no usable variants)
    pub async fn resolve(&self, manifest_url: &str) -> Result<Vec<SegmentDescriptor>> {
        let text = self.fetch_text(manifest_url).await?;

        let (segments, media_url) = match manifest::parse(&text, manifest_url) {
            Manifest::Media(segments) => (segments, manifest_url.to_string()),
            Manifest::Master(variants) => {
                let Some(variant) = select_variant(&variants) else {
                    return Err(ManifestError::NoSegmentsFound {
                        url: manifest_url.to_string(),
                    }
                    .into());
                };

                tracing::info!(
                    manifest_url,
                    variant_url = %variant.url,
                    bandwidth = ?variant.bandwidth,
                    resolution = ?variant.resolution.map(|r| r.to_string()),
                    candidates = variants.len(),
                    "Selected variant stream"
                );

                let variant_text = self.fetch_text(&variant.url).await?;
                match manifest::parse(&variant_text, &variant.url) {
                    Manifest::Media(segments) => (segments, variant.url.clone()),
                    Manifest::Master(_) => {
                        return Err(ManifestError::UnsupportedNestedMaster {
                            url: variant.url.clone(),
                        }
                        .into());
                    }
                }
            }
        };

        if segments.is_empty() {
            return Err(ManifestError::NoSegmentsFound { url: media_url }.into());
        }

        tracing::debug!(
            media_url = %media_url,
            segments = segments.len(),
            "Resolved media playlist"
        );

        Ok(segments)
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let headers = request_headers(url, &self.user_agent, RequestKind::Manifest);

        let response = self
            .fetcher
            .fetch(url, &headers)
            .await
            .map_err(|e| ManifestError::FetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.is_success() {
            return Err(ManifestError::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&response.body).into_owned())
    }
}

/// Pick the variant to download from a master playlist
///
/// Highest resolution area wins when every variant declares a resolution;
/// otherwise highest bandwidth wins (a missing bandwidth counts as 0). On a
/// tie the variant declared first is kept.
pub fn select_variant(variants: &[VariantStream]) -> Option<&VariantStream> {
    let by_area = variants.iter().all(|v| v.resolution.is_some());
    let rank = |v: &VariantStream| -> u64 {
        if by_area {
            v.resolution.map(|r| r.area()).unwrap_or(0)
        } else {
            v.bandwidth.unwrap_or(0)
        }
    };

    variants.iter().fold(None, |best, candidate| match best {
        Some(current) if rank(candidate) <= rank(current) => Some(current),
        _ => Some(candidate),
    })
}
