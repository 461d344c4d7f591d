use async_trait::async_trait;
use std::path::PathBuf;
use url::Url;

pub mod ytdlp;

use crate::pipeline::ProgressReporter;
use crate::{FetchError, Result};

pub use ytdlp::YtDlpExtractor;

/// Metadata returned by a probe, before anything is downloaded
#[derive(Debug, Clone)]
pub struct MediaInfo {
    /// Raw title as reported by the site (not yet sanitized)
    pub title: String,

    /// Duration in seconds if available
    pub duration: Option<f64>,

    /// Original URL that was processed
    pub original_url: String,
}

/// Which streams to fetch and how the extractor should post-process them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSelection {
    /// Best audio stream, converted to MP3 at the given bitrate by the extractor itself
    Audio { bitrate_kbps: u32 },
    /// Best H.264 video no taller than `max_height` plus best M4A audio, merged into MP4
    Video { max_height: u32 },
}

impl FormatSelection {
    /// yt-dlp format expression for this selection
    pub fn format_expression(&self) -> String {
        match self {
            FormatSelection::Audio { .. } => "bestaudio/best".to_string(),
            FormatSelection::Video { max_height } => format!(
                "bestvideo[ext=mp4][vcodec^=avc1][height<={}]+bestaudio[ext=m4a]/best",
                max_height
            ),
        }
    }
}

/// Where and how a download should be written
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    /// Directory receiving the file
    pub directory: PathBuf,

    /// File stem the output template is bound to
    pub stem: String,

    /// Path we expect the finished file at, used when the extractor does not report one
    pub expected_path: PathBuf,

    pub selection: FormatSelection,
}

/// Trait for resolving and fetching media from a URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Make sure the backing tool can be run at all
    async fn check_availability(&self) -> Result<()>;

    /// Fetch title and duration without downloading
    async fn probe(&self, url: &str) -> Result<MediaInfo>;

    /// Download according to `plan` and return the path that was actually written
    async fn download(
        &self,
        url: &str,
        plan: &DownloadPlan,
        progress: &ProgressReporter,
    ) -> Result<PathBuf>;

    /// Get the name of the backing tool
    fn name(&self) -> &'static str;
}

/// Validate and normalize URLs
pub fn validate_url(url: &str) -> std::result::Result<Url, FetchError> {
    let parsed = Url::parse(url)
        .map_err(|_| FetchError::InvalidUrl(format!("{} is not a valid URL", url)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl(format!(
            "{} must use HTTP or HTTPS protocol",
            url
        )));
    }

    Ok(parsed)
}
