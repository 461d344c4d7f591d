//! QuickGrab - A Rust CLI tool for grabbing video and audio from the web
//!
//! This library resolves a media URL with yt-dlp, downloads it into a target directory
//! under a collision-free file name, and re-encodes video with ffmpeg so that common
//! players (QuickTime included) can open the result.

use std::path::PathBuf;

pub mod cli;
pub mod config;
pub mod extractors;
pub mod pipeline;
pub mod tools;
pub mod transcode;
pub mod ui;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use extractors::{MediaExtractor, MediaInfo};
pub use pipeline::{DownloadPipeline, DownloadRequest, OutputKind, Phase, ProgressEvent};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the downloader
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Required tool '{tool}' could not be run from {path}: {reason}")]
    MissingDependency {
        tool: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Downloaded file not found: {}", .0.display())]
    OutputNotFound(PathBuf),

    #[error("Transcoding failed: {0}")]
    TranscodeFailed(String),
}
