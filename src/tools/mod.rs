use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::ToolsConfig;
use crate::FetchError;

/// External programs the downloader drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    YtDlp,
    Ffmpeg,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::YtDlp => "yt-dlp",
            ToolKind::Ffmpeg => "ffmpeg",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolKind::YtDlp => "--version",
            ToolKind::Ffmpeg => "-version",
        }
    }
}

/// Tool locations resolved once at startup
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub kind: ToolKind,
    pub path: PathBuf,
    pub version: Option<String>,
}

impl ToolPaths {
    /// Resolve tools: explicit override, then config, then PATH, then the bare name
    pub fn locate(
        yt_dlp_override: Option<PathBuf>,
        ffmpeg_override: Option<PathBuf>,
        config: &ToolsConfig,
    ) -> Self {
        Self {
            yt_dlp: locate_tool(ToolKind::YtDlp, yt_dlp_override.or_else(|| config.yt_dlp.clone())),
            ffmpeg: locate_tool(ToolKind::Ffmpeg, ffmpeg_override.or_else(|| config.ffmpeg.clone())),
        }
    }

    pub async fn describe(&self) -> Vec<ToolInfo> {
        let mut infos = Vec::new();
        for (kind, path) in [(ToolKind::YtDlp, &self.yt_dlp), (ToolKind::Ffmpeg, &self.ffmpeg)] {
            infos.push(ToolInfo {
                kind,
                path: path.clone(),
                version: probe_version(kind, path).await.ok(),
            });
        }
        infos
    }
}

fn locate_tool(kind: ToolKind, configured: Option<PathBuf>) -> PathBuf {
    if let Some(path) = configured {
        tracing::debug!("Using configured {} at {}", kind.as_str(), path.display());
        return path;
    }

    match which::which(kind.as_str()) {
        Ok(path) => {
            tracing::debug!("Found {} at {}", kind.as_str(), path.display());
            path
        }
        Err(e) => {
            tracing::warn!("{} not found in PATH: {}", kind.as_str(), e);
            PathBuf::from(kind.as_str())
        }
    }
}

/// Run the tool's version command and return the first line it prints
pub async fn probe_version(kind: ToolKind, path: &Path) -> Result<String, FetchError> {
    let missing = |reason: String| FetchError::MissingDependency {
        tool: kind.as_str(),
        path: path.to_path_buf(),
        reason,
    };

    let output = Command::new(path)
        .arg(kind.version_arg())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| missing(e.to_string()))?;

    if !output.status.success() {
        return Err(missing(format!("version check exited with {}", output.status)));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}
