use anyhow::Context;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::{DownloadPlan, FormatSelection, MediaExtractor, MediaInfo};
use crate::pipeline::{Phase, ProgressReporter};
use crate::tools::{self, ToolKind};
use crate::{FetchError, Result};

static PROGRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid progress regex"));

static POSTPROCESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(Merger|ExtractAudio|VideoConvertor|FixupM3u8|FixupM4a)\]")
        .expect("valid post-processor regex")
});

/// Prefix of the line `--print` writes once the file is in its final place
const FINAL_PATH_MARKER: &str = "QUICKGRAB_PATH=";

/// One line of yt-dlp stdout, as far as we care about it
#[derive(Debug, Clone, PartialEq)]
enum OutputLine {
    Progress(f64),
    PostProcessing(String),
    FinalPath(PathBuf),
    Other,
}

fn classify_line(line: &str) -> OutputLine {
    let line = line.trim();
    if line.is_empty() {
        return OutputLine::Other;
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        return caps[1]
            .parse::<f64>()
            .map(OutputLine::Progress)
            .unwrap_or(OutputLine::Other);
    }

    if let Some(caps) = POSTPROCESS_RE.captures(line) {
        return OutputLine::PostProcessing(caps[1].to_string());
    }

    if let Some(path) = line.strip_prefix(FINAL_PATH_MARKER) {
        return OutputLine::FinalPath(PathBuf::from(path));
    }

    OutputLine::Other
}

/// Pick the most useful line out of yt-dlp's stderr for an error message
fn summarize_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("yt-dlp exited without output")
        .trim()
        .to_string()
}

/// yt-dlp output templates treat `%` as a field marker
fn escape_template(stem: &str) -> String {
    stem.replace('%', "%%")
}

/// Media extractor backed by the yt-dlp binary
pub struct YtDlpExtractor {
    yt_dlp_path: PathBuf,
    ffmpeg_location: Option<PathBuf>,
}

impl YtDlpExtractor {
    pub fn new(yt_dlp_path: impl Into<PathBuf>, ffmpeg_location: Option<PathBuf>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
            ffmpeg_location,
        }
    }

    /// Build the full argument list for a download run
    fn download_args(&self, url: &str, plan: &DownloadPlan) -> Vec<String> {
        let template = plan
            .directory
            .join(format!("{}.%(ext)s", escape_template(&plan.stem)));

        let mut args = vec![
            "--output".to_string(),
            template.to_string_lossy().into_owned(),
            "--no-playlist".to_string(),
            "--no-part".to_string(),
            // `--print` implies quiet + simulate, so switch both back
            "--no-simulate".to_string(),
            "--no-quiet".to_string(),
            "--progress".to_string(),
            "--newline".to_string(),
            "--print".to_string(),
            format!("after_move:{}%(filepath)s", FINAL_PATH_MARKER),
        ];

        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }

        args.push("--format".to_string());
        args.push(plan.selection.format_expression());

        match plan.selection {
            FormatSelection::Audio { bitrate_kbps } => {
                args.extend([
                    "--extract-audio".to_string(),
                    "--audio-format".to_string(),
                    "mp3".to_string(),
                    "--audio-quality".to_string(),
                    format!("{}K", bitrate_kbps),
                ]);
            }
            FormatSelection::Video { .. } => {
                args.extend(["--merge-output-format".to_string(), "mp4".to_string()]);
            }
        }

        args.push(url.to_string());
        args
    }

    fn parse_info(url: &str, info: &Value) -> MediaInfo {
        MediaInfo {
            title: info["title"].as_str().unwrap_or("video").to_string(),
            duration: info["duration"].as_f64(),
            original_url: url.to_string(),
        }
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn check_availability(&self) -> Result<()> {
        let version = tools::probe_version(ToolKind::YtDlp, &self.yt_dlp_path).await?;
        tracing::debug!("yt-dlp version {}", version);
        Ok(())
    }

    async fn probe(&self, url: &str) -> Result<MediaInfo> {
        tracing::debug!("Probing media info for: {}", url);

        let output = Command::new(&self.yt_dlp_path)
            .args(["--dump-json", "--no-playlist", "--skip-download", "--no-warnings", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.yt_dlp_path.display()))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::ExtractionFailed(summarize_stderr(&error)).into());
        }

        let info: Value = serde_json::from_slice(&output.stdout)
            .context("yt-dlp returned invalid JSON")?;

        Ok(Self::parse_info(url, &info))
    }

    async fn download(
        &self,
        url: &str,
        plan: &DownloadPlan,
        progress: &ProgressReporter,
    ) -> Result<PathBuf> {
        let args = self.download_args(url, plan);
        tracing::debug!("Running {} {}", self.yt_dlp_path.display(), args.join(" "));

        let mut child = Command::new(&self.yt_dlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.yt_dlp_path.display()))?;

        let stdout = child.stdout.take().context("Failed to capture yt-dlp stdout")?;
        let mut stderr = child.stderr.take().context("Failed to capture yt-dlp stderr")?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        // Titles and paths follow the system locale, which is not always UTF-8
        let mut reported_path = None;
        let mut segments = BufReader::new(stdout).split(b'\n');
        while let Some(segment) = segments.next_segment().await? {
            match classify_line(&String::from_utf8_lossy(&segment)) {
                OutputLine::Progress(percent) => progress.progress(Phase::Downloading, percent),
                OutputLine::PostProcessing(step) => {
                    tracing::debug!("yt-dlp post-processing: {}", step);
                    progress.progress(Phase::Merging, 100.0);
                }
                OutputLine::FinalPath(path) => reported_path = Some(path),
                OutputLine::Other => {}
            }
        }

        let status = child.wait().await?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(FetchError::ExtractionFailed(summarize_stderr(&stderr_text)).into());
        }

        // A 100% line only ends one stream of a merged download; the exit ends them all
        progress.progress(Phase::Merging, 100.0);

        match reported_path {
            Some(path) => {
                if path != plan.expected_path {
                    tracing::info!(
                        "yt-dlp wrote {} instead of {}",
                        path.display(),
                        plan.expected_path.display()
                    );
                }
                Ok(path)
            }
            None => {
                tracing::debug!("yt-dlp did not report a path, assuming {}", plan.expected_path.display());
                Ok(plan.expected_path.clone())
            }
        }
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}
