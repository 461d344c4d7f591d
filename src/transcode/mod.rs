use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::config::TranscodeConfig;
use crate::pipeline::{Phase, ProgressReporter};
use crate::tools::{self, ToolKind};
use crate::{FetchError, Result};

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"time=(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)").expect("valid ffmpeg time regex")
});

/// Parse the `time=HH:MM:SS.ms` field of an ffmpeg status line into seconds
pub fn parse_elapsed(line: &str) -> Option<f64> {
    let caps = TIME_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Percent of `total` covered by `elapsed`, None when the total is unknown or zero
pub fn transcode_percent(elapsed: f64, total: Option<f64>) -> Option<f64> {
    match total {
        Some(total) if total > 0.0 && total.is_finite() => Some((elapsed / total * 100.0).min(100.0)),
        _ => None,
    }
}

/// One in-place re-encode: `input` is rewritten through a sibling temp file
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub temp_output: PathBuf,
}

impl TranscodeJob {
    pub fn new(input: &Path) -> Self {
        let dir = input.parent().unwrap_or_else(|| Path::new("."));
        let suffix = &Uuid::new_v4().simple().to_string()[..8];
        Self {
            input: input.to_path_buf(),
            // Named so the post-download `temp*.mp4` sweep catches it if we die midway
            temp_output: dir.join(format!("temp-{}.mp4", suffix)),
        }
    }

    /// Full ffmpeg argument list for this job
    pub fn args(&self, settings: &TranscodeConfig) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            self.input.clone().into(),
            "-c:v".into(),
            settings.video_codec.clone().into(),
            "-preset".into(),
            settings.preset.clone().into(),
            "-crf".into(),
            settings.crf.to_string().into(),
            "-c:a".into(),
            settings.audio_codec.clone().into(),
            "-b:a".into(),
            settings.audio_bitrate.clone().into(),
        ];

        if settings.faststart {
            args.push("-movflags".into());
            args.push("+faststart".into());
        }

        args.push(self.temp_output.clone().into());
        args
    }

    fn discard_temp(&self) {
        if self.temp_output.exists() {
            if let Err(e) = fs_err::remove_file(&self.temp_output) {
                tracing::warn!("Could not remove {}: {}", self.temp_output.display(), e);
            }
        }
    }
}

/// Re-encodes downloaded video with ffmpeg for player compatibility
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    settings: TranscodeConfig,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, settings: TranscodeConfig) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            settings,
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    /// Run `ffmpeg -version`, failing with a missing-dependency error
    pub async fn verify(&self) -> Result<String> {
        let version = tools::probe_version(ToolKind::Ffmpeg, &self.ffmpeg_path).await?;
        tracing::debug!("ffmpeg version: {}", version);
        Ok(version)
    }

    /// Rewrite `input` in place
    ///
    /// Progress is reported against `total_duration` (seconds) when it is known. On
    /// failure the original file is left as it was.
    pub async fn transcode(
        &self,
        input: &Path,
        total_duration: Option<f64>,
        progress: &ProgressReporter,
    ) -> Result<()> {
        let job = TranscodeJob::new(input);
        let args = job.args(&self.settings);
        tracing::info!("Transcoding {} via {}", input.display(), job.temp_output.display());

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", self.ffmpeg_path.display()))?;

        let stderr = child.stderr.take().context("Failed to capture ffmpeg stderr")?;

        if total_duration.map_or(true, |d| d <= 0.0) {
            tracing::debug!("Duration unknown, transcoding without percent progress");
        }
        progress.progress(Phase::Transcoding, 0.0);

        // ffmpeg redraws its status line with \r, everything else ends in \n
        let mut tail: Vec<String> = Vec::new();
        let mut chunks = BufReader::new(stderr).split(b'\r');
        while let Some(chunk) = chunks.next_segment().await? {
            for line in String::from_utf8_lossy(&chunk).lines() {
                if let Some(elapsed) = parse_elapsed(line) {
                    if let Some(percent) = transcode_percent(elapsed, total_duration) {
                        progress.progress(Phase::Transcoding, percent);
                    }
                } else if !line.trim().is_empty() {
                    if tail.len() == 8 {
                        tail.remove(0);
                    }
                    tail.push(line.trim().to_string());
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            for line in &tail {
                tracing::debug!("ffmpeg: {}", line);
            }
            job.discard_temp();
            return Err(FetchError::TranscodeFailed(format!("ffmpeg exited with {}", status)).into());
        }

        // Single rename replaces the original atomically on the same filesystem
        if let Err(e) = fs_err::rename(&job.temp_output, &job.input) {
            job.discard_temp();
            return Err(e).context("Failed to replace original with transcoded file");
        }

        progress.progress(Phase::Transcoding, 100.0);
        Ok(())
    }
}
