use anyhow::Context;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::extractors::{validate_url, DownloadPlan, FormatSelection, MediaExtractor, MediaInfo, YtDlpExtractor};
use crate::tools::ToolPaths;
use crate::transcode::FfmpegTranscoder;
use crate::utils::{is_temp_artifact, sanitize_filename, unique_filepath};
use crate::{FetchError, Result};

pub mod progress;

pub use progress::{Phase, PipelineEvent, ProgressEvent, ProgressReporter};

/// What the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Audio,
    Video,
}

impl OutputKind {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::Audio => "mp3",
            OutputKind::Video => "mp4",
        }
    }
}

/// A single download request, immutable once dispatched
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub directory: PathBuf,
    pub kind: OutputKind,
    /// Max video height in pixels, or MP3 bitrate in kbps for audio
    pub quality: u32,
}

impl DownloadRequest {
    pub fn selection(&self) -> FormatSelection {
        match self.kind {
            OutputKind::Audio => FormatSelection::Audio { bitrate_kbps: self.quality },
            OutputKind::Video => FormatSelection::Video { max_height: self.quality },
        }
    }
}

/// File name chosen for a request at dispatch time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub title: String,
    pub extension: &'static str,
    pub path: PathBuf,
}

impl ResolvedTarget {
    pub fn resolve(directory: &Path, raw_title: &str, kind: OutputKind) -> Self {
        let extension = kind.extension();
        let path = unique_filepath(directory, &sanitize_filename(raw_title), extension);
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self { title, extension, path }
    }
}

/// Result of a finished request
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub info: MediaInfo,
    pub removed_temp_files: usize,
}

/// probe → resolve → download → verify → transcode → cleanup
pub struct DownloadPipeline {
    extractor: Box<dyn MediaExtractor>,
    transcoder: FfmpegTranscoder,
}

impl DownloadPipeline {
    pub fn new(extractor: Box<dyn MediaExtractor>, transcoder: FfmpegTranscoder) -> Self {
        Self { extractor, transcoder }
    }

    /// Pipeline backed by yt-dlp and ffmpeg at the located paths
    pub fn from_tools(tools: &ToolPaths, config: &Config) -> Self {
        let extractor = YtDlpExtractor::new(&tools.yt_dlp, Some(tools.ffmpeg.clone()));
        let transcoder = FfmpegTranscoder::new(&tools.ffmpeg, config.transcode.clone());
        Self::new(Box::new(extractor), transcoder)
    }

    pub async fn run(&self, request: &DownloadRequest, progress: &ProgressReporter) -> Result<DownloadOutcome> {
        // Nothing touches the network or the target directory before both tools answer
        progress.status("Checking tools");
        self.transcoder.verify().await?;
        self.extractor.check_availability().await?;

        validate_url(&request.url)?;
        fs_err::create_dir_all(&request.directory)?;

        progress.status("Fetching media info");
        tracing::info!("Probing {} with {}", request.url, self.extractor.name());
        let info = self.extractor.probe(&request.url).await?;

        let target = ResolvedTarget::resolve(&request.directory, &info.title, request.kind);
        tracing::info!("Saving \"{}\" to {}", info.title, target.path.display());

        let plan = DownloadPlan {
            directory: request.directory.clone(),
            stem: target.title.clone(),
            expected_path: target.path.clone(),
            selection: request.selection(),
        };

        progress.status(format!("Downloading {}", target.title));
        let written = self.extractor.download(&request.url, &plan, progress).await?;

        if !written.exists() {
            return Err(FetchError::OutputNotFound(written).into());
        }

        if request.kind == OutputKind::Video {
            progress.status("Converting for player compatibility");
            self.transcoder
                .transcode(&written, info.duration, progress)
                .await
                .with_context(|| format!("Could not convert {}", written.display()))?;
        }

        let removed_temp_files = cleanup_temp_files(&request.directory);
        progress.status("Done");

        Ok(DownloadOutcome {
            path: written,
            info,
            removed_temp_files,
        })
    }
}

/// Delete `temp*.mp4` leftovers from `dir`, returning how many were removed
///
/// Failures are logged and skipped.
pub fn cleanup_temp_files(dir: &Path) -> usize {
    let entries = match fs_err::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Skipping temp cleanup: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_temp_artifact(&name) || !entry.path().is_file() {
            continue;
        }

        match fs_err::remove_file(entry.path()) {
            Ok(()) => {
                tracing::info!("Removed leftover {}", name);
                removed += 1;
            }
            Err(e) => tracing::warn!("Could not remove leftover {}: {}", name, e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscodeConfig;
    use crate::extractors::MockMediaExtractor;

    fn request(dir: &Path, kind: OutputKind, quality: u32) -> DownloadRequest {
        DownloadRequest {
            url: "https://www.youtube.com/watch?v=abc123".to_string(),
            directory: dir.to_path_buf(),
            kind,
            quality,
        }
    }

    fn clip_info(duration: Option<f64>) -> MediaInfo {
        MediaInfo {
            title: "My Clip".to_string(),
            duration,
            original_url: "https://www.youtube.com/watch?v=abc123".to_string(),
        }
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs_err::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_resolved_target_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::write(dir.path().join("My Clip.mp4"), b"x").unwrap();

        let target = ResolvedTarget::resolve(dir.path(), "My Clip", OutputKind::Video);
        assert_eq!(target.title, "My Clip (1)");
        assert_eq!(target.extension, "mp4");
        assert_eq!(target.path, dir.path().join("My Clip (1).mp4"));
    }

    #[test]
    fn test_resolved_target_sanitizes_title() {
        let dir = tempfile::tempdir().unwrap();
        let target = ResolvedTarget::resolve(dir.path(), "Live: A/B <test>?\n", OutputKind::Audio);
        assert_eq!(target.path, dir.path().join("Live AB test.mp3"));
    }

    #[test]
    fn test_cleanup_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["temp-1234.mp4", "Temp_merge.MP4", "keep.mp4", "temp.mp3"] {
            fs_err::write(dir.path().join(name), b"x").unwrap();
        }
        fs_err::create_dir(dir.path().join("temp-dir.mp4")).unwrap();

        assert_eq!(cleanup_temp_files(dir.path()), 2);
        assert_eq!(file_names(dir.path()), vec!["keep.mp4", "temp-dir.mp4", "temp.mp3"]);
    }

    #[test]
    fn test_cleanup_missing_dir_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_temp_files(&dir.path().join("gone")), 0);
    }

    #[tokio::test]
    async fn test_missing_transcoder_fails_before_any_network_call() {
        let dir = tempfile::tempdir().unwrap();
        let target_dir = dir.path().join("downloads");

        // No expectations: any extractor call panics the test
        let extractor = MockMediaExtractor::new();
        let pipeline = DownloadPipeline::new(
            Box::new(extractor),
            FfmpegTranscoder::new(dir.path().join("no-ffmpeg"), TranscodeConfig::default()),
        );

        let err = pipeline
            .run(&request(&target_dir, OutputKind::Video, 720), &ProgressReporter::silent())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<FetchError>(),
            Some(FetchError::MissingDependency { tool: "ffmpeg", .. })
        ));
        assert!(!target_dir.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_video_download_end_to_end() {
        let tools_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = crate::transcode::fake::succeeding(tools_dir.path());

        let mut extractor = MockMediaExtractor::new();
        extractor.expect_name().return_const("mock");
        extractor.expect_check_availability().times(1).returning(|| Ok(()));
        extractor.expect_probe().times(1).returning(|_| Ok(clip_info(Some(5.0))));
        extractor
            .expect_download()
            .times(1)
            .withf(|_, plan, _| plan.selection == FormatSelection::Video { max_height: 720 })
            .returning(|_, plan, progress| {
                progress.progress(Phase::Downloading, 40.0);
                progress.progress(Phase::Downloading, 100.0);
                // a merger leftover the sweep should remove
                fs_err::write(plan.directory.join("temp-merge.mp4"), b"junk").unwrap();
                fs_err::write(&plan.expected_path, b"video").unwrap();
                progress.progress(Phase::Merging, 100.0);
                Ok(plan.expected_path.clone())
            });

        let pipeline = DownloadPipeline::new(
            Box::new(extractor),
            FfmpegTranscoder::new(ffmpeg, TranscodeConfig::default()),
        );

        let (reporter, mut rx) = ProgressReporter::channel();
        let outcome = pipeline
            .run(&request(dir.path(), OutputKind::Video, 720), &reporter)
            .await
            .unwrap();
        drop(reporter);

        assert_eq!(outcome.path, dir.path().join("My Clip.mp4"));
        assert!(outcome.path.exists());
        assert_eq!(outcome.removed_temp_files, 1);
        assert_eq!(file_names(dir.path()), vec!["My Clip.mp4"]);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            if let PipelineEvent::Progress(p) = event {
                events.push((p.phase, p.percent));
            }
        }
        assert!(events.windows(2).all(|w| w[0] <= w[1]), "{events:?}");
        assert_eq!(events.last(), Some(&(Phase::Transcoding, 100.0)));
        assert!(events.contains(&(Phase::Transcoding, 50.0)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transcode_failure_leaves_download_untouched() {
        let tools_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = crate::transcode::fake::failing(tools_dir.path());

        let mut extractor = MockMediaExtractor::new();
        extractor.expect_name().return_const("mock");
        extractor.expect_check_availability().returning(|| Ok(()));
        extractor.expect_probe().returning(|_| Ok(clip_info(Some(5.0))));
        extractor.expect_download().returning(|_, plan, _| {
            fs_err::write(&plan.expected_path, b"downloaded").unwrap();
            Ok(plan.expected_path.clone())
        });

        let pipeline = DownloadPipeline::new(
            Box::new(extractor),
            FfmpegTranscoder::new(ffmpeg, TranscodeConfig::default()),
        );

        let err = pipeline
            .run(&request(dir.path(), OutputKind::Video, 1080), &ProgressReporter::silent())
            .await
            .unwrap_err();

        assert!(matches!(err.downcast_ref::<FetchError>(), Some(FetchError::TranscodeFailed(_))));
        assert_eq!(fs_err::read(dir.path().join("My Clip.mp4")).unwrap(), b"downloaded");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_audio_download_skips_transcoder() {
        let tools_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        // would fail the request if it were ever asked to convert
        let ffmpeg = crate::transcode::fake::failing(tools_dir.path());

        let mut extractor = MockMediaExtractor::new();
        extractor.expect_name().return_const("mock");
        extractor.expect_check_availability().returning(|| Ok(()));
        extractor.expect_probe().returning(|_| Ok(clip_info(None)));
        extractor
            .expect_download()
            .withf(|_, plan, _| plan.selection == FormatSelection::Audio { bitrate_kbps: 192 })
            .returning(|_, plan, _| {
                fs_err::write(&plan.expected_path, b"mp3").unwrap();
                Ok(plan.expected_path.clone())
            });

        let pipeline = DownloadPipeline::new(
            Box::new(extractor),
            FfmpegTranscoder::new(ffmpeg, TranscodeConfig::default()),
        );

        let outcome = pipeline
            .run(&request(dir.path(), OutputKind::Audio, 192), &ProgressReporter::silent())
            .await
            .unwrap();

        assert_eq!(outcome.path, dir.path().join("My Clip.mp3"));
        assert_eq!(fs_err::read(&outcome.path).unwrap(), b"mp3");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reported_path_is_trusted_over_prediction() {
        let tools_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = crate::transcode::fake::failing(tools_dir.path());

        let mut extractor = MockMediaExtractor::new();
        extractor.expect_name().return_const("mock");
        extractor.expect_check_availability().returning(|| Ok(()));
        extractor.expect_probe().returning(|_| Ok(clip_info(None)));
        extractor.expect_download().returning(|_, plan, _| {
            let actual = plan.directory.join(format!("{}.m4a", plan.stem));
            fs_err::write(&actual, b"m4a").unwrap();
            Ok(actual)
        });

        let pipeline = DownloadPipeline::new(
            Box::new(extractor),
            FfmpegTranscoder::new(ffmpeg, TranscodeConfig::default()),
        );

        let outcome = pipeline
            .run(&request(dir.path(), OutputKind::Audio, 128), &ProgressReporter::silent())
            .await
            .unwrap();
        assert_eq!(outcome.path, dir.path().join("My Clip.m4a"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_output_is_reported() {
        let tools_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = crate::transcode::fake::succeeding(tools_dir.path());

        let mut extractor = MockMediaExtractor::new();
        extractor.expect_name().return_const("mock");
        extractor.expect_check_availability().returning(|| Ok(()));
        extractor.expect_probe().returning(|_| Ok(clip_info(Some(5.0))));
        extractor
            .expect_download()
            .returning(|_, plan, _| Ok(plan.expected_path.clone()));

        let pipeline = DownloadPipeline::new(
            Box::new(extractor),
            FfmpegTranscoder::new(ffmpeg, TranscodeConfig::default()),
        );

        let err = pipeline
            .run(&request(dir.path(), OutputKind::Video, 720), &ProgressReporter::silent())
            .await
            .unwrap_err();

        match err.downcast_ref::<FetchError>() {
            Some(FetchError::OutputNotFound(path)) => assert_eq!(path, &dir.path().join("My Clip.mp4")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extraction_failure_propagates() {
        let tools_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = crate::transcode::fake::succeeding(tools_dir.path());

        let mut extractor = MockMediaExtractor::new();
        extractor.expect_name().return_const("mock");
        extractor.expect_check_availability().returning(|| Ok(()));
        extractor.expect_probe().returning(|_| {
            Err(FetchError::ExtractionFailed("ERROR: Unsupported URL".to_string()).into())
        });

        let pipeline = DownloadPipeline::new(
            Box::new(extractor),
            FfmpegTranscoder::new(ffmpeg, TranscodeConfig::default()),
        );

        let err = pipeline
            .run(&request(dir.path(), OutputKind::Video, 720), &ProgressReporter::silent())
            .await
            .unwrap_err();

        assert!(matches!(err.downcast_ref::<FetchError>(), Some(FetchError::ExtractionFailed(_))));
        assert!(file_names(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_url_rejected_before_probe() {
        let dir = tempfile::tempdir().unwrap();

        let mut extractor = MockMediaExtractor::new();
        extractor.expect_check_availability().returning(|| Ok(()));

        // `true` exits 0 for `-version`
        let pipeline = DownloadPipeline::new(
            Box::new(extractor),
            FfmpegTranscoder::new("true", TranscodeConfig::default()),
        );

        let mut bad = request(dir.path(), OutputKind::Video, 720);
        bad.url = "file:///etc/passwd".to_string();

        let err = pipeline.run(&bad, &ProgressReporter::silent()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<FetchError>(), Some(FetchError::InvalidUrl(_))));
    }
}
