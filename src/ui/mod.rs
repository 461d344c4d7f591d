use anyhow::Result;
use async_trait::async_trait;
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::config::Config;
use crate::pipeline::{DownloadOutcome, DownloadPipeline, DownloadRequest, OutputKind, PipelineEvent, ProgressReporter};
use crate::utils::format_duration;

/// Video heights offered in the quality prompt
pub const VIDEO_QUALITIES: &[u32] = &[720, 1080, 1440, 2160];

/// MP3 bitrates offered in the quality prompt
pub const AUDIO_BITRATES: &[u32] = &[128, 192];

/// Renders pipeline events into a progress bar and status line
///
/// Only the foreground task touches the bar; the download task talks to it through
/// the event channel.
pub struct ProgressView {
    bar: ProgressBar,
}

impl ProgressView {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(100)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }

    pub fn apply(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::Progress(p) => {
                self.bar.set_position(p.percent.round() as u64);
                self.bar.set_message(format!("{} {:.0}%", p.phase.label(), p.percent));
            }
            PipelineEvent::Status(message) => self.bar.set_message(message),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Run one request on a background task while the caller's task draws progress
pub async fn run_with_progress(
    pipeline: Arc<DownloadPipeline>,
    request: DownloadRequest,
    quiet: bool,
) -> Result<DownloadOutcome> {
    let (reporter, mut events) = ProgressReporter::channel();

    let worker = tokio::spawn(async move { pipeline.run(&request, &reporter).await });

    let view = ProgressView::new(quiet);
    // Closes once the worker drops its reporter
    while let Some(event) = events.recv().await {
        view.apply(event);
    }
    view.finish();

    worker.await?
}

pub fn print_outcome(outcome: &DownloadOutcome) {
    let duration = outcome
        .info
        .duration
        .map(|d| format!(" ({})", format_duration(d)))
        .unwrap_or_default();
    println!(
        "{} {}{}",
        style("Download complete:").green().bold(),
        outcome.path.display(),
        duration
    );
    if outcome.removed_temp_files > 0 {
        println!("  Removed {} leftover temp file(s)", outcome.removed_temp_files);
    }
}

pub fn print_failure(error: &anyhow::Error) {
    println!("{} {:#}", style("Download failed:").red().bold(), error);
}

pub fn is_quit(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case("q")
}

pub fn parse_yes_no(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Parse a numeric quality, falling back to `default` on anything else
///
/// The flag tells whether the fallback was used.
pub fn parse_quality(input: &str, default: u32) -> (u32, bool) {
    match input.trim().parse::<u32>() {
        Ok(q) if q > 0 => (q, false),
        _ => (default, true),
    }
}

fn join_choices(choices: &[u32]) -> String {
    choices.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("/")
}

/// Settings the prompt loop needs besides the pipeline
#[derive(Debug, Clone)]
pub struct PromptDefaults {
    pub download_dir: PathBuf,
    pub video_quality: u32,
    pub audio_bitrate: u32,
}

impl PromptDefaults {
    pub fn from_config(config: &Config, download_dir: PathBuf) -> Self {
        Self {
            download_dir,
            video_quality: config.app.default_video_quality,
            audio_bitrate: config.app.default_audio_bitrate,
        }
    }
}

/// Where the prompt loop gets its answers
///
/// `None` means input ended and the loop should stop.
#[async_trait]
pub trait Prompter: Send {
    async fn input(&mut self, question: &str) -> Result<Option<String>>;

    async fn confirm(&mut self, question: &str) -> Result<Option<bool>>;
}

/// Plain line reader, used when stdin is piped
pub struct LinePrompter<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> LinePrompter<R> {
    pub fn new(input: R) -> Self {
        Self { lines: input.lines() }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Prompter for LinePrompter<R> {
    async fn input(&mut self, question: &str) -> Result<Option<String>> {
        print!("{} ", style(format!("{}:", question)).bold());
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?.map(|l| l.trim().to_string()))
    }

    async fn confirm(&mut self, question: &str) -> Result<Option<bool>> {
        let answer = self.input(&format!("{} (y/n)", question)).await?;
        Ok(answer.map(|a| parse_yes_no(&a)))
    }
}

/// dialoguer prompts for an interactive terminal
pub struct TerminalPrompter;

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn input(&mut self, question: &str) -> Result<Option<String>> {
        let question = question.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt(question)
                .allow_empty(true)
                .interact_text()
        })
        .await??;
        Ok(Some(answer.trim().to_string()))
    }

    async fn confirm(&mut self, question: &str) -> Result<Option<bool>> {
        let question = question.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(question)
                .default(false)
                .interact_opt()
        })
        .await??;
        Ok(answer)
    }
}

/// Prompt for requests until the user types `q` or input ends
///
/// Errors from a request are printed and the loop goes back to waiting for a URL.
pub async fn interactive_loop<P: Prompter>(
    prompter: &mut P,
    pipeline: Arc<DownloadPipeline>,
    defaults: &PromptDefaults,
    quiet: bool,
) -> Result<()> {
    println!(
        "QuickGrab - saving to {} (type 'q' to quit)",
        defaults.download_dir.display()
    );

    loop {
        let Some(url) = prompter.input("URL").await? else { break };
        if url.is_empty() {
            continue;
        }
        if is_quit(&url) {
            println!("Bye.");
            break;
        }

        let Some(audio_only) = prompter.confirm("Audio only?").await? else { break };
        let kind = if audio_only {
            OutputKind::Audio
        } else {
            OutputKind::Video
        };

        let (question, default) = match kind {
            OutputKind::Audio => (
                format!("Audio bitrate in kbps ({})", join_choices(AUDIO_BITRATES)),
                defaults.audio_bitrate,
            ),
            OutputKind::Video => (
                format!("Video quality ({})", join_choices(VIDEO_QUALITIES)),
                defaults.video_quality,
            ),
        };
        let Some(answer) = prompter.input(&question).await? else { break };
        let (quality, fell_back) = parse_quality(&answer, default);
        if fell_back {
            println!("Invalid quality, using {}", quality);
        }

        let request = DownloadRequest {
            url,
            directory: defaults.download_dir.clone(),
            kind,
            quality,
        };

        println!("Starting download...");
        match run_with_progress(Arc::clone(&pipeline), request, quiet).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => {
                tracing::debug!("Request failed: {:?}", e);
                print_failure(&e);
            }
        }
        println!();
    }

    Ok(())
}
