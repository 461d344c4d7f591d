use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quickgrab::cli::{Cli, Commands};
use quickgrab::config::Config;
use quickgrab::pipeline::{DownloadPipeline, DownloadRequest, OutputKind};
use quickgrab::tools::ToolPaths;
use quickgrab::ui::{self, LinePrompter, PromptDefaults, TerminalPrompter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "quickgrab=debug" } else { "quickgrab=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.command {
        // --init may point at a file that does not exist yet
        Some(Commands::Config { init: true, .. }) => Config::default(),
        _ => Config::load(cli.config.as_deref())?,
    };
    let tools = ToolPaths::locate(cli.yt_dlp.clone(), cli.ffmpeg.clone(), &config.tools);

    match cli.command {
        None => {
            let download_dir = config.ensure_download_dir()?;
            let pipeline = Arc::new(DownloadPipeline::from_tools(&tools, &config));
            let defaults = PromptDefaults::from_config(&config, download_dir);

            if std::io::stdin().is_terminal() {
                ui::interactive_loop(&mut TerminalPrompter, pipeline, &defaults, cli.quiet).await?;
            } else {
                let mut prompter = LinePrompter::new(tokio::io::BufReader::new(tokio::io::stdin()));
                ui::interactive_loop(&mut prompter, pipeline, &defaults, cli.quiet).await?;
            }
        }
        Some(Commands::Download {
            url,
            audio,
            quality,
            output_dir,
        }) => {
            let (kind, default_quality) = if audio {
                (OutputKind::Audio, config.app.default_audio_bitrate)
            } else {
                (OutputKind::Video, config.app.default_video_quality)
            };

            // Created by the pipeline once the tools check out
            let directory = match output_dir {
                Some(dir) => dir,
                None => config.download_dir()?,
            };

            let request = DownloadRequest {
                url,
                directory,
                kind,
                quality: quality.unwrap_or(default_quality),
            };

            let pipeline = Arc::new(DownloadPipeline::from_tools(&tools, &config));
            let outcome = ui::run_with_progress(pipeline, request, cli.quiet)
                .await
                .context("Download or conversion failed")?;
            ui::print_outcome(&outcome);
        }
        Some(Commands::Config { show, init }) => {
            if init {
                let path = config.save(cli.config.as_deref())?;
                println!("Config written to: {}", path.display());
            }
            if show || !init {
                config.display();
            }
        }
        Some(Commands::Tools) => {
            println!("External tools:");
            for info in tools.describe().await {
                match info.version {
                    Some(version) => println!("  • {} {} ({})", info.kind.as_str(), version, info.path.display()),
                    None => println!("  • {} NOT AVAILABLE (tried {})", info.kind.as_str(), info.path.display()),
                }
            }
        }
    }

    Ok(())
}
