use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "quickgrab",
    about = "QuickGrab - Download video or audio from YouTube and other sites, ready for any player",
    version,
    long_about = "Downloads media with yt-dlp and re-encodes video with ffmpeg (H.264/AAC, faststart) so it plays everywhere, QuickTime included. Run without a subcommand for the interactive prompt."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file to use instead of the default locations
    #[arg(long, global = true, env = "QUICKGRAB_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to the ffmpeg binary
    #[arg(long, global = true, env = "QUICKGRAB_FFMPEG", value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Path to the yt-dlp binary
    #[arg(long = "yt-dlp", global = true, env = "QUICKGRAB_YT_DLP", value_name = "PATH")]
    pub yt_dlp: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a single URL
    Download {
        /// Page URL of the video
        #[arg(value_name = "URL")]
        url: String,

        /// Only keep the audio, as MP3
        #[arg(short, long)]
        audio: bool,

        /// Max video height (720, 1080, 1440, 2160) or MP3 bitrate in kbps with --audio
        #[arg(long, value_name = "N")]
        quality: Option<u32>,

        /// Directory to save into (defaults to the configured download directory)
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write a default config file
        #[arg(long)]
        init: bool,
    },

    /// Show which yt-dlp and ffmpeg will be used
    Tools,
}
