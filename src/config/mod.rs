use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Locations of external tools
    pub tools: ToolsConfig,

    /// Application settings
    pub app: AppConfig,

    /// ffmpeg re-encode settings for video downloads
    pub transcode: TranscodeConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Path to the yt-dlp binary (looked up in PATH if unset)
    pub yt_dlp: Option<PathBuf>,

    /// Path to the ffmpeg binary (looked up in PATH if unset)
    pub ffmpeg: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory downloads are written to, relative paths resolve against the cwd
    pub download_dir: PathBuf,

    /// Video height used when the quality prompt gets invalid input
    pub default_video_quality: u32,

    /// MP3 bitrate in kbps used when the quality prompt gets invalid input
    pub default_audio_bitrate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,

    /// Move the moov atom to the front for progressive playback
    pub faststart: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            default_video_quality: 720,
            default_audio_bitrate: 192,
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "slow".to_string(),
            crf: 22,
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            faststart: true,
        }
    }
}

impl Config {
    /// Load configuration from an explicit path or the default locations
    ///
    /// A missing file is not an error: defaults are used and nothing is written.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file does not exist: {}", path.display());
                }
                path.to_path_buf()
            }
            None => match Self::config_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        tracing::debug!("Loading config from {}", config_path.display());
        let content = fs_err::read_to_string(&config_path)
            .context("Failed to read config file")?;

        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Write this configuration to `path` (or the default location)
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::user_config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(config_path)
    }

    /// Get configuration file path, preferring one in the current directory
    fn config_path() -> Option<PathBuf> {
        let local_config = PathBuf::from("quickgrab.yaml");
        if local_config.exists() {
            return Some(local_config);
        }

        Self::user_config_path().ok()
    }

    fn user_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("quickgrab").join("config.yaml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.transcode.crf > 51 {
            anyhow::bail!("transcode.crf must be between 0 and 51, got {}", self.transcode.crf);
        }

        if self.transcode.video_codec.trim().is_empty() || self.transcode.audio_codec.trim().is_empty() {
            anyhow::bail!("transcode codecs must not be empty");
        }

        if self.app.default_video_quality == 0 || self.app.default_audio_bitrate == 0 {
            anyhow::bail!("default qualities must be greater than zero");
        }

        Ok(())
    }

    /// Resolve the download directory against the current directory
    pub fn download_dir(&self) -> Result<PathBuf> {
        if self.app.download_dir.is_absolute() {
            Ok(self.app.download_dir.clone())
        } else {
            Ok(std::env::current_dir()?.join(&self.app.download_dir))
        }
    }

    /// Same as [`Config::download_dir`], creating the directory if needed
    pub fn ensure_download_dir(&self) -> Result<PathBuf> {
        let dir = self.download_dir()?;
        fs_err::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Display current configuration
    pub fn display(&self) {
        let show = |path: &Option<PathBuf>| {
            path.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(from PATH)".to_string())
        };

        println!("Current Configuration:");
        println!("  yt-dlp: {}", show(&self.tools.yt_dlp));
        println!("  ffmpeg: {}", show(&self.tools.ffmpeg));
        println!("  Download Dir: {}", self.app.download_dir.display());
        println!("  Default Video Quality: {}p", self.app.default_video_quality);
        println!("  Default Audio Bitrate: {} kbps", self.app.default_audio_bitrate);
        println!(
            "  Transcode: {} preset={} crf={} / {} {}",
            self.transcode.video_codec,
            self.transcode.preset,
            self.transcode.crf,
            self.transcode.audio_codec,
            self.transcode.audio_bitrate
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml("app:\n  default_video_quality: 1080\n").unwrap();

        assert_eq!(config.app.default_video_quality, 1080);
        assert_eq!(config.app.default_audio_bitrate, 192);
        assert_eq!(config.app.download_dir, PathBuf::from("downloads"));
        assert_eq!(config.transcode.crf, 22);
        assert!(config.tools.ffmpeg.is_none());
    }

    #[test]
    fn test_tool_overrides() {
        let config = Config::from_yaml("tools:\n  ffmpeg: /opt/homebrew/bin/ffmpeg\n").unwrap();
        assert_eq!(config.tools.ffmpeg, Some(PathBuf::from("/opt/homebrew/bin/ffmpeg")));
    }

    #[test]
    fn test_rejects_out_of_range_crf() {
        assert!(Config::from_yaml("transcode:\n  crf: 60\n").is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.transcode.preset = "fast".to_string();
        config.save(Some(&path)).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.transcode.preset, "fast");
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
    }

    #[test]
    fn test_download_dir_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.app.download_dir = dir.path().join("later");

        assert_eq!(config.download_dir().unwrap(), dir.path().join("later"));
        assert!(!dir.path().join("later").exists());

        assert_eq!(config.ensure_download_dir().unwrap(), dir.path().join("later"));
        assert!(dir.path().join("later").is_dir());
    }
}
