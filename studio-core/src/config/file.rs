//! Configuration file loading and merging
//!
//! Loads user configuration from `~/.config/studio/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{default_download_dir, Resolution, StudioConfig};
use crate::compose::OverlayMargin;
use crate::error::{Result, StudioError};

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Canvas settings
    #[serde(default)]
    pub canvas: CanvasSettings,

    /// Recording settings
    #[serde(default)]
    pub recording: RecordingSettings,

    /// Camera overlay settings
    #[serde(default)]
    pub overlay: OverlaySettings,

    /// Download settings
    #[serde(default)]
    pub output: OutputSettings,
}

/// Canvas and compositor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasSettings {
    /// Resolution preset ("1080p" or "720p")
    #[serde(default = "default_resolution")]
    pub resolution: String,

    /// Compositor ticks per second
    #[serde(default = "default_refresh_rate")]
    pub refresh_rate: u32,
}

/// Encoder settings
///
/// Chunk interval, media type and filename are not configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    /// Video sampling rate
    #[serde(default = "default_capture_fps")]
    pub capture_fps: u32,

    /// VP8 bitrate in kbps
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: u32,
}

/// Camera overlay placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlaySettings {
    /// Horizontal push to the right, in pixels
    #[serde(default = "default_margin_x")]
    pub margin_x: f64,

    /// Vertical push upwards, in pixels
    #[serde(default = "default_margin_y")]
    pub margin_y: f64,
}

/// Where finished recordings go
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Download directory (unset = system download directory)
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

fn default_resolution() -> String {
    "720p".to_string()
}

fn default_refresh_rate() -> u32 {
    60
}

fn default_capture_fps() -> u32 {
    30
}

fn default_video_bitrate() -> u32 {
    2500
}

fn default_margin_x() -> f64 {
    20.0
}

fn default_margin_y() -> f64 {
    15.0
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            refresh_rate: default_refresh_rate(),
        }
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            capture_fps: default_capture_fps(),
            video_bitrate: default_video_bitrate(),
        }
    }
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            margin_x: default_margin_x(),
            margin_y: default_margin_y(),
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("studio").join("config.toml")
        } else if let Some(home) = dirs::home_dir() {
            home.join(".config").join("studio").join("config.toml")
        } else {
            PathBuf::from("/etc/studio/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| StudioError::config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| StudioError::config(format!("Failed to parse config file: {}", e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StudioError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| StudioError::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| StudioError::config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Convert into a runtime configuration
    ///
    /// Fails on values that cannot work, such as an unknown resolution.
    pub fn into_studio_config(self) -> Result<StudioConfig> {
        let resolution: Resolution = self.canvas.resolution.parse().map_err(StudioError::config)?;

        let config = StudioConfig {
            resolution,
            refresh_rate: self.canvas.refresh_rate,
            capture_fps: self.recording.capture_fps,
            video_bitrate: self.recording.video_bitrate,
            overlay_margin: OverlayMargin {
                x: self.overlay.margin_x,
                y: self.overlay.margin_y,
            },
            download_dir: self.output.download_dir.unwrap_or_else(default_download_dir),
            ..StudioConfig::default()
        };

        config.validate_strict().map_err(StudioError::config)?;
        for warning in config.validate() {
            warn!("{}", warning);
        }
        Ok(config)
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# Studio Configuration

[canvas]
# Canvas resolution: 1080p, 720p
resolution = "720p"

# Compositor ticks per second
refresh_rate = 60

[recording]
# Recordings are flushed once per second and saved as test.webm (video/webm)

# Rate at which video is sampled into the recording
capture_fps = 30

# VP8 bitrate in kbps
video_bitrate = 2500

[overlay]
# Camera circle offset from the bottom-right corner, in pixels
margin_x = 20.0
margin_y = 15.0

[output]
# Download directory (defaults to the system download directory)
# download_dir = "/home/me/Videos"
"#
    .to_string()
}
