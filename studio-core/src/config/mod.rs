//! Configuration types for Studio
//!
//! Provides the canvas resolution presets and runtime configuration.

mod file;

pub use file::{sample_config, ConfigFile};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::compose::OverlayMargin;

pub use crate::encode::WEBM_MIME_TYPE;

/// Interval between encoded chunks
pub const TIMESLICE: Duration = Duration::from_secs(1);

/// Filename every recording is downloaded as
pub const RECORDING_FILENAME: &str = "test.webm";

/// Canvas resolution preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Resolution {
    /// 1920x1080
    #[serde(rename = "1080p")]
    P1080,
    /// 1280x720 (default)
    #[default]
    #[serde(rename = "720p")]
    P720,
}

impl Resolution {
    /// All presets, largest first
    pub const ALL: [Resolution; 2] = [Resolution::P1080, Resolution::P720];

    /// Get width in pixels
    pub fn width(&self) -> u32 {
        match self {
            Self::P1080 => 1920,
            Self::P720 => 1280,
        }
    }

    /// Get height in pixels
    pub fn height(&self) -> u32 {
        match self {
            Self::P1080 => 1080,
            Self::P720 => 720,
        }
    }

    /// Get resolution as (width, height) tuple
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Preset name as used in config files and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Self::P1080 => "1080p",
            Self::P720 => "720p",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1080p" | "1920x1080" | "fhd" => Ok(Self::P1080),
            "720p" | "1280x720" | "hd" => Ok(Self::P720),
            _ => Err(format!("Unknown resolution: {}", s)),
        }
    }
}

/// Runtime configuration
///
/// The chunk interval, media type and filename of recordings are fixed; see
/// [`TIMESLICE`], [`WEBM_MIME_TYPE`] and [`RECORDING_FILENAME`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioConfig {
    /// Canvas size
    pub resolution: Resolution,
    /// Compositor ticks per second
    pub refresh_rate: u32,
    /// Rate at which the encoder samples video tracks
    pub capture_fps: u32,
    /// Delay before the download link and URL are released
    pub cleanup_delay: Duration,
    /// Target VP8 bitrate in kbps
    pub video_bitrate: u32,
    /// Camera overlay offset from the bottom-right corner
    pub overlay_margin: OverlayMargin,
    /// Where downloads are written
    pub download_dir: PathBuf,
}

/// Directory downloads land in when nothing else is configured
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            refresh_rate: 60,
            capture_fps: 30,
            cleanup_delay: Duration::from_millis(100),
            video_bitrate: 2500,
            overlay_margin: OverlayMargin::default(),
            download_dir: default_download_dir(),
        }
    }
}

impl StudioConfig {
    /// Set the canvas resolution
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the compositor refresh rate
    pub fn with_refresh_rate(mut self, hz: u32) -> Self {
        self.refresh_rate = hz;
        self
    }

    /// Set the encoder's video sampling rate
    pub fn with_capture_fps(mut self, fps: u32) -> Self {
        self.capture_fps = fps;
        self
    }

    /// Set the link cleanup delay
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// Set the VP8 bitrate in kbps
    pub fn with_video_bitrate(mut self, kbps: u32) -> Self {
        self.video_bitrate = kbps;
        self
    }

    /// Set the camera overlay margin
    pub fn with_overlay_margin(mut self, margin: OverlayMargin) -> Self {
        self.overlay_margin = margin;
        self
    }

    /// Set the download directory
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Canvas width
    pub fn width(&self) -> u32 {
        self.resolution.width()
    }

    /// Canvas height
    pub fn height(&self) -> u32 {
        self.resolution.height()
    }

    /// Validate the configuration and return any warnings
    ///
    /// An empty list means the configuration looks good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.capture_fps > self.refresh_rate {
            warnings.push(format!(
                "Capture rate {} fps exceeds the compositor refresh rate {} Hz; frames will repeat.",
                self.capture_fps, self.refresh_rate
            ));
        }

        let (width, height) = self.resolution.dimensions();
        if self.video_bitrate < 500 && width * height >= 1920 * 1080 {
            warnings.push(format!(
                "Video bitrate {} kbps is low for {}; expect visible artifacts.",
                self.video_bitrate, self.resolution
            ));
        }

        warnings
    }

    /// Validate and return an error if configuration is invalid
    ///
    /// Unlike `validate()` which returns warnings, this returns hard errors
    /// for configurations that cannot work.
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.refresh_rate == 0 || self.refresh_rate > 240 {
            return Err(format!(
                "Refresh rate {} must be between 1 and 240",
                self.refresh_rate
            ));
        }

        if self.capture_fps == 0 || self.capture_fps > 120 {
            return Err(format!(
                "Capture rate {} must be between 1 and 120",
                self.capture_fps
            ));
        }

        if !(100..=50_000).contains(&self.video_bitrate) {
            return Err(format!(
                "Video bitrate {} kbps must be between 100 and 50000",
                self.video_bitrate
            ));
        }

        Ok(())
    }
}
