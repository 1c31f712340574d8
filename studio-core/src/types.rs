//! Core types for Studio
//!
//! These types represent the fundamental data structures shared by the
//! source manager, the compositor and the recorder.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global handle counter for unique stream/track/URL IDs
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque unique handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Create a new unique handle
    pub fn new() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// One independently toggleable media input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Microphone audio
    Audio,
    /// Camera video
    Camera,
    /// Screen-capture video
    Screen,
}

impl SourceKind {
    /// All source kinds, in toolbar order
    pub const ALL: [SourceKind; 3] = [SourceKind::Audio, SourceKind::Camera, SourceKind::Screen];

    /// Fixed constraint set requested for this source
    pub fn constraints(&self) -> MediaConstraints {
        match self {
            Self::Audio => MediaConstraints {
                audio: true,
                video: None,
            },
            Self::Camera => MediaConstraints {
                audio: false,
                video: Some(VideoConstraint::Camera),
            },
            Self::Screen => MediaConstraints {
                audio: false,
                video: Some(VideoConstraint::Display),
            },
        }
    }

    /// Whether this source contributes pixels to the canvas
    pub fn is_visual(&self) -> bool {
        !matches!(self, Self::Audio)
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Camera => "camera",
            Self::Screen => "screen",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "audio" | "mic" | "microphone" => Ok(Self::Audio),
            "camera" | "cam" | "webcam" => Ok(Self::Camera),
            "screen" | "display" => Ok(Self::Screen),
            _ => Err(format!("Unknown source: {}", s)),
        }
    }
}

/// What kind of video a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoConstraint {
    /// A camera device
    Camera,
    /// Display/screen capture
    Display,
}

/// Constraint descriptor passed to the device provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Request an audio track
    pub audio: bool,
    /// Request a video track of the given kind
    pub video: Option<VideoConstraint>,
}

/// RGBA8 video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Tightly packed RGBA pixels, `width * height * 4` bytes
    pub data: Vec<u8>,
    /// Presentation timestamp in nanoseconds
    pub pts: u64,
}

impl Frame {
    /// Create a fully transparent frame
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
            pts: 0,
        }
    }

    /// Create a frame filled with one color
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            data,
            pts: 0,
        }
    }

    /// Set the presentation timestamp
    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = pts;
        self
    }

    /// Row stride in bytes
    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }

    /// Read one pixel, `None` when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.stride() + x as usize * 4;
        let px = self.data.get(idx..idx + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Whether the frame has no pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Audio format information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 48000)
    pub sample_rate: u32,
    /// Number of channels (1=mono, 2=stereo)
    pub channels: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// Block of interleaved f32 audio samples
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Audio format
    pub format: AudioFormat,
    /// Interleaved samples
    pub samples: Vec<f32>,
    /// Presentation timestamp in nanoseconds
    pub pts: u64,
    /// Number of samples per channel
    pub sample_count: u32,
}

impl AudioFrame {
    /// Create a new audio frame
    pub fn new(format: AudioFormat, samples: Vec<f32>, pts: u64) -> Self {
        let sample_count = (samples.len() / format.channels.max(1) as usize) as u32;
        Self {
            format,
            samples,
            pts,
            sample_count,
        }
    }

    /// Duration of this frame in nanoseconds
    pub fn duration_ns(&self) -> u64 {
        (self.sample_count as u64 * 1_000_000_000) / self.format.sample_rate.max(1) as u64
    }
}
