//! Source manager
//!
//! Tracks the state of the three independent sources and toggles them on
//! and off through a [`MediaDevices`] provider.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::capture::{MediaDevices, MediaStream, MediaTrack};
use crate::types::{Frame, SourceKind};

/// Playable sink for a video stream
///
/// Samples the live frame of the stream's first video track so the
/// compositor can draw it.
#[derive(Debug, Clone)]
pub struct VideoSink {
    track: MediaTrack,
    width: u32,
    height: u32,
}

impl VideoSink {
    /// Attach to the first video track of `stream`
    pub fn attach(stream: &MediaStream) -> Option<Self> {
        let track = stream.video_tracks().next()?.clone();
        let (width, height) = track.settings().unwrap_or((0, 0));
        Some(Self {
            track,
            width,
            height,
        })
    }

    /// Current renderable frame, if the source has produced one
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        if !self.track.is_live() {
            return None;
        }
        self.track.latest_frame().filter(|f| !f.is_empty())
    }

    /// Native width from the track settings
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Native height from the track settings
    pub fn height(&self) -> u32 {
        self.height
    }
}

/// A granted source
#[derive(Debug, Clone)]
pub struct ActiveSource {
    /// The live stream
    pub stream: MediaStream,
    /// Video sink, for camera and screen
    pub video: Option<VideoSink>,
}

/// State of one source
#[derive(Debug, Clone, Default)]
pub enum SourceState {
    /// Not acquired
    #[default]
    Inactive,
    /// Acquired and live
    Active(ActiveSource),
    /// Last acquisition attempt failed
    Error {
        /// Reason reported by the device provider
        cause: String,
    },
}

impl SourceState {
    /// Whether the source is live
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    /// Summary without the handles
    pub fn status(&self) -> SourceStatus {
        match self {
            Self::Inactive => SourceStatus::Inactive,
            Self::Active(_) => SourceStatus::Active,
            Self::Error { .. } => SourceStatus::Error,
        }
    }

    fn release(&self) {
        if let Self::Active(active) = self {
            active.stream.stop_all();
        }
    }
}

/// Copyable summary of a [`SourceState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Inactive,
    Active,
    Error,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Active => write!(f, "active"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Per-kind state storage
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    audio: SourceState,
    camera: SourceState,
    screen: SourceState,
}

impl SourceTable {
    /// State for `kind`
    pub fn get(&self, kind: SourceKind) -> &SourceState {
        match kind {
            SourceKind::Audio => &self.audio,
            SourceKind::Camera => &self.camera,
            SourceKind::Screen => &self.screen,
        }
    }

    fn get_mut(&mut self, kind: SourceKind) -> &mut SourceState {
        match kind {
            SourceKind::Audio => &mut self.audio,
            SourceKind::Camera => &mut self.camera,
            SourceKind::Screen => &mut self.screen,
        }
    }

    /// Whether camera or screen is live
    pub fn has_visual(&self) -> bool {
        self.camera.is_active() || self.screen.is_active()
    }
}

/// What the compositor needs from the sources for one tick
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    /// Screen frame, if the screen is active and has produced one
    pub screen: Option<Arc<Frame>>,
    /// Camera frame, if the camera is active and has produced one
    pub camera: Option<Arc<Frame>>,
    /// Whether audio is active
    pub audio: bool,
}

/// Acquires and releases the three sources
pub struct SourceManager<D> {
    devices: Arc<D>,
    table: Arc<RwLock<SourceTable>>,
    toggles: [tokio::sync::Mutex<()>; 3],
}

impl<D: MediaDevices> SourceManager<D> {
    /// Create a manager with every source inactive
    pub fn new(devices: Arc<D>) -> Self {
        Self {
            devices,
            table: Arc::new(RwLock::new(SourceTable::default())),
            toggles: Default::default(),
        }
    }

    /// Device provider
    pub fn devices(&self) -> &Arc<D> {
        &self.devices
    }

    /// Toggle a source
    ///
    /// An active source is released and becomes inactive. Otherwise the
    /// source is acquired; a refusal leaves it in the error state until the
    /// next toggle. Toggles of the same kind are serialized.
    pub async fn toggle(&self, kind: SourceKind) -> SourceStatus {
        let _serial = self.toggles[Self::slot(kind)].lock().await;

        {
            let mut table = self.table.write();
            let state = table.get_mut(kind);
            if state.is_active() {
                state.release();
                *state = SourceState::Inactive;
                info!("Source {} deactivated", kind);
                return SourceStatus::Inactive;
            }
        }

        let next = match self.devices.get_user_media(kind, kind.constraints()).await {
            Ok(stream) => {
                let video = if kind.is_visual() {
                    VideoSink::attach(&stream)
                } else {
                    None
                };
                info!("Source {} active ({} tracks)", kind, stream.tracks().len());
                SourceState::Active(ActiveSource { stream, video })
            }
            Err(e) => {
                warn!("Failed to acquire {}: {}", kind, e);
                SourceState::Error {
                    cause: e.to_string(),
                }
            }
        };

        let status = next.status();
        *self.table.write().get_mut(kind) = next;
        status
    }

    /// Release every acquired source
    pub fn release_all(&self) {
        let mut table = self.table.write();
        for kind in SourceKind::ALL {
            let state = table.get_mut(kind);
            if state.is_active() {
                state.release();
                info!("Source {} released", kind);
            }
            *state = SourceState::Inactive;
        }
    }

    /// Current state of one source
    pub fn state(&self, kind: SourceKind) -> SourceState {
        self.table.read().get(kind).clone()
    }

    /// Whether one source is live
    pub fn is_active(&self, kind: SourceKind) -> bool {
        self.table.read().get(kind).is_active()
    }

    /// Whether camera or screen is live
    pub fn has_visual(&self) -> bool {
        self.table.read().has_visual()
    }

    /// Status of every source, in toolbar order
    pub fn statuses(&self) -> Vec<(SourceKind, SourceStatus)> {
        let table = self.table.read();
        SourceKind::ALL
            .iter()
            .map(|kind| (*kind, table.get(*kind).status()))
            .collect()
    }

    /// Live stream of the audio source
    pub fn audio_stream(&self) -> Option<MediaStream> {
        match self.table.read().get(SourceKind::Audio) {
            SourceState::Active(active) => Some(active.stream.clone()),
            _ => None,
        }
    }

    /// Shared table, for readers such as the compositor loop
    pub fn table(&self) -> Arc<RwLock<SourceTable>> {
        self.table.clone()
    }

    fn slot(kind: SourceKind) -> usize {
        match kind {
            SourceKind::Audio => 0,
            SourceKind::Camera => 1,
            SourceKind::Screen => 2,
        }
    }
}

/// Take the frames needed for one compositor tick
pub fn snapshot(table: &RwLock<SourceTable>) -> SourceSnapshot {
    let table = table.read();
    let frame_of = |kind: SourceKind| match table.get(kind) {
        SourceState::Active(ActiveSource {
            video: Some(sink), ..
        }) => sink.current_frame(),
        _ => None,
    };
    SourceSnapshot {
        screen: frame_of(SourceKind::Screen),
        camera: frame_of(SourceKind::Camera),
        audio: table.get(SourceKind::Audio).is_active(),
    }
}
