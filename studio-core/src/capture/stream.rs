//! Live media streams and tracks
//!
//! A [`MediaStream`] is an ordered set of [`MediaTrack`]s. Tracks are cheap
//! shared handles: the source manager, the recorder's output stream and the
//! encoder all hold clones of the same track. The producing side keeps a
//! [`VideoTrackWriter`] or [`AudioTrackWriter`] and publishes into it until
//! the track is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::types::{AudioFormat, AudioFrame, Frame, Handle};

/// Audio blocks buffered per subscriber before lagging
const AUDIO_CHANNEL_CAPACITY: usize = 64;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Audio samples
    Audio,
    /// Video frames
    Video,
}

enum TrackMedia {
    Video {
        frames: watch::Receiver<Option<Arc<Frame>>>,
        settings: (u32, u32),
    },
    Audio {
        blocks: broadcast::Sender<Arc<AudioFrame>>,
        format: AudioFormat,
    },
}

struct TrackInner {
    id: Handle,
    label: String,
    ended: AtomicBool,
    stop_tx: watch::Sender<bool>,
    media: TrackMedia,
}

/// Shared handle to one live track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a video track with the given native settings
    pub fn video(label: impl Into<String>, width: u32, height: u32) -> (Self, VideoTrackWriter) {
        let (frame_tx, frame_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = watch::channel(false);
        let track = Self {
            inner: Arc::new(TrackInner {
                id: Handle::new(),
                label: label.into(),
                ended: AtomicBool::new(false),
                stop_tx,
                media: TrackMedia::Video {
                    frames: frame_rx,
                    settings: (width, height),
                },
            }),
        };
        let writer = VideoTrackWriter {
            frames: frame_tx,
            stop_rx,
        };
        (track, writer)
    }

    /// Create an audio track
    pub fn audio(label: impl Into<String>, format: AudioFormat) -> (Self, AudioTrackWriter) {
        let (blocks, _) = broadcast::channel(AUDIO_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let track = Self {
            inner: Arc::new(TrackInner {
                id: Handle::new(),
                label: label.into(),
                ended: AtomicBool::new(false),
                stop_tx,
                media: TrackMedia::Audio {
                    blocks: blocks.clone(),
                    format,
                },
            }),
        };
        let writer = AudioTrackWriter { blocks, stop_rx };
        (track, writer)
    }

    /// Unique track ID
    pub fn id(&self) -> Handle {
        self.inner.id
    }

    /// Human-readable label
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Track kind
    pub fn kind(&self) -> TrackKind {
        match self.inner.media {
            TrackMedia::Video { .. } => TrackKind::Video,
            TrackMedia::Audio { .. } => TrackKind::Audio,
        }
    }

    /// Whether the track is still live
    pub fn is_live(&self) -> bool {
        !self.inner.ended.load(Ordering::SeqCst)
    }

    /// Stop the track and signal its producer to release the device
    ///
    /// Stopping an already-ended track does nothing.
    pub fn stop(&self) {
        if !self.inner.ended.swap(true, Ordering::SeqCst) {
            self.inner.stop_tx.send_replace(true);
            debug!("Track {} ({}) stopped", self.inner.id, self.inner.label);
        }
    }

    /// Native video dimensions reported at acquisition time
    pub fn settings(&self) -> Option<(u32, u32)> {
        match &self.inner.media {
            TrackMedia::Video { settings, .. } => Some(*settings),
            TrackMedia::Audio { .. } => None,
        }
    }

    /// Audio format, for audio tracks
    pub fn audio_format(&self) -> Option<AudioFormat> {
        match &self.inner.media {
            TrackMedia::Audio { format, .. } => Some(*format),
            TrackMedia::Video { .. } => None,
        }
    }

    /// Most recent frame of a video track
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        match &self.inner.media {
            TrackMedia::Video { frames, .. } => frames.borrow().clone(),
            TrackMedia::Audio { .. } => None,
        }
    }

    /// Watch the frames of a video track
    pub fn subscribe_video(&self) -> Option<watch::Receiver<Option<Arc<Frame>>>> {
        match &self.inner.media {
            TrackMedia::Video { frames, .. } => Some(frames.clone()),
            TrackMedia::Audio { .. } => None,
        }
    }

    /// Receive the sample blocks of an audio track
    pub fn subscribe_audio(&self) -> Option<broadcast::Receiver<Arc<AudioFrame>>> {
        match &self.inner.media {
            TrackMedia::Audio { blocks, .. } => Some(blocks.subscribe()),
            TrackMedia::Video { .. } => None,
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("kind", &self.kind())
            .field("live", &self.is_live())
            .finish()
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

/// Producer side of a video track
pub struct VideoTrackWriter {
    frames: watch::Sender<Option<Arc<Frame>>>,
    stop_rx: watch::Receiver<bool>,
}

impl VideoTrackWriter {
    /// Publish a new frame, replacing the previous one
    ///
    /// Returns `false` once the track has been stopped.
    pub fn publish(&self, frame: Arc<Frame>) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.frames.send_replace(Some(frame));
        true
    }

    /// Whether the consumer stopped the track or dropped every handle to it
    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow() || self.stop_rx.has_changed().is_err()
    }

    /// Wait until the track is stopped
    pub async fn stopped(&mut self) {
        // An error means the track handle is gone, which also ends the track.
        let _ = self.stop_rx.wait_for(|stopped| *stopped).await;
    }
}

/// Producer side of an audio track
pub struct AudioTrackWriter {
    blocks: broadcast::Sender<Arc<AudioFrame>>,
    stop_rx: watch::Receiver<bool>,
}

impl AudioTrackWriter {
    /// Publish a block of samples
    ///
    /// Returns `false` once the track has been stopped.
    pub fn publish(&self, block: AudioFrame) -> bool {
        if self.is_stopped() {
            return false;
        }
        // No subscribers is fine: nobody is recording yet.
        let _ = self.blocks.send(Arc::new(block));
        true
    }

    /// Whether the consumer stopped the track or dropped every handle to it
    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow() || self.stop_rx.has_changed().is_err()
    }

    /// Wait until the track is stopped
    pub async fn stopped(&mut self) {
        let _ = self.stop_rx.wait_for(|stopped| *stopped).await;
    }
}

/// Ordered set of tracks
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: Handle,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self {
            id: Handle::new(),
            tracks: Vec::new(),
        }
    }

    /// Create a stream from tracks
    pub fn from_tracks(tracks: impl IntoIterator<Item = MediaTrack>) -> Self {
        Self {
            id: Handle::new(),
            tracks: tracks.into_iter().collect(),
        }
    }

    /// Stream ID
    pub fn id(&self) -> Handle {
        self.id
    }

    /// Add a track, ignoring duplicates
    pub fn add_track(&mut self, track: MediaTrack) {
        if !self.tracks.contains(&track) {
            self.tracks.push(track);
        }
    }

    /// All tracks in insertion order
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Video tracks only
    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    /// Audio tracks only
    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    /// Whether the stream has no tracks
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stop every track in the stream
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}
