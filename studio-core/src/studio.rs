//! Studio orchestrator
//!
//! Ties the source manager, the canvas and its compositor loop, and the
//! recorder together behind the operations a toolbar exposes.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capture::{MediaDevices, SourceManager, SourceStatus};
use crate::compose::{Canvas, Compositor, CompositorHandle, CompositorStats, SharedCanvas};
use crate::config::{Resolution, StudioConfig};
use crate::encode::{EncoderFactory, WebmConfig, WebmEncoderFactory};
use crate::error::{Result, StudioError};
use crate::output::DownloadSink;
use crate::recorder::{RecordedFile, Recorder, RecorderSettings, RecorderState, RecordingInputs};
use crate::types::{Frame, Handle, SourceKind};

/// One row of the source toolbar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub kind: SourceKind,
    pub status: SourceStatus,
}

/// Point-in-time view of the studio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioStatus {
    /// Studio instance ID
    pub id: u64,
    /// Selected resolution
    pub resolution: Resolution,
    /// Whether the canvas is mounted and the loop running
    pub mounted: bool,
    pub sources: Vec<SourceEntry>,
    pub recorder: RecorderState,
    /// Non-empty chunks collected in the current recording
    pub chunks: usize,
    /// Bytes collected in the current recording
    pub buffered_bytes: usize,
    /// Recorded time of the current recording, excluding pauses
    pub recorded_ms: u64,
    /// Compositor ticks since mount
    pub ticks: u64,
}

/// Recording studio
pub struct Studio<D> {
    handle: Handle,
    config: StudioConfig,
    sources: SourceManager<D>,
    canvas: SharedCanvas,
    compositor: Compositor,
    compositor_loop: Option<CompositorHandle>,
    recorder: Recorder,
}

impl<D: MediaDevices> Studio<D> {
    /// Create a studio recording WebM
    pub fn new(config: StudioConfig, devices: Arc<D>, downloads: Arc<dyn DownloadSink>) -> Self {
        let encoders = Arc::new(WebmEncoderFactory::new(WebmConfig {
            fps: config.capture_fps,
            video_bitrate: config.video_bitrate,
            ..Default::default()
        }));
        Self::with_encoder(config, devices, downloads, encoders)
    }

    /// Create a studio with a custom encoder
    pub fn with_encoder(
        config: StudioConfig,
        devices: Arc<D>,
        downloads: Arc<dyn DownloadSink>,
        encoders: Arc<dyn EncoderFactory>,
    ) -> Self {
        let handle = Handle::new();
        info!(
            "Creating studio {} at {} ({} Hz)",
            handle, config.resolution, config.refresh_rate
        );
        Self {
            handle,
            compositor: Compositor::new(config.overlay_margin),
            recorder: Recorder::new(RecorderSettings::from(&config), encoders, downloads),
            sources: SourceManager::new(devices),
            canvas: Arc::new(Mutex::new(None)),
            compositor_loop: None,
            config,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn sources(&self) -> &SourceManager<D> {
        &self.sources
    }

    /// Create the canvas and start the compositor loop
    ///
    /// Returns `false` when already mounted.
    pub fn mount(&mut self) -> bool {
        if self.compositor_loop.is_some() {
            return false;
        }

        self.canvas
            .lock()
            .get_or_insert_with(|| Canvas::new(self.config.width(), self.config.height()));
        self.compositor_loop = Some(CompositorHandle::spawn(
            self.compositor.clone(),
            self.canvas.clone(),
            self.sources.table(),
            self.config.refresh_rate,
        ));
        info!(
            "Studio {} mounted {}x{} canvas",
            self.handle,
            self.config.width(),
            self.config.height()
        );
        true
    }

    pub fn is_mounted(&self) -> bool {
        self.compositor_loop.is_some()
    }

    /// Toggle a source on or off
    pub async fn toggle(&self, kind: SourceKind) -> SourceStatus {
        self.sources.toggle(kind).await
    }

    pub fn resolution(&self) -> Resolution {
        self.config.resolution
    }

    /// Change the canvas resolution
    ///
    /// Rejected while a recording exists, paused or not.
    pub fn set_resolution(&mut self, resolution: Resolution) -> Result<()> {
        if self.recorder.state().is_recording() {
            warn!("Ignoring resolution change to {} while recording", resolution);
            return Err(StudioError::ResolutionLocked);
        }

        self.config.resolution = resolution;
        if let Some(canvas) = self.canvas.lock().as_mut() {
            canvas.resize(resolution.width(), resolution.height());
        }
        info!("Resolution set to {}", resolution);
        Ok(())
    }

    /// Start recording the active sources
    ///
    /// Does nothing and returns `false` when already recording.
    pub fn record(&mut self) -> Result<bool> {
        if self.recorder.state().is_recording() {
            debug!("Already recording");
            return Ok(false);
        }

        let canvas = if self.sources.has_visual() {
            let capture = self.canvas.lock().as_mut().map(Canvas::capture_stream);
            if capture.is_none() {
                warn!("Canvas not mounted, recording without video");
            }
            capture
        } else {
            None
        };

        self.recorder.start(RecordingInputs {
            audio: self.sources.audio_stream(),
            canvas,
        })
    }

    /// Toggle pause; does nothing when idle
    pub fn pause(&mut self) -> Result<RecorderState> {
        self.recorder.pause()
    }

    /// Finish the recording and download it
    pub async fn stop(&mut self) -> Result<RecordedFile> {
        self.recorder.stop().await
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    /// Draw one composite frame right away
    ///
    /// Returns `false` when the canvas is not mounted.
    pub fn render_now(&self) -> bool {
        let table = self.sources.table();
        self.compositor.tick(&self.canvas, &table, 0)
    }

    /// Copy of the current canvas pixels
    pub fn canvas_frame(&self) -> Option<Frame> {
        self.canvas.lock().as_ref().map(|c| c.frame().clone())
    }

    /// Compositor loop counters, while mounted
    pub fn compositor_stats(&self) -> Option<Arc<CompositorStats>> {
        self.compositor_loop.as_ref().map(CompositorHandle::stats)
    }

    pub fn status(&self) -> StudioStatus {
        StudioStatus {
            id: self.handle.as_u64(),
            resolution: self.config.resolution,
            mounted: self.is_mounted(),
            sources: self
                .sources
                .statuses()
                .into_iter()
                .map(|(kind, status)| SourceEntry { kind, status })
                .collect(),
            recorder: self.recorder.state(),
            chunks: self.recorder.chunk_count(),
            buffered_bytes: self.recorder.buffered_bytes(),
            recorded_ms: self.recorder.recorded_duration().as_millis() as u64,
            ticks: self.compositor_stats().map_or(0, |s| s.ticks()),
        }
    }

    /// Tear everything down
    ///
    /// Stops the compositor loop, discards an unfinished recording and
    /// releases every source.
    pub async fn shutdown(&mut self) {
        info!("Shutting down studio {}", self.handle);
        if let Some(compositor_loop) = self.compositor_loop.take() {
            compositor_loop.stop().await;
        }
        if self.recorder.state().is_recording() {
            self.recorder.discard();
        }
        self.sources.release_all();
        self.canvas.lock().take();
    }
}
