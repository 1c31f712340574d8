//! Recorder
//!
//! Drives a [`MediaEncoder`] over the output stream, accumulates the chunks
//! it emits and turns them into one downloadable file on stop.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::capture::MediaStream;
use crate::config::{StudioConfig, RECORDING_FILENAME, TIMESLICE};
use crate::encode::{EncoderEvent, EncoderFactory, MediaEncoder, WEBM_MIME_TYPE};
use crate::error::{Result, StudioError};
use crate::output::{Blob, DownloadLink, DownloadSink};

/// Recorder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    #[default]
    Idle,
    Recording,
    Paused,
}

impl RecorderState {
    /// Whether a session exists, paused or not
    pub fn is_recording(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Recorder parameters
///
/// Every recording is chunked at [`TIMESLICE`] and downloaded as
/// [`RECORDING_FILENAME`] with type [`WEBM_MIME_TYPE`].
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    /// Delay before the download link and URL are released
    pub cleanup_delay: Duration,
}

impl From<&StudioConfig> for RecorderSettings {
    fn from(config: &StudioConfig) -> Self {
        Self {
            cleanup_delay: config.cleanup_delay,
        }
    }
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self::from(&StudioConfig::default())
    }
}

/// Streams that feed a new recording
#[derive(Debug, Clone, Default)]
pub struct RecordingInputs {
    /// The audio source's stream, when audio is active
    pub audio: Option<MediaStream>,
    /// A live capture of the canvas, when camera or screen is active
    ///
    /// The recorder owns this stream and stops it when the session ends.
    pub canvas: Option<MediaStream>,
}

/// A finished recording
#[derive(Debug, Clone)]
pub struct RecordedFile {
    /// Concatenated chunks
    pub blob: Blob,
    /// Filename the download was saved under
    pub filename: String,
    /// Number of non-empty chunks collected
    pub chunk_count: usize,
    /// Tracks in the output stream
    pub track_count: usize,
    /// Recorded time, excluding pauses
    pub duration: Duration,
    /// The (already released) download link
    pub link: DownloadLink,
}

struct RecordingSession {
    encoder: Box<dyn MediaEncoder>,
    canvas: Option<MediaStream>,
    track_count: usize,
    chunks: Arc<Mutex<Vec<Bytes>>>,
    collector: JoinHandle<Option<StudioError>>,
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl RecordingSession {
    fn state(&self) -> RecorderState {
        if self.paused_at.is_some() {
            RecorderState::Paused
        } else {
            RecorderState::Recording
        }
    }

    fn duration(&self) -> Duration {
        let end = self.paused_at.unwrap_or_else(Instant::now);
        end.duration_since(self.started)
            .saturating_sub(self.paused_total)
    }

    fn release_canvas(&self) {
        if let Some(canvas) = &self.canvas {
            canvas.stop_all();
        }
    }
}

/// Collect chunks until the encoder closes its channel
///
/// Empty chunks are skipped. The first encoder error is kept and returned.
async fn collect_chunks(
    mut rx: mpsc::Receiver<EncoderEvent>,
    chunks: Arc<Mutex<Vec<Bytes>>>,
) -> Option<StudioError> {
    let mut first_error = None;
    while let Some(event) = rx.recv().await {
        match event {
            EncoderEvent::DataAvailable(chunk) => {
                if chunk.is_empty() {
                    continue;
                }
                let mut chunks = chunks.lock();
                chunks.push(chunk);
                debug!("Collected chunk {}", chunks.len());
            }
            EncoderEvent::Error(e) => {
                error!("Encoder error: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }
    first_error
}

/// Records the output stream into a single file
pub struct Recorder {
    settings: RecorderSettings,
    encoders: Arc<dyn EncoderFactory>,
    downloads: Arc<dyn DownloadSink>,
    session: Option<RecordingSession>,
}

impl Recorder {
    pub fn new(
        settings: RecorderSettings,
        encoders: Arc<dyn EncoderFactory>,
        downloads: Arc<dyn DownloadSink>,
    ) -> Self {
        Self {
            settings,
            encoders,
            downloads,
            session: None,
        }
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn state(&self) -> RecorderState {
        self.session
            .as_ref()
            .map_or(RecorderState::Idle, RecordingSession::state)
    }

    /// Non-empty chunks collected so far in the current session
    pub fn chunk_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.chunks.lock().len())
    }

    /// Bytes collected so far in the current session
    pub fn buffered_bytes(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |s| s.chunks.lock().iter().map(Bytes::len).sum())
    }

    /// Recorded time of the current session, excluding pauses
    pub fn recorded_duration(&self) -> Duration {
        self.session
            .as_ref()
            .map_or(Duration::ZERO, RecordingSession::duration)
    }

    /// Start recording
    ///
    /// Does nothing and returns `false` when a session already exists. The
    /// output stream may end up with zero tracks; it is recorded anyway.
    pub fn start(&mut self, inputs: RecordingInputs) -> Result<bool> {
        if self.session.is_some() {
            debug!("Recording already in progress, ignoring start");
            if let Some(canvas) = &inputs.canvas {
                canvas.stop_all();
            }
            return Ok(false);
        }

        let mut stream = MediaStream::new();
        for input in [&inputs.audio, &inputs.canvas].into_iter().flatten() {
            for track in input.tracks() {
                stream.add_track(track.clone());
            }
        }
        let track_count = stream.tracks().len();
        if track_count == 0 {
            warn!("Recording with no active sources; the file will be empty");
        }

        let started = self.encoders.create(stream).and_then(|mut encoder| {
            let rx = encoder.start(TIMESLICE)?;
            Ok((encoder, rx))
        });
        let (encoder, rx) = match started {
            Ok(started) => started,
            Err(e) => {
                if let Some(canvas) = &inputs.canvas {
                    canvas.stop_all();
                }
                return Err(e.with_context("starting recording"));
            }
        };

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let collector = tokio::spawn(collect_chunks(rx, chunks.clone()));

        info!(
            "Recording started: {} tracks, {} every {:?}",
            track_count,
            encoder.mime_type(),
            TIMESLICE
        );

        self.session = Some(RecordingSession {
            encoder,
            canvas: inputs.canvas,
            track_count,
            chunks,
            collector,
            started: Instant::now(),
            paused_at: None,
            paused_total: Duration::ZERO,
        });
        Ok(true)
    }

    /// Toggle between recording and paused
    ///
    /// Does nothing when idle. Returns the resulting state.
    pub fn pause(&mut self) -> Result<RecorderState> {
        let Some(session) = self.session.as_mut() else {
            debug!("Not recording, ignoring pause");
            return Ok(RecorderState::Idle);
        };

        match session.paused_at.take() {
            Some(paused_at) => {
                session.encoder.resume()?;
                session.paused_total += paused_at.elapsed();
                info!("Recording resumed");
            }
            None => {
                session.encoder.pause()?;
                session.paused_at = Some(Instant::now());
                info!("Recording paused at {:?}", session.duration());
            }
        }
        Ok(session.state())
    }

    /// Finish the recording and download it
    ///
    /// Waits for the encoder's final chunk, publishes the concatenated
    /// chunks as [`RECORDING_FILENAME`] and releases the download link
    /// after the cleanup delay.
    pub async fn stop(&mut self) -> Result<RecordedFile> {
        let mut session = self.session.take().ok_or(StudioError::NoActiveSession)?;
        let duration = session.duration();

        let stopped = session.encoder.stop();
        session.release_canvas();
        stopped?;

        let encoder_error = session
            .collector
            .await
            .map_err(|e| StudioError::encoder(format!("chunk collector failed: {}", e)))?;
        if let Some(e) = encoder_error {
            return Err(e.with_context("recording failed"));
        }

        let chunks = std::mem::take(&mut *session.chunks.lock());
        let blob = Blob::from_parts(&chunks, WEBM_MIME_TYPE);
        info!(
            "Recording stopped: {} chunks, {} bytes, {:?}",
            chunks.len(),
            blob.len(),
            duration
        );

        let url = self.downloads.create_object_url(blob.clone());
        let link = match self.downloads.trigger_download(&url, RECORDING_FILENAME) {
            Ok(link) => link,
            Err(e) => {
                self.downloads.revoke_object_url(&url);
                return Err(e.with_context("downloading recording"));
            }
        };

        tokio::time::sleep(self.settings.cleanup_delay).await;
        self.downloads.remove_link(&link);
        self.downloads.revoke_object_url(&url);
        debug!("Released {}", url);

        Ok(RecordedFile {
            blob,
            filename: RECORDING_FILENAME.to_string(),
            chunk_count: chunks.len(),
            track_count: session.track_count,
            duration,
            link,
        })
    }

    /// Drop the current session without producing a file
    ///
    /// Returns how many chunks were thrown away.
    pub fn discard(&mut self) -> usize {
        let Some(mut session) = self.session.take() else {
            return 0;
        };
        if let Err(e) = session.encoder.stop() {
            warn!("Failed to stop encoder: {}", e);
        }
        session.release_canvas();
        session.collector.abort();
        let discarded = session.chunks.lock().len();
        warn!("Discarded recording with {} chunks", discarded);
        discarded
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MediaTrack;
    use crate::encode::{WebmConfig, WebmEncoderFactory};
    use crate::output::DirectoryDownloads;
    use crate::types::Frame;

    fn recorder(dir: &std::path::Path) -> (Recorder, Arc<DirectoryDownloads>) {
        let downloads = Arc::new(DirectoryDownloads::new(dir));
        let recorder = Recorder::new(
            RecorderSettings::default(),
            Arc::new(WebmEncoderFactory::new(WebmConfig::default())),
            downloads.clone(),
        );
        (recorder, downloads)
    }

    fn canvas_input() -> (RecordingInputs, crate::capture::VideoTrackWriter) {
        let (track, writer) = MediaTrack::video("Canvas Capture", 8, 8);
        writer.publish(Arc::new(Frame::solid(8, 8, [10, 20, 30, 255])));
        let inputs = RecordingInputs {
            audio: None,
            canvas: Some(MediaStream::from_tracks([track])),
        };
        (inputs, writer)
    }

    #[test]
    fn test_settings_defaults() {
        let settings = RecorderSettings::default();
        assert_eq!(settings.cleanup_delay, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_pause_and_stop_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut recorder, _) = recorder(dir.path());
        assert_eq!(recorder.pause().unwrap(), RecorderState::Idle);
        assert!(matches!(
            recorder.stop().await,
            Err(StudioError::NoActiveSession)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_and_releases_download() {
        let dir = tempfile::tempdir().unwrap();
        let (mut recorder, downloads) = recorder(dir.path());
        let (inputs, writer) = canvas_input();

        assert!(recorder.start(inputs).unwrap());
        assert_eq!(recorder.state(), RecorderState::Recording);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let file = recorder.stop().await.unwrap();
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert_eq!(file.filename, "test.webm");
        assert_eq!(file.blob.mime_type(), "video/webm");
        assert!(file.chunk_count >= 2);
        assert_eq!(file.track_count, 1);

        let written = std::fs::read(dir.path().join("test.webm")).unwrap();
        assert_eq!(written.len(), file.blob.len());
        assert_eq!(downloads.outstanding_urls(), 0);
        assert_eq!(downloads.active_links(), 0);

        // The canvas capture ends with the session
        assert!(writer.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_time_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let (mut recorder, _) = recorder(dir.path());
        let (inputs, _writer) = canvas_input();
        recorder.start(inputs).unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.pause().unwrap(), RecorderState::Paused);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.pause().unwrap(), RecorderState::Recording);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let file = recorder.stop().await.unwrap();
        assert_eq!(file.duration, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_drops_session() {
        let dir = tempfile::tempdir().unwrap();
        let (mut recorder, _) = recorder(dir.path());
        let (inputs, writer) = canvas_input();
        recorder.start(inputs).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        recorder.discard();
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(writer.is_stopped());
        assert!(!dir.path().join("test.webm").exists());
    }
}
