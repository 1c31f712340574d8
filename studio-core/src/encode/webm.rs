//! WebM encoder
//!
//! Samples the video tracks of a stream at a fixed rate, forwards every audio
//! block, and hands both to a [`WebmMuxer`]. Once per timeslice the muxer is
//! flushed and the new bytes go out as one chunk.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::muxer::{MuxTrack, WebmConfig, WebmMuxer};
use super::{EncoderEvent, EncoderFactory, EncoderState, MediaEncoder, WEBM_MIME_TYPE};
use crate::capture::{MediaStream, MediaTrack, TrackKind};
use crate::error::{Result, StudioError};
use crate::types::AudioFrame;

/// Chunks buffered between the encoder and its consumer
const CHUNK_CHANNEL_CAPACITY: usize = 16;

/// Audio blocks buffered between the track forwarders and the muxer
const AUDIO_QUEUE_CAPACITY: usize = 256;

/// Media time that only advances while recording
#[derive(Debug)]
struct MediaClock {
    elapsed: Duration,
    running_since: Option<Instant>,
}

impl MediaClock {
    fn start() -> Self {
        Self {
            elapsed: Duration::ZERO,
            running_since: Some(Instant::now()),
        }
    }

    fn now(&self) -> Duration {
        self.elapsed + self.running_since.map_or(Duration::ZERO, |t| t.elapsed())
    }

    fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.elapsed += since.elapsed();
        }
    }

    fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }
}

/// Encoder task state
struct MuxWorker {
    video: Vec<(usize, MediaTrack)>,
    audio: Vec<(usize, MediaTrack)>,
    /// None when the stream has no tracks
    muxer: Option<WebmMuxer>,
    fps: u32,
}

impl MuxWorker {
    fn new(stream: &MediaStream, config: &WebmConfig) -> Result<Self> {
        let mut video = Vec::new();
        let mut audio = Vec::new();
        let mut tracks = Vec::new();

        for (index, track) in stream.tracks().iter().enumerate() {
            tracks.push(MuxTrack::from_track(index, track));
            match track.kind() {
                TrackKind::Video => video.push((index, track.clone())),
                TrackKind::Audio => audio.push((index, track.clone())),
            }
        }

        let muxer = if tracks.is_empty() {
            None
        } else {
            Some(WebmMuxer::create(&tracks, config)?)
        };

        Ok(Self {
            video,
            audio,
            muxer,
            fps: config.fps,
        })
    }

    fn flush(&mut self) -> Result<Bytes> {
        match self.muxer.as_mut() {
            Some(muxer) => muxer.flush(),
            None => Ok(Bytes::new()),
        }
    }

    async fn run(
        mut self,
        mut state_rx: watch::Receiver<EncoderState>,
        tx: mpsc::Sender<EncoderEvent>,
        timeslice: Duration,
    ) {
        let mut clock = MediaClock::start();
        let mut flush = interval_at(Instant::now() + timeslice, timeslice);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sample = interval(Duration::from_secs_f64(1.0 / self.fps.max(1) as f64));
        sample.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let (audio_tx, mut audio_rx) = mpsc::channel(AUDIO_QUEUE_CAPACITY);
        let forwarders: Vec<JoinHandle<()>> = self
            .audio
            .iter()
            .filter_map(|(index, track)| {
                let rx = track.subscribe_audio()?;
                Some(tokio::spawn(forward_audio(*index, rx, audio_tx.clone())))
            })
            .collect();
        drop(audio_tx);
        let mut audio_open = !forwarders.is_empty();

        let mut chunks = 0u64;

        loop {
            tokio::select! {
                biased;
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    match state {
                        EncoderState::Recording => clock.resume(),
                        EncoderState::Paused => clock.pause(),
                        EncoderState::Inactive => break,
                    }
                    debug!("Encoder state -> {:?} at {:?}", state, clock.now());
                }
                _ = flush.tick() => {
                    if !clock.is_running() {
                        continue;
                    }
                    let event = match self.flush() {
                        Ok(chunk) => {
                            trace!("Flushing chunk {} ({} bytes)", chunks, chunk.len());
                            chunks += 1;
                            EncoderEvent::DataAvailable(chunk)
                        }
                        Err(e) => EncoderEvent::Error(e.with_context("flushing chunk")),
                    };
                    if tx.send(event).await.is_err() {
                        debug!("Chunk receiver dropped, stopping encoder");
                        break;
                    }
                }
                _ = sample.tick(), if clock.is_running() => {
                    for error in self.sample_video(clock.now()) {
                        if tx.send(EncoderEvent::Error(error)).await.is_err() {
                            break;
                        }
                    }
                }
                block = audio_rx.recv(), if audio_open => match block {
                    Some((index, block)) => {
                        if clock.is_running() {
                            if let Err(e) = self.write_audio(index, &block) {
                                let _ = tx.send(EncoderEvent::Error(e)).await;
                            }
                        }
                    }
                    None => audio_open = false,
                },
            }
        }

        for forwarder in forwarders {
            forwarder.abort();
        }
        let last = match self.muxer.take() {
            Some(muxer) => muxer.finish(),
            None => Ok(Bytes::new()),
        };
        let event = match last {
            Ok(chunk) => EncoderEvent::DataAvailable(chunk),
            Err(e) => EncoderEvent::Error(e.with_context("finishing recording")),
        };
        let _ = tx.send(event).await;
        info!("Encoder finished after {} chunks, media time {:?}", chunks + 1, clock.now());
    }

    /// Encode the latest frame of every live video track
    fn sample_video(&mut self, timestamp: Duration) -> Vec<StudioError> {
        let Some(muxer) = self.muxer.as_mut() else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        for (index, track) in &self.video {
            // Ended tracks contribute nothing further
            if !track.is_live() {
                continue;
            }
            let Some(frame) = track.latest_frame() else {
                continue;
            };
            if let Err(e) = muxer.write_video(*index, &frame, timestamp) {
                errors.push(e.with_context(format!("track {}", track.label())));
            }
        }
        errors
    }

    fn write_audio(&mut self, index: usize, block: &AudioFrame) -> Result<()> {
        match self.muxer.as_mut() {
            Some(muxer) => muxer.write_audio(index, block),
            None => Ok(()),
        }
    }
}

async fn forward_audio(
    index: usize,
    mut rx: broadcast::Receiver<Arc<AudioFrame>>,
    tx: mpsc::Sender<(usize, Arc<AudioFrame>)>,
) {
    loop {
        match rx.recv().await {
            Ok(block) => {
                if tx.send((index, block)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Audio track {} lagged, {} blocks dropped", index, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// [`MediaEncoder`] producing `video/webm`
pub struct WebmEncoder {
    stream: MediaStream,
    config: WebmConfig,
    state: watch::Sender<EncoderState>,
}

impl WebmEncoder {
    pub fn new(stream: MediaStream, config: WebmConfig) -> Self {
        let (state, _) = watch::channel(EncoderState::Inactive);
        Self {
            stream,
            config,
            state,
        }
    }

    /// The stream being encoded
    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    fn transition(&mut self, from: EncoderState, to: EncoderState) -> Result<()> {
        let current = *self.state.borrow();
        if current == to {
            return Ok(());
        }
        if current != from {
            return Err(StudioError::encoder(format!(
                "cannot go from {:?} to {:?}",
                current, to
            )));
        }
        self.state.send_replace(to);
        Ok(())
    }
}

impl MediaEncoder for WebmEncoder {
    fn start(&mut self, timeslice: Duration) -> Result<mpsc::Receiver<EncoderEvent>> {
        if *self.state.borrow() != EncoderState::Inactive {
            return Err(StudioError::encoder("encoder already started"));
        }
        if timeslice.is_zero() {
            return Err(StudioError::encoder("timeslice must be positive"));
        }

        let worker = MuxWorker::new(&self.stream, &self.config)?;
        info!(
            "Starting WebM encoder: {} video, {} audio tracks, timeslice {:?}",
            worker.video.len(),
            worker.audio.len(),
            timeslice
        );

        // Each session gets its own state channel so a finishing worker never
        // sees the next session's transitions.
        let (state, state_rx) = watch::channel(EncoderState::Recording);
        self.state = state;

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(worker.run(state_rx, tx, timeslice));
        Ok(rx)
    }

    fn pause(&mut self) -> Result<()> {
        self.transition(EncoderState::Recording, EncoderState::Paused)
    }

    fn resume(&mut self) -> Result<()> {
        self.transition(EncoderState::Paused, EncoderState::Recording)
    }

    fn stop(&mut self) -> Result<()> {
        if self.state.send_replace(EncoderState::Inactive) != EncoderState::Inactive {
            debug!("WebM encoder stopping");
        }
        Ok(())
    }

    fn state(&self) -> EncoderState {
        *self.state.borrow()
    }

    fn mime_type(&self) -> &str {
        WEBM_MIME_TYPE
    }
}

impl Drop for WebmEncoder {
    fn drop(&mut self) {
        self.state.send_replace(EncoderState::Inactive);
    }
}

/// Builds [`WebmEncoder`]s
#[derive(Debug, Clone, Default)]
pub struct WebmEncoderFactory {
    config: WebmConfig,
}

impl WebmEncoderFactory {
    pub fn new(config: WebmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebmConfig {
        &self.config
    }
}

impl EncoderFactory for WebmEncoderFactory {
    fn create(&self, stream: MediaStream) -> Result<Box<dyn MediaEncoder>> {
        Ok(Box::new(WebmEncoder::new(stream, self.config.clone())))
    }
}
