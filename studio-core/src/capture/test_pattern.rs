//! Synthetic media devices
//!
//! Produces test-pattern video and a sine tone so the whole pipeline can run
//! headless. Each granted stream is driven by its own tokio task that keeps
//! publishing until the track is stopped.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::capture::{AudioTrackWriter, MediaDevices, MediaStream, MediaTrack, VideoTrackWriter};
use crate::error::{Result, StudioError};
use crate::types::{AudioFormat, AudioFrame, Frame, MediaConstraints, SourceKind, VideoConstraint};

/// Audio block length in milliseconds
const AUDIO_BLOCK_MS: u32 = 20;

/// Settings for the synthetic devices
#[derive(Debug, Clone)]
pub struct TestPatternConfig {
    /// Camera native resolution
    pub camera: (u32, u32),
    /// Screen native resolution
    pub screen: (u32, u32),
    /// Frame rate of video sources
    pub fps: u32,
    /// Tone frequency of the microphone
    pub tone_hz: f32,
    /// Microphone format
    pub audio_format: AudioFormat,
}

impl Default for TestPatternConfig {
    fn default() -> Self {
        Self {
            camera: (640, 480),
            screen: (1920, 1080),
            fps: 30,
            tone_hz: 440.0,
            audio_format: AudioFormat::default(),
        }
    }
}

/// Device provider backed by generated media
pub struct TestPatternDevices {
    config: TestPatternConfig,
    denied: Mutex<HashSet<SourceKind>>,
}

impl TestPatternDevices {
    /// Create a provider with the given settings
    pub fn new(config: TestPatternConfig) -> Self {
        Self {
            config,
            denied: Mutex::new(HashSet::new()),
        }
    }

    /// Refuse future requests for `kind`, as a user declining a prompt would
    pub fn deny(&self, kind: SourceKind) {
        self.denied.lock().insert(kind);
    }

    /// Grant future requests for `kind`
    pub fn allow(&self, kind: SourceKind) {
        self.denied.lock().remove(&kind);
    }

    /// Current settings
    pub fn config(&self) -> &TestPatternConfig {
        &self.config
    }

    fn start_video(&self, label: &str, (width, height): (u32, u32), pattern: Pattern) -> MediaStream {
        let (track, writer) = MediaTrack::video(label, width, height);
        let base = Arc::new(pattern.render(width, height));
        let period = Duration::from_secs_f64(1.0 / self.config.fps.max(1) as f64);
        tokio::spawn(run_video(writer, base, period));
        MediaStream::from_tracks([track])
    }

    fn start_audio(&self) -> MediaStream {
        let format = self.config.audio_format;
        let (track, writer) = MediaTrack::audio("Test Tone", format);
        tokio::spawn(run_tone(writer, format, self.config.tone_hz));
        MediaStream::from_tracks([track])
    }
}

impl Default for TestPatternDevices {
    fn default() -> Self {
        Self::new(TestPatternConfig::default())
    }
}

impl MediaDevices for TestPatternDevices {
    async fn get_user_media(
        &self,
        kind: SourceKind,
        constraints: MediaConstraints,
    ) -> Result<MediaStream> {
        if self.denied.lock().contains(&kind) {
            return Err(StudioError::denied(kind, "Permission denied by user"));
        }

        let stream = match (constraints.audio, constraints.video) {
            (_, Some(VideoConstraint::Camera)) => {
                self.start_video("Test Camera", self.config.camera, Pattern::Camera)
            }
            (_, Some(VideoConstraint::Display)) => {
                self.start_video("Test Screen", self.config.screen, Pattern::Screen)
            }
            (true, None) => self.start_audio(),
            (false, None) => {
                return Err(StudioError::Unsupported(
                    "At least one of audio or video must be requested".to_string(),
                ));
            }
        };

        info!("Granted {} stream {}", kind, stream.id());
        Ok(stream)
    }
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Camera,
    Screen,
}

impl Pattern {
    fn render(self, width: u32, height: u32) -> Frame {
        let mut frame = Frame::new(width, height);
        let stride = frame.stride();
        for y in 0..height {
            for x in 0..width {
                let idx = y as usize * stride + x as usize * 4;
                let px = match self {
                    // Warm vertical gradient
                    Pattern::Camera => {
                        let t = (y * 255 / height.max(1)) as u8;
                        [200, t / 2 + 64, 255 - t, 255]
                    }
                    // SMPTE-ish color bars
                    Pattern::Screen => {
                        const BARS: [[u8; 3]; 7] = [
                            [192, 192, 192],
                            [192, 192, 0],
                            [0, 192, 192],
                            [0, 192, 0],
                            [192, 0, 192],
                            [192, 0, 0],
                            [0, 0, 192],
                        ];
                        let bar = BARS[(x as usize * BARS.len()) / width.max(1) as usize];
                        [bar[0], bar[1], bar[2], 255]
                    }
                };
                frame.data[idx..idx + 4].copy_from_slice(&px);
            }
        }
        frame
    }
}

/// Copy `base` and draw a white marker whose position advances per frame
fn animate(base: &Frame, n: u64, pts: u64) -> Frame {
    let mut frame = base.clone();
    frame.pts = pts;
    let size = (frame.width.min(frame.height) / 12).max(1);
    let span = frame.width.saturating_sub(size).max(1) as u64;
    let x0 = ((n * 8) % span) as u32;
    let y0 = frame.height.saturating_sub(size) / 2;
    let stride = frame.stride();
    for y in y0..(y0 + size).min(frame.height) {
        for x in x0..(x0 + size).min(frame.width) {
            let idx = y as usize * stride + x as usize * 4;
            frame.data[idx..idx + 4].copy_from_slice(&[255, 255, 255, 255]);
        }
    }
    frame
}

async fn run_video(writer: VideoTrackWriter, base: Arc<Frame>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let period_ns = period.as_nanos() as u64;
    let mut n = 0u64;
    loop {
        ticker.tick().await;
        if !writer.publish(Arc::new(animate(&base, n, n * period_ns))) {
            break;
        }
        n += 1;
    }
    debug!("Test video producer released after {} frames", n);
}

async fn run_tone(writer: AudioTrackWriter, format: AudioFormat, tone_hz: f32) {
    let mut ticker = tokio::time::interval(Duration::from_millis(AUDIO_BLOCK_MS as u64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let per_block = format.sample_rate * AUDIO_BLOCK_MS / 1000;
    let channels = format.channels.max(1) as usize;
    let step = std::f32::consts::TAU * tone_hz / format.sample_rate.max(1) as f32;
    let mut phase = 0.0f32;
    let mut pts = 0u64;
    loop {
        ticker.tick().await;
        let mut samples = Vec::with_capacity(per_block as usize * channels);
        for _ in 0..per_block {
            let value = phase.sin() * 0.2;
            phase = (phase + step) % std::f32::consts::TAU;
            samples.extend(std::iter::repeat_n(value, channels));
        }
        let block = AudioFrame::new(format, samples, pts);
        pts += block.duration_ns();
        if !writer.publish(block) {
            break;
        }
    }
    debug!("Test tone producer released");
}
