//! Mock infrastructure for testing
//!
//! Provides frame builders, scripted media devices, an in-memory download
//! sink and a hand-driven encoder.

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use studio_core::capture::{
    AudioTrackWriter, MediaDevices, MediaStream, MediaTrack, VideoTrackWriter,
};
use studio_core::encode::{EncoderEvent, EncoderFactory, EncoderState, MediaEncoder};
use studio_core::error::{Result, StudioError};
use studio_core::output::{Blob, DownloadLink, DownloadSink, ObjectUrl};
use studio_core::types::{AudioFormat, MediaConstraints, SourceKind};
use studio_core::Frame;
use tokio::sync::mpsc;

/// Create a test frame with solid color
///
/// # Arguments
/// * `width` - Frame width in pixels
/// * `height` - Frame height in pixels
/// * `color` - RGBA color values
pub fn create_test_frame(width: u32, height: u32, color: [u8; 4]) -> Frame {
    Frame::solid(width, height, color)
}

/// Create a test frame with a gradient pattern
pub fn create_gradient_frame(width: u32, height: u32) -> Frame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            // Create a diagonal gradient
            let r = ((x as f32 / width as f32) * 255.0) as u8;
            let g = ((y as f32 / height as f32) * 255.0) as u8;
            let b = (((x + y) as f32 / (width + height) as f32) * 255.0) as u8;
            data.extend_from_slice(&[r, g, b, 255]);
        }
    }
    Frame {
        width,
        height,
        data,
        pts: 0,
    }
}

/// Media devices whose tracks are fed by the test
///
/// Each granted video track starts with the configured frame; the writers
/// are kept so tests can publish more.
pub struct MockDevices {
    camera: (u32, u32),
    screen: (u32, u32),
    denied: Mutex<HashSet<SourceKind>>,
    requests: Mutex<Vec<(SourceKind, MediaConstraints)>>,
    video_writers: Mutex<Vec<(SourceKind, VideoTrackWriter)>>,
    audio_writers: Mutex<Vec<AudioTrackWriter>>,
}

impl MockDevices {
    pub fn new() -> Self {
        Self {
            camera: (64, 48),
            screen: (160, 90),
            denied: Mutex::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            video_writers: Mutex::new(Vec::new()),
            audio_writers: Mutex::new(Vec::new()),
        }
    }

    /// Refuse the next requests for `kind`
    pub fn deny(&self, kind: SourceKind) {
        self.denied.lock().insert(kind);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<(SourceKind, MediaConstraints)> {
        self.requests.lock().clone()
    }

    /// Publish a frame on every live video track of `kind`
    pub fn publish(&self, kind: SourceKind, frame: Frame) -> usize {
        let frame = Arc::new(frame);
        self.video_writers
            .lock()
            .iter()
            .filter(|(k, w)| *k == kind && w.publish(frame.clone()))
            .count()
    }

    /// Number of producers whose track has not been stopped
    pub fn live_producers(&self) -> usize {
        let video = self
            .video_writers
            .lock()
            .iter()
            .filter(|(_, w)| !w.is_stopped())
            .count();
        let audio = self
            .audio_writers
            .lock()
            .iter()
            .filter(|w| !w.is_stopped())
            .count();
        video + audio
    }
}

impl Default for MockDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDevices for MockDevices {
    async fn get_user_media(
        &self,
        kind: SourceKind,
        constraints: MediaConstraints,
    ) -> Result<MediaStream> {
        self.requests.lock().push((kind, constraints));
        if self.denied.lock().contains(&kind) {
            return Err(StudioError::denied(kind, "NotAllowedError"));
        }

        let track = match kind {
            SourceKind::Audio => {
                let (track, writer) = MediaTrack::audio("Mock Microphone", AudioFormat::default());
                self.audio_writers.lock().push(writer);
                track
            }
            SourceKind::Camera | SourceKind::Screen => {
                let (width, height) = if kind == SourceKind::Camera {
                    self.camera
                } else {
                    self.screen
                };
                let (track, writer) = MediaTrack::video(format!("Mock {}", kind), width, height);
                writer.publish(Arc::new(create_gradient_frame(width, height)));
                self.video_writers.lock().push((kind, writer));
                track
            }
        };
        Ok(MediaStream::from_tracks([track]))
    }
}

/// One call on the download sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Created(ObjectUrl),
    Triggered(ObjectUrl, String),
    Removed(ObjectUrl),
    Revoked(ObjectUrl),
}

/// Download sink keeping everything in memory
#[derive(Default)]
pub struct MemoryDownloads {
    urls: Mutex<Vec<(ObjectUrl, Blob)>>,
    downloads: Mutex<Vec<(String, Blob)>>,
    events: Mutex<Vec<DownloadEvent>>,
}

impl MemoryDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files downloaded so far, as (filename, blob)
    pub fn downloads(&self) -> Vec<(String, Blob)> {
        self.downloads.lock().clone()
    }

    pub fn events(&self) -> Vec<DownloadEvent> {
        self.events.lock().clone()
    }

    pub fn outstanding_urls(&self) -> usize {
        self.urls.lock().len()
    }
}

impl DownloadSink for MemoryDownloads {
    fn create_object_url(&self, blob: Blob) -> ObjectUrl {
        let url = ObjectUrl::new();
        self.urls.lock().push((url.clone(), blob));
        self.events.lock().push(DownloadEvent::Created(url.clone()));
        url
    }

    fn trigger_download(&self, url: &ObjectUrl, filename: &str) -> Result<DownloadLink> {
        let blob = self
            .urls
            .lock()
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, b)| b.clone())
            .ok_or_else(|| StudioError::output("unknown url"))?;
        self.downloads.lock().push((filename.to_string(), blob));
        self.events
            .lock()
            .push(DownloadEvent::Triggered(url.clone(), filename.to_string()));
        Ok(DownloadLink {
            url: url.clone(),
            filename: filename.to_string(),
            path: None,
        })
    }

    fn remove_link(&self, link: &DownloadLink) {
        self.events
            .lock()
            .push(DownloadEvent::Removed(link.url.clone()));
    }

    fn revoke_object_url(&self, url: &ObjectUrl) {
        self.urls.lock().retain(|(u, _)| u != url);
        self.events.lock().push(DownloadEvent::Revoked(url.clone()));
    }
}

/// Shared view into the encoders built by a [`ScriptedEncoderFactory`]
#[derive(Default)]
struct ScriptState {
    sender: Option<mpsc::Sender<EncoderEvent>>,
    state: EncoderState,
    timeslice: Option<Duration>,
    track_counts: Vec<usize>,
    calls: Vec<&'static str>,
}

/// Encoder factory whose encoders emit exactly what the test tells them to
#[derive(Clone, Default)]
pub struct ScriptedEncoderFactory {
    script: Arc<Mutex<ScriptState>>,
}

impl ScriptedEncoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a chunk from the running encoder
    pub fn emit(&self, chunk: &'static [u8]) -> bool {
        self.send(EncoderEvent::DataAvailable(Bytes::from_static(chunk)))
    }

    /// Report an encoder error
    pub fn fail(&self, message: &str) -> bool {
        self.send(EncoderEvent::Error(StudioError::encoder(message)))
    }

    fn send(&self, event: EncoderEvent) -> bool {
        let script = self.script.lock();
        match &script.sender {
            Some(sender) => sender.try_send(event).is_ok(),
            None => false,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.script.lock().state
    }

    pub fn timeslice(&self) -> Option<Duration> {
        self.script.lock().timeslice
    }

    /// Track count of every stream an encoder was created for
    pub fn track_counts(&self) -> Vec<usize> {
        self.script.lock().track_counts.clone()
    }

    /// Encoder methods called, in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.script.lock().calls.clone()
    }
}

impl EncoderFactory for ScriptedEncoderFactory {
    fn create(&self, stream: MediaStream) -> Result<Box<dyn MediaEncoder>> {
        self.script.lock().track_counts.push(stream.tracks().len());
        Ok(Box::new(ScriptedEncoder {
            script: self.script.clone(),
        }))
    }
}

struct ScriptedEncoder {
    script: Arc<Mutex<ScriptState>>,
}

impl MediaEncoder for ScriptedEncoder {
    fn start(&mut self, timeslice: Duration) -> Result<mpsc::Receiver<EncoderEvent>> {
        let (tx, rx) = mpsc::channel(64);
        let mut script = self.script.lock();
        script.sender = Some(tx);
        script.state = EncoderState::Recording;
        script.timeslice = Some(timeslice);
        script.calls.push("start");
        Ok(rx)
    }

    fn pause(&mut self) -> Result<()> {
        let mut script = self.script.lock();
        script.state = EncoderState::Paused;
        script.calls.push("pause");
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let mut script = self.script.lock();
        script.state = EncoderState::Recording;
        script.calls.push("resume");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut script = self.script.lock();
        script.state = EncoderState::Inactive;
        script.sender = None;
        script.calls.push("stop");
        Ok(())
    }

    fn state(&self) -> EncoderState {
        self.script.lock().state
    }

    fn mime_type(&self) -> &str {
        "video/webm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_frame_dimensions() {
        let frame = create_test_frame(1920, 1080, [255, 0, 0, 255]);
        assert_eq!(frame.width, 1920);
        assert_eq!(frame.height, 1080);
        assert_eq!(frame.data.len(), 1920 * 1080 * 4);
    }

    #[test]
    fn test_create_test_frame_color() {
        let color = [10, 20, 30, 40];
        let frame = create_test_frame(1, 1, color);
        assert_eq!(&frame.data[..], &color);
    }

    #[test]
    fn test_gradient_frame_dimensions() {
        let frame = create_gradient_frame(640, 480);
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.data.len(), 640 * 480 * 4);
    }
}
