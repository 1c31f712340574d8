//! Integration tests for encoding subsystem
//!
//! The WebM encoder is driven with hand-fed tracks on a paused clock.

mod mocks;

use mocks::{create_gradient_frame, create_test_frame};
use std::sync::Arc;
use std::time::Duration;
use studio_core::capture::{AudioTrackWriter, MediaStream, MediaTrack};
use studio_core::encode::{
    EncoderEvent, EncoderFactory, EncoderState, MediaEncoder, MuxMedia, MuxTrack, WebmConfig,
    WebmEncoder, WebmEncoderFactory, WebmMuxer,
};
use studio_core::types::{AudioFormat, AudioFrame};
use tokio::sync::mpsc;

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const CLUSTER_ID: [u8; 4] = [0x1F, 0x43, 0xB6, 0x75];

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Collect every chunk until the encoder closes the channel
async fn drain(mut rx: mpsc::Receiver<EncoderEvent>) -> Vec<bytes::Bytes> {
    let mut chunks = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            EncoderEvent::DataAvailable(chunk) => chunks.push(chunk),
            EncoderEvent::Error(e) => panic!("unexpected encoder error: {}", e),
        }
    }
    chunks
}

/// Publish 20ms blocks of silence until the track is stopped
async fn feed_audio(writer: AudioTrackWriter, format: AudioFormat) {
    let samples = (format.sample_rate / 50 * format.channels) as usize;
    let mut pts = 0;
    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    loop {
        ticker.tick().await;
        if !writer.publish(AudioFrame::new(format, vec![0.0; samples], pts)) {
            break;
        }
        pts += 20_000_000;
    }
}

#[test]
fn test_mux_track_describes_live_tracks() {
    let (video, _writer) = MediaTrack::video("Canvas Capture", 320, 240);
    let described = MuxTrack::from_track(1, &video);
    assert_eq!(described.index, 1);
    assert_eq!(described.name, "Canvas Capture");
    assert_eq!(
        described.media,
        MuxMedia::Video {
            width: 320,
            height: 240
        }
    );

    let (audio, _writer) = MediaTrack::audio("Microphone", AudioFormat::default());
    assert_eq!(
        MuxTrack::from_track(0, &audio).media,
        MuxMedia::Audio(AudioFormat::default())
    );
}

#[test]
fn test_muxer_writes_vp8_cluster() {
    let (track, _writer) = MediaTrack::video("Canvas Capture", 64, 48);
    let mut muxer =
        WebmMuxer::create(&[MuxTrack::from_track(0, &track)], &WebmConfig::default()).unwrap();

    let frame = create_gradient_frame(64, 48);
    for i in 0..5 {
        muxer
            .write_video(0, &frame, Duration::from_millis(i * 40))
            .unwrap();
    }

    let chunk = muxer.flush().unwrap();
    assert_eq!(&chunk[..4], &EBML_MAGIC);
    assert!(contains(&chunk, b"webm"));
    assert!(contains(&chunk, b"V_VP8"));
    assert!(contains(&chunk, b"Canvas Capture"));
    assert!(muxer.packets_written() >= 5);

    // Nothing new queued: nothing to write
    assert!(muxer.flush().unwrap().is_empty());
}

#[test]
fn test_muxer_scales_mismatched_frames() {
    let (track, _writer) = MediaTrack::video("Canvas Capture", 32, 32);
    let mut muxer =
        WebmMuxer::create(&[MuxTrack::from_track(0, &track)], &WebmConfig::default()).unwrap();

    // A frame of another size is scaled to the stream size
    muxer
        .write_video(0, &create_test_frame(64, 16, [255, 0, 0, 255]), Duration::ZERO)
        .unwrap();
    muxer
        .write_video(0, &create_test_frame(32, 32, [0, 0, 255, 255]), Duration::from_millis(33))
        .unwrap();
    assert!(muxer.packets_written() >= 2);
}

#[test]
fn test_muxer_drops_out_of_order_frames() {
    let (track, _writer) = MediaTrack::video("Canvas Capture", 16, 16);
    let mut muxer =
        WebmMuxer::create(&[MuxTrack::from_track(0, &track)], &WebmConfig::default()).unwrap();
    let frame = create_test_frame(16, 16, [9, 9, 9, 255]);

    muxer.write_video(0, &frame, Duration::from_millis(100)).unwrap();
    let after_first = muxer.packets_written();
    muxer.write_video(0, &frame, Duration::from_millis(100)).unwrap();
    muxer.write_video(0, &frame, Duration::from_millis(50)).unwrap();
    assert_eq!(muxer.packets_written(), after_first);
}

#[tokio::test(start_paused = true)]
async fn test_encoder_records_video_and_audio() {
    let (video, video_writer) = MediaTrack::video("Canvas Capture", 32, 24);
    video_writer.publish(Arc::new(create_gradient_frame(32, 24)));
    let format = AudioFormat::default();
    let (audio, audio_writer) = MediaTrack::audio("Microphone", format);

    let stream = MediaStream::from_tracks([audio.clone(), video.clone()]);
    let mut encoder = WebmEncoder::new(stream, WebmConfig::default());
    let rx = encoder.start(Duration::from_secs(1)).unwrap();
    let feeder = tokio::spawn(feed_audio(audio_writer, format));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    encoder.stop().unwrap();
    audio.stop();
    video.stop();

    let chunks = drain(rx).await;
    feeder.await.unwrap();

    assert_eq!(chunks.len(), 3, "Two timeslices plus the final flush");
    assert_eq!(&chunks[0][..4], &EBML_MAGIC);
    assert!(contains(&chunks[0], b"V_VP8"));
    assert!(contains(&chunks[0], b"A_OPUS"));
    for chunk in &chunks[1..] {
        assert!(
            !contains(chunk, &EBML_MAGIC),
            "Header is only written once"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_encoder_stop_while_paused() {
    let (video, writer) = MediaTrack::video("Canvas Capture", 8, 8);
    writer.publish(Arc::new(create_test_frame(8, 8, [0, 255, 0, 255])));

    let mut encoder = WebmEncoder::new(MediaStream::from_tracks([video]), WebmConfig::default());
    let rx = encoder.start(Duration::from_secs(1)).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    encoder.pause().unwrap();
    assert_eq!(encoder.state(), EncoderState::Paused);
    tokio::time::sleep(Duration::from_secs(3)).await;

    encoder.stop().unwrap();
    assert_eq!(encoder.state(), EncoderState::Inactive);

    let chunks = drain(rx).await;
    assert_eq!(chunks.len(), 1, "Only the final flush while paused");
    assert_eq!(&chunks[0][..4], &EBML_MAGIC);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_reports_error_and_keeps_recording() {
    let (video, writer) = MediaTrack::video("Canvas Capture", 16, 16);
    writer.publish(Arc::new(studio_core::Frame {
        width: 16,
        height: 16,
        data: vec![255; 4],
        pts: 0,
    }));

    let mut encoder = WebmEncoder::new(MediaStream::from_tracks([video]), WebmConfig::default());
    let mut rx = encoder.start(Duration::from_secs(1)).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    writer.publish(Arc::new(create_test_frame(16, 16, [0, 0, 255, 255])));
    tokio::time::sleep(Duration::from_millis(1000)).await;
    encoder.stop().unwrap();

    let mut errors = 0;
    let mut chunks = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            EncoderEvent::DataAvailable(chunk) => chunks.push(chunk),
            EncoderEvent::Error(_) => errors += 1,
        }
    }
    assert!(errors > 0);
    assert_eq!(chunks.len(), 2);
    assert!(
        contains(&chunks[0], &CLUSTER_ID),
        "Good frames after the bad one are still encoded"
    );
}

#[tokio::test]
async fn test_factory_builds_webm_encoders() {
    let factory = WebmEncoderFactory::new(WebmConfig {
        fps: 10,
        ..Default::default()
    });
    assert_eq!(factory.config().fps, 10);
    let encoder = factory.create(MediaStream::new()).unwrap();
    assert_eq!(encoder.mime_type(), "video/webm");
    assert_eq!(encoder.state(), EncoderState::Inactive);
}

#[tokio::test]
async fn test_zero_timeslice_rejected() {
    let mut encoder = WebmEncoder::new(MediaStream::new(), WebmConfig::default());
    assert!(encoder.start(Duration::ZERO).is_err());
    assert_eq!(encoder.state(), EncoderState::Inactive);
}
