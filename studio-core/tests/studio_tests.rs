//! End-to-end studio tests
//!
//! Run the full pipeline: test-pattern devices, the compositor loop, the
//! WebM encoder and a download directory. The tokio clock is paused so the
//! timeslices advance deterministically.

mod mocks;

use mocks::MemoryDownloads;
use std::sync::Arc;
use std::time::Duration;
use studio_core::capture::{SourceState, SourceStatus, TestPatternConfig, TestPatternDevices};
use studio_core::output::DirectoryDownloads;
use studio_core::{RecorderState, SourceKind, Studio, StudioConfig, StudioError};

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

fn test_config() -> StudioConfig {
    StudioConfig::default()
        .with_refresh_rate(10)
        .with_capture_fps(2)
}

fn small_devices() -> Arc<TestPatternDevices> {
    Arc::new(TestPatternDevices::new(TestPatternConfig {
        camera: (64, 48),
        screen: (160, 90),
        fps: 5,
        ..Default::default()
    }))
}

fn studio_with_memory() -> (Studio<TestPatternDevices>, Arc<TestPatternDevices>, Arc<MemoryDownloads>) {
    let devices = small_devices();
    let downloads = Arc::new(MemoryDownloads::new());
    let studio = Studio::new(test_config(), devices.clone(), downloads.clone());
    (studio, devices, downloads)
}

#[tokio::test(start_paused = true)]
async fn test_camera_recording_produces_webm() {
    let dir = tempfile::tempdir().unwrap();
    let downloads = Arc::new(DirectoryDownloads::new(dir.path()));
    let mut studio = Studio::new(test_config(), small_devices(), downloads.clone());
    studio.mount();

    assert_eq!(studio.toggle(SourceKind::Camera).await, SourceStatus::Active);
    assert!(studio.record().unwrap());
    tokio::time::sleep(Duration::from_millis(3500)).await;

    let status = studio.status();
    assert_eq!(status.recorder, RecorderState::Recording);
    assert!(status.chunks >= 3, "Expected a chunk per timeslice, got {}", status.chunks);

    let file = studio.stop().await.unwrap();
    assert_eq!(file.blob.mime_type(), "video/webm");
    assert_eq!(file.track_count, 1);
    assert!(file.chunk_count >= 3);
    assert!(!file.blob.is_empty());
    assert_eq!(&file.blob.data()[..4], &EBML_MAGIC);

    let written = std::fs::read(dir.path().join("test.webm")).unwrap();
    assert_eq!(&written[..], &file.blob.data()[..]);
    assert_eq!(downloads.outstanding_urls(), 0);
    assert_eq!(downloads.active_links(), 0);

    studio.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_audio_and_screen_recording_contains_both_codecs() {
    let (mut studio, _, _) = studio_with_memory();
    studio.mount();
    studio.toggle(SourceKind::Screen).await;
    studio.toggle(SourceKind::Audio).await;

    studio.record().unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let file = studio.stop().await.unwrap();

    assert_eq!(file.track_count, 2);
    let data = &file.blob.data()[..];
    let contains = |needle: &[u8]| data.windows(needle.len()).any(|w| w == needle);
    assert!(contains(b"webm"));
    assert!(contains(b"V_VP8"));
    assert!(contains(b"A_OPUS"));

    studio.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_sources_produces_empty_file() {
    let (mut studio, _, downloads) = studio_with_memory();
    studio.mount();

    assert!(studio.record().unwrap());
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let file = studio.stop().await.unwrap();

    assert_eq!(file.track_count, 0);
    assert_eq!(file.chunk_count, 0);
    assert!(file.blob.is_empty());
    assert_eq!(file.blob.mime_type(), "video/webm");

    // The empty file is still offered for download
    let downloads_made = downloads.downloads();
    assert_eq!(downloads_made.len(), 1);
    assert_eq!(downloads_made[0].0, "test.webm");

    studio.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_paused_time_excluded() {
    let (mut studio, _, _) = studio_with_memory();
    studio.mount();
    studio.toggle(SourceKind::Camera).await;
    studio.record().unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(studio.pause().unwrap(), RecorderState::Paused);
    let chunks_at_pause = studio.status().chunks;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        studio.status().chunks,
        chunks_at_pause,
        "No chunks are emitted while paused"
    );

    assert_eq!(studio.pause().unwrap(), RecorderState::Recording);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let file = studio.stop().await.unwrap();
    assert_eq!(file.duration, Duration::from_secs(3));
    assert!(file.chunk_count > chunks_at_pause);

    studio.shutdown().await;
}

#[tokio::test]
async fn test_toggle_twice_restores_state() {
    let (mut studio, _, _) = studio_with_memory();
    studio.mount();

    for kind in SourceKind::ALL {
        assert_eq!(studio.toggle(kind).await, SourceStatus::Active);
        assert!(studio.sources().is_active(kind));
        assert_eq!(studio.toggle(kind).await, SourceStatus::Inactive);
        assert!(!studio.sources().is_active(kind));
    }

    studio.shutdown().await;
}

#[tokio::test]
async fn test_denied_source_reports_error() {
    let (mut studio, devices, _) = studio_with_memory();
    devices.deny(SourceKind::Camera);

    assert_eq!(studio.toggle(SourceKind::Camera).await, SourceStatus::Error);
    assert!(matches!(
        studio.sources().state(SourceKind::Camera),
        SourceState::Error { .. }
    ));

    // Once permission is granted the next toggle acquires it
    devices.allow(SourceKind::Camera);
    assert_eq!(studio.toggle(SourceKind::Camera).await, SourceStatus::Active);

    studio.shutdown().await;
}

#[tokio::test]
async fn test_mount_is_idempotent() {
    let (mut studio, _, _) = studio_with_memory();
    assert!(!studio.is_mounted());
    assert!(studio.mount());
    assert!(!studio.mount());

    let frame = studio.canvas_frame().unwrap();
    assert_eq!((frame.width, frame.height), (1280, 720));

    studio.shutdown().await;
    assert!(!studio.is_mounted());
    assert!(studio.canvas_frame().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_everything() {
    let (mut studio, _, downloads) = studio_with_memory();
    studio.mount();
    studio.toggle(SourceKind::Camera).await;
    studio.toggle(SourceKind::Audio).await;
    studio.record().unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    studio.shutdown().await;

    assert_eq!(studio.recorder_state(), RecorderState::Idle);
    for kind in SourceKind::ALL {
        assert!(!studio.sources().is_active(kind), "{} still active", kind);
    }
    assert!(
        downloads.downloads().is_empty(),
        "Shutdown discards unfinished recordings"
    );
    assert!(matches!(studio.stop().await, Err(StudioError::NoActiveSession)));
}

#[tokio::test(start_paused = true)]
async fn test_camera_off_mid_recording() {
    let (mut studio, _, _) = studio_with_memory();
    studio.mount();
    studio.toggle(SourceKind::Camera).await;
    studio.record().unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(studio.toggle(SourceKind::Camera).await, SourceStatus::Inactive);
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let file = studio.stop().await.unwrap();
    assert_eq!(file.track_count, 1, "The canvas track outlives the camera");
    assert_eq!(&file.blob.data()[..4], &EBML_MAGIC);

    studio.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_compositor_runs_while_mounted() {
    let (mut studio, _, _) = studio_with_memory();
    studio.mount();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = studio.status();
    assert!(status.mounted);
    assert!(status.ticks >= 5, "Expected about 10 ticks, got {}", status.ticks);

    studio.shutdown().await;
}

#[tokio::test]
async fn test_status_serializes() {
    let (mut studio, _, _) = studio_with_memory();
    let json = serde_json::to_value(studio.status()).unwrap();
    assert_eq!(json["recorder"], "idle");
    assert_eq!(json["resolution"], "720p");
    assert_eq!(json["sources"].as_array().unwrap().len(), 3);
    studio.shutdown().await;
}
