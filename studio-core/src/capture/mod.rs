//! Media acquisition
//!
//! This module handles:
//! - The acquisition boundary ([`MediaDevices`])
//! - Live streams and tracks
//! - Per-source state and toggling ([`SourceManager`])
//! - Synthetic test-pattern devices

pub mod devices;
pub mod source;
pub mod stream;
pub mod test_pattern;

pub use devices::MediaDevices;
pub use source::{
    ActiveSource, SourceManager, SourceSnapshot, SourceState, SourceStatus, SourceTable, VideoSink,
};
pub use stream::{AudioTrackWriter, MediaStream, MediaTrack, TrackKind, VideoTrackWriter};
pub use test_pattern::{TestPatternConfig, TestPatternDevices};
