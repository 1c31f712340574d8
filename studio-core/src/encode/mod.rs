//! Chunked media encoding
//!
//! This module provides:
//! - The encoding boundary ([`MediaEncoder`]): start with a timeslice, pause,
//!   resume, stop, with encoded chunks delivered over a channel
//! - A WebM muxer built on FFmpeg, writing VP8 video and Opus audio

mod muxer;
mod webm;

pub use muxer::{MuxMedia, MuxTrack, WebmConfig, WebmMuxer};
pub use webm::{WebmEncoder, WebmEncoderFactory};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::capture::MediaStream;
use crate::error::{Result, StudioError};

/// Media type of everything the WebM encoder produces
pub const WEBM_MIME_TYPE: &str = "video/webm";

/// Encoder lifecycle, mirroring a browser `MediaRecorder`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncoderState {
    /// Not started, or stopped
    #[default]
    Inactive,
    /// Producing chunks
    Recording,
    /// Suspended; no samples taken, no chunks produced
    Paused,
}

/// Event delivered by a running encoder
#[derive(Debug)]
pub enum EncoderEvent {
    /// One timeslice of encoded output; may be empty
    DataAvailable(Bytes),
    /// The encoder hit an error; it keeps running
    Error(StudioError),
}

/// Encoding boundary
///
/// After [`MediaEncoder::start`] the encoder emits one
/// [`EncoderEvent::DataAvailable`] per timeslice while recording. On
/// [`MediaEncoder::stop`] it emits a final chunk and closes the channel.
pub trait MediaEncoder: Send {
    /// Begin encoding, flushing a chunk every `timeslice`
    fn start(&mut self, timeslice: Duration) -> Result<mpsc::Receiver<EncoderEvent>>;

    /// Suspend encoding
    fn pause(&mut self) -> Result<()>;

    /// Continue after [`MediaEncoder::pause`]
    fn resume(&mut self) -> Result<()>;

    /// Finalize; the channel closes after the last chunk
    fn stop(&mut self) -> Result<()>;

    /// Current state
    fn state(&self) -> EncoderState;

    /// Media type of the produced data
    fn mime_type(&self) -> &str;
}

/// Creates an encoder for an output stream
pub trait EncoderFactory: Send + Sync {
    /// Build an encoder consuming `stream`
    fn create(&self, stream: MediaStream) -> Result<Box<dyn MediaEncoder>>;
}
