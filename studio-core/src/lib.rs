//! Studio Core Library
//!
//! Screen + camera recording studio with a composited canvas.
//!
//! This library provides:
//! - Independently toggleable audio, camera and screen sources
//! - A compositor drawing the screen full-canvas with a circular camera overlay
//! - Chunked WebM recording of the canvas and microphone
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────┐    ┌─────────────────┐    ┌──────────┐
//! │ Source Manager  │───▶│ Compositor   │───▶│ Recorder        │───▶│ Download │
//! │ (MediaDevices)  │    │ (Canvas)     │    │ (WebM chunks)   │    │ Sink     │
//! └─────────────────┘    └──────────────┘    └─────────────────┘    └──────────┘
//!          │                                          ▲
//!          └──────────────── audio tracks ────────────┘
//! ```

pub mod capture;
pub mod compose;
pub mod config;
pub mod encode;
pub mod error;
pub mod output;
pub mod recorder;
pub mod studio;
pub mod types;

pub use config::{ConfigFile, Resolution, StudioConfig};
pub use error::{Result, StudioError};
pub use recorder::{RecordedFile, Recorder, RecorderState};
pub use studio::{Studio, StudioStatus};
pub use types::{Frame, Handle, SourceKind};
