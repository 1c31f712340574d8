//! Acquisition boundary
//!
//! The host environment grants or denies access to media devices. Studio
//! never talks to camera, microphone or screen-capture APIs directly; it asks
//! a [`MediaDevices`] provider for a live [`MediaStream`].

use std::future::Future;

use crate::capture::MediaStream;
use crate::error::Result;
use crate::types::{MediaConstraints, SourceKind};

/// Provider of live media streams
pub trait MediaDevices: Send + Sync + 'static {
    /// Request a stream satisfying `constraints`
    ///
    /// Suspends until the user or OS grants or denies access. A denial must
    /// be reported as [`crate::StudioError::AcquisitionDenied`].
    fn get_user_media(
        &self,
        kind: SourceKind,
        constraints: MediaConstraints,
    ) -> impl Future<Output = Result<MediaStream>> + Send;
}
