//! Error types for Studio

use thiserror::Error;

use crate::types::SourceKind;

/// Result type alias using StudioError
pub type Result<T> = std::result::Result<T, StudioError>;

/// Main error type for Studio operations
#[derive(Debug, Error)]
pub enum StudioError {
    /// The user or OS refused a media permission
    #[error("Access to {kind} denied: {reason}")]
    AcquisitionDenied {
        /// Source that was requested
        kind: SourceKind,
        /// Reason reported by the device provider
        reason: String,
    },

    /// Encoder error
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Output/download error
    #[error("Output error: {0}")]
    Output(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No recording in progress
    #[error("No active recording session")]
    NoActiveSession,

    /// Resolution cannot change while recording
    #[error("Resolution is locked while recording")]
    ResolutionLocked,

    /// Unsupported operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StudioError>,
    },
}

impl StudioError {
    /// Create an acquisition-denied error
    pub fn denied(kind: SourceKind, reason: impl Into<String>) -> Self {
        Self::AcquisitionDenied {
            kind,
            reason: reason.into(),
        }
    }

    /// Create an encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create an output error
    pub fn output(msg: impl Into<String>) -> Self {
        Self::Output(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping any context wrappers
    pub fn root(&self) -> &StudioError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Short hint for the user on how to fix the problem
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::AcquisitionDenied { .. } => {
                Some("Grant the media permission and toggle the source again")
            }
            Self::Config(_) => Some("Check ~/.config/studio/config.toml for invalid values"),
            Self::ResolutionLocked => Some("Stop the recording before changing resolution"),
            Self::NoActiveSession => Some("Start a recording first"),
            Self::Output(_) => Some("Check that the download directory is writable"),
            _ => None,
        }
    }

    /// Whether the user can fix this without code changes
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self.root(),
            Self::AcquisitionDenied { .. }
                | Self::Config(_)
                | Self::ResolutionLocked
                | Self::NoActiveSession
                | Self::Output(_)
        )
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<StudioError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}

// Conversions from external error types

impl From<ffmpeg_next::Error> for StudioError {
    fn from(err: ffmpeg_next::Error) -> Self {
        Self::Encoder(err.to_string())
    }
}
