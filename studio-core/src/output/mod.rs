//! Delivering finished recordings
//!
//! A recording ends as a [`Blob`]. Handing it to the user follows the
//! browser download dance: register the blob under an object URL, trigger a
//! download of that URL under a filename, then remove the link and revoke
//! the URL.

mod download;

pub use download::DirectoryDownloads;

use bytes::Bytes;
use std::path::PathBuf;

use crate::error::Result;
use crate::types::Handle;

/// Immutable binary payload with a media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    mime_type: String,
    data: Bytes,
}

impl Blob {
    /// Concatenate `parts` into one blob
    pub fn from_parts<'a>(parts: impl IntoIterator<Item = &'a Bytes>, mime_type: &str) -> Self {
        let parts: Vec<&Bytes> = parts.into_iter().collect();
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for part in parts {
            data.extend_from_slice(part);
        }
        Self {
            mime_type: mime_type.to_string(),
            data: Bytes::from(data),
        }
    }

    pub fn new(data: impl Into<Bytes>, mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: data.into(),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Temporary URL referring to a registered blob
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUrl(String);

impl ObjectUrl {
    /// Mint a fresh URL
    pub fn new() -> Self {
        Self(format!("blob:studio/{}", Handle::new().as_u64()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ObjectUrl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A triggered download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    /// URL the download was started from
    pub url: ObjectUrl,
    /// Suggested filename
    pub filename: String,
    /// Where the file landed, when the sink writes to disk
    pub path: Option<PathBuf>,
}

/// Download boundary
pub trait DownloadSink: Send + Sync {
    /// Register `blob` and return a URL for it
    fn create_object_url(&self, blob: Blob) -> ObjectUrl;

    /// Start a download of `url` saved as `filename`
    fn trigger_download(&self, url: &ObjectUrl, filename: &str) -> Result<DownloadLink>;

    /// Remove the transient link created by [`DownloadSink::trigger_download`]
    fn remove_link(&self, link: &DownloadLink);

    /// Release the blob behind `url`; unknown URLs are ignored
    fn revoke_object_url(&self, url: &ObjectUrl);
}
