//! Downloads into a local directory

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{Blob, DownloadLink, DownloadSink, ObjectUrl};
use crate::error::{Result, ResultExt, StudioError};

/// [`DownloadSink`] that saves downloads as files in a directory
#[derive(Debug)]
pub struct DirectoryDownloads {
    dir: PathBuf,
    urls: Mutex<HashMap<ObjectUrl, Blob>>,
    links: Mutex<Vec<DownloadLink>>,
}

impl DirectoryDownloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            urls: Mutex::new(HashMap::new()),
            links: Mutex::new(Vec::new()),
        }
    }

    /// Target directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// URLs created and not yet revoked
    pub fn outstanding_urls(&self) -> usize {
        self.urls.lock().len()
    }

    /// Links triggered and not yet removed
    pub fn active_links(&self) -> usize {
        self.links.lock().len()
    }
}

impl DownloadSink for DirectoryDownloads {
    fn create_object_url(&self, blob: Blob) -> ObjectUrl {
        let url = ObjectUrl::new();
        debug!("Created {} for {} bytes of {}", url, blob.len(), blob.mime_type());
        self.urls.lock().insert(url.clone(), blob);
        url
    }

    fn trigger_download(&self, url: &ObjectUrl, filename: &str) -> Result<DownloadLink> {
        if filename.is_empty() || filename.contains(['/', '\\']) || filename == ".." {
            return Err(StudioError::output(format!("invalid filename: {:?}", filename)));
        }

        let blob = self
            .urls
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| StudioError::output(format!("{} is not a live object URL", url)))?;

        std::fs::create_dir_all(&self.dir).context(format!("creating {}", self.dir.display()))?;
        let path = self.dir.join(filename);
        std::fs::write(&path, blob.data()).context(format!("writing {}", path.display()))?;

        info!("Saved {} ({} bytes)", path.display(), blob.len());

        let link = DownloadLink {
            url: url.clone(),
            filename: filename.to_string(),
            path: Some(path),
        };
        self.links.lock().push(link.clone());
        Ok(link)
    }

    fn remove_link(&self, link: &DownloadLink) {
        let mut links = self.links.lock();
        let before = links.len();
        links.retain(|l| l != link);
        if links.len() == before {
            warn!("Link for {} already removed", link.url);
        }
    }

    fn revoke_object_url(&self, url: &ObjectUrl) {
        if self.urls.lock().remove(url).is_some() {
            debug!("Revoked {}", url);
        }
    }
}
