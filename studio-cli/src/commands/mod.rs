//! CLI command implementations

mod config;
mod presets;
mod record;
mod snapshot;

pub use config::{config, ConfigArgs};
pub use presets::presets;
pub use record::{record, RecordArgs};
pub use snapshot::{snapshot, SnapshotArgs};

use anyhow::{Context, Result};
use std::path::PathBuf;
use studio_core::config::{ConfigFile, StudioConfig};

/// Load the config file, falling back to defaults when there is none
fn load_config(path: Option<PathBuf>) -> Result<StudioConfig> {
    let file = match path {
        Some(path) => ConfigFile::load_from(path).context("Failed to load config file")?,
        None => ConfigFile::load_or_default(),
    };
    file.into_studio_config().context("Invalid configuration")
}
