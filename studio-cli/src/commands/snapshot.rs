//! Snapshot command - render one composite frame

use anyhow::{Context, Result};
use clap::Args;
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use studio_core::capture::TestPatternDevices;
use studio_core::output::DirectoryDownloads;
use studio_core::{Resolution, SourceKind, Studio};

use super::load_config;

/// Arguments for the snapshot command
#[derive(Args)]
pub struct SnapshotArgs {
    /// Output PNG file
    #[arg(short, long, default_value = "snapshot.png")]
    output: PathBuf,

    /// Sources to draw
    #[arg(short, long, value_delimiter = ',', default_value = "camera,screen")]
    sources: Vec<SourceKind>,

    /// Canvas resolution (1080p, 720p)
    #[arg(short, long)]
    resolution: Option<Resolution>,

    /// Config file to use instead of the default
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Render the canvas once and save it
pub async fn snapshot(args: SnapshotArgs) -> Result<()> {
    let mut config = load_config(args.config)?;
    if let Some(resolution) = args.resolution {
        config.resolution = resolution;
    }
    let downloads = Arc::new(DirectoryDownloads::new(config.download_dir.clone()));

    let mut studio = Studio::new(config, Arc::new(TestPatternDevices::default()), downloads);
    studio.mount();
    for kind in &args.sources {
        studio.toggle(*kind).await;
    }

    // Give the sources a moment to produce their first frames
    tokio::time::sleep(Duration::from_millis(100)).await;
    studio.render_now();

    let frame = studio
        .canvas_frame()
        .context("Canvas is not mounted")?;
    studio.shutdown().await;

    let image = RgbaImage::from_raw(frame.width, frame.height, frame.data)
        .context("Canvas buffer has the wrong size")?;
    image
        .save(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!(
        "Saved {}x{} snapshot to {}",
        frame.width,
        frame.height,
        args.output.display()
    );
    Ok(())
}
