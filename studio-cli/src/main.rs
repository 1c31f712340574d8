//! Studio CLI
//!
//! Record the screen and camera into a composited WebM file.
//!
//! # Usage
//!
//! ```bash
//! # Interactive session: toggle sources, record, pause, stop from stdin
//! studio record --sources camera,screen
//!
//! # Record ten seconds of everything at 1080p
//! studio record --sources audio,camera,screen --resolution 1080p --duration 10
//!
//! # Save one composite frame
//! studio snapshot -o frame.png
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Studio - screen and camera recording with a composited canvas
#[derive(Parser)]
#[command(name = "studio")]
#[command(version)]
#[command(about = "Screen + camera recording studio with a composited canvas", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recording session
    #[command(alias = "rec")]
    Record(commands::RecordArgs),

    /// Render one composite frame to a PNG file
    Snapshot(commands::SnapshotArgs),

    /// List canvas resolution presets
    Presets,

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("studio={}", level).parse()?),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Record(args) => commands::record(args).await?,
        Commands::Snapshot(args) => commands::snapshot(args).await?,
        Commands::Presets => commands::presets(),
        Commands::Config(args) => commands::config(args).await?,
    }

    Ok(())
}
