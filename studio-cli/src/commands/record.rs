//! Record command - interactive recording session

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use studio_core::capture::{MediaDevices, SourceStatus, TestPatternDevices};
use studio_core::config::{RECORDING_FILENAME, TIMESLICE};
use studio_core::output::DirectoryDownloads;
use studio_core::recorder::RecordedFile;
use studio_core::{Resolution, SourceKind, Studio, StudioError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::time::Instant;
use tracing::{info, warn};

use super::load_config;

/// Arguments for the record command
#[derive(Args)]
pub struct RecordArgs {
    /// Sources to enable at startup (audio, camera, screen)
    #[arg(short, long, value_delimiter = ',')]
    sources: Vec<SourceKind>,

    /// Canvas resolution (1080p, 720p)
    #[arg(short, long)]
    resolution: Option<Resolution>,

    /// Directory the recording is saved to
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Start recording immediately
    #[arg(long)]
    start: bool,

    /// Stop automatically after this many seconds (implies --start)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Refuse access to these sources, to try the error path
    #[arg(long, value_delimiter = ',')]
    deny: Vec<SourceKind>,

    /// Config file to use instead of the default
    #[arg(long)]
    config: Option<PathBuf>,
}

/// What the input loop should do next
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Run a recording session
pub async fn record(args: RecordArgs) -> Result<()> {
    println!("Studio - Recording Session\n");

    let mut config = load_config(args.config)?;
    if let Some(resolution) = args.resolution {
        config.resolution = resolution;
    }
    if let Some(dir) = args.output {
        config.download_dir = dir;
    }

    println!("Configuration:");
    println!("  Resolution:  {} ({}x{})", config.resolution, config.width(), config.height());
    println!("  Refresh:     {} Hz", config.refresh_rate);
    println!("  Capture:     {} fps, VP8 {} kbps", config.capture_fps, config.video_bitrate);
    println!("  Timeslice:   {:?}", TIMESLICE);
    println!("  Output:      {}", config.download_dir.join(RECORDING_FILENAME).display());
    println!();

    let devices = Arc::new(TestPatternDevices::default());
    for kind in &args.deny {
        devices.deny(*kind);
    }
    let downloads = Arc::new(DirectoryDownloads::new(config.download_dir.clone()));

    let mut studio = Studio::new(config, devices, downloads);
    studio.mount();

    for kind in args.sources {
        let status = studio.toggle(kind).await;
        print_toggle(kind, status);
    }

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    if args.start || deadline.is_some() {
        run_command(&mut studio, "record").await?;
    }

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        let auto_stop = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                println!("\nReceived interrupt signal...");
                break;
            }
            _ = auto_stop => {
                println!("Duration reached.");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        if run_command(&mut studio, line.trim()).await? == Flow::Quit {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed");
                        stdin_open = false;
                        if deadline.is_none() {
                            break;
                        }
                    }
                }
            }
        }
    }

    if studio.recorder_state().is_recording() {
        println!("Finishing recording...");
        let file = studio.stop().await.context("Failed to finish recording")?;
        print_file(&file);
    }

    studio.shutdown().await;
    println!("Session closed.");
    Ok(())
}

async fn run_command<D: MediaDevices>(studio: &mut Studio<D>, command: &str) -> Result<Flow> {
    match command {
        "" => {}
        "a" | "audio" | "c" | "camera" | "s" | "screen" => {
            if let Ok(kind) = expand_source(command).parse::<SourceKind>() {
                let status = studio.toggle(kind).await;
                print_toggle(kind, status);
            }
        }
        "r" | "record" => match studio.record() {
            Ok(true) => println!("Recording."),
            Ok(false) => println!("Already recording."),
            Err(e) => report(&e),
        },
        "p" | "pause" => match studio.pause() {
            Ok(state) => println!("Recorder {}.", state),
            Err(e) => report(&e),
        },
        "x" | "stop" => match studio.stop().await {
            Ok(file) => print_file(&file),
            Err(e) => report(&e),
        },
        "i" | "status" => {
            let status = studio.status();
            let json = serde_json::to_string_pretty(&status).context("Failed to render status")?;
            println!("{}", json);
        }
        "h" | "help" | "?" => print_help(),
        "q" | "quit" | "exit" => return Ok(Flow::Quit),
        other => match other.parse::<Resolution>() {
            Ok(resolution) => match studio.set_resolution(resolution) {
                Ok(()) => println!("Canvas is now {}x{}.", resolution.width(), resolution.height()),
                Err(e) => report(&e),
            },
            Err(_) => println!("Unknown command '{}'. Type 'help' for commands.", other),
        },
    }
    Ok(Flow::Continue)
}

fn expand_source(short: &str) -> &str {
    match short {
        "a" => "audio",
        "c" => "camera",
        "s" => "screen",
        other => other,
    }
}

fn print_toggle(kind: SourceKind, status: SourceStatus) {
    match status {
        SourceStatus::Active => println!("  [on ] {}", kind),
        SourceStatus::Inactive => println!("  [off] {}", kind),
        SourceStatus::Error => println!("  [err] {} (access denied)", kind),
    }
}

fn print_file(file: &RecordedFile) {
    println!("Recording saved:");
    if let Some(path) = &file.link.path {
        println!("  File:      {}", path.display());
    } else {
        println!("  File:      {}", file.filename);
    }
    println!("  Type:      {}", file.blob.mime_type());
    println!("  Size:      {} bytes", file.blob.len());
    println!("  Tracks:    {}", file.track_count);
    println!("  Chunks:    {}", file.chunk_count);
    println!("  Duration:  {:.1}s", file.duration.as_secs_f64());
}

fn report(e: &StudioError) {
    println!("Error: {}", e);
    if let Some(hint) = e.user_hint() {
        println!("  hint: {}", hint);
    }
}

fn print_help() {
    println!("Commands:");
    println!("  a, c, s        toggle audio / camera / screen");
    println!("  r              start recording");
    println!("  p              pause or resume");
    println!("  x              stop and save");
    println!("  720p, 1080p    change resolution (not while recording)");
    println!("  i              show status");
    println!("  q              quit (Ctrl+C also works)");
    println!();
}
