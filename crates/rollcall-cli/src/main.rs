mod config;
mod render;
mod term;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::{Config, Settings};
use render::TerminalRenderer;
use rollcall_core::{
    AttendanceSession, DescriptorStore, EuclideanMatcher, OnnxEncoder, SessionOutcome, SystemClock,
    TerminalReason,
};
use rollcall_hw::Camera;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Webcam face-recognition attendance", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one attendance session and write its log file
    Run {
        #[command(flatten)]
        settings: Settings,
        /// Print the session outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// List identities loaded from the known-faces directory
    Enrolled {
        #[command(flatten)]
        settings: Settings,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List available V4L2 capture devices
    Devices,
}

#[derive(Serialize)]
struct EnrolledEntry<'a> {
    index: usize,
    name: &'a str,
    dim: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(term::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { settings, json } => run(&Config::load(&settings)?, json),
        Commands::Enrolled { settings, json } => enrolled(&Config::load(&settings)?, json),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found.");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
    }
}

fn load_store(config: &Config, encoder: &mut OnnxEncoder) -> Result<DescriptorStore> {
    let store = DescriptorStore::build(&config.known_faces_dir, encoder).with_context(|| {
        format!("failed to enroll faces from {}", config.known_faces_dir.display())
    })?;
    if store.is_empty() {
        tracing::warn!(
            dir = %config.known_faces_dir.display(),
            "no identities enrolled; every face will be logged as Unknown"
        );
    }
    Ok(store)
}

fn load_encoder(config: &Config) -> Result<OnnxEncoder> {
    OnnxEncoder::load(&config.detector_model_path(), &config.embedder_model_path())
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))
}

fn run(config: &Config, json: bool) -> Result<()> {
    let mut encoder = load_encoder(config)?;
    let store = load_store(config, &mut encoder)?;

    let mut camera = Camera::open(&config.camera_device)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    camera.warm_up(config.warmup_frames)?;

    if !json {
        println!("Session running. Press q or Esc to quit.");
    }
    let mut renderer = TerminalRenderer::new(config.preview.clone())?;
    let clock = SystemClock::start();

    let outcome = AttendanceSession::new(
        &store,
        EuclideanMatcher::new(config.match_threshold),
        &mut encoder,
        &mut renderer,
        &clock,
        config.session_options(),
    )
    .run(camera);
    // Leave raw mode before anything else is printed.
    drop(renderer);
    let outcome = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    if outcome.reason == TerminalReason::StreamFailure {
        bail!(
            "camera stream failed: {}",
            outcome.stream_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_outcome(outcome: &SessionOutcome) {
    println!("Session ended: {} ({} frames)", outcome.reason, outcome.frames);
    match (&outcome.record, &outcome.log_path) {
        (Some(record), Some(path)) => {
            println!(
                "Logged {} at {}: {}",
                record.subject,
                record.row_time(),
                record.description
            );
            println!("Log file: {}", path.display());
        }
        _ => println!("No attendance recorded."),
    }
    if let Some(path) = &outcome.mismatch_path {
        println!("Mismatch capture: {}", path.display());
    }
}

fn enrolled(config: &Config, json: bool) -> Result<()> {
    let mut encoder = load_encoder(config)?;
    let store = load_store(config, &mut encoder)?;

    let entries: Vec<EnrolledEntry> = store
        .identities()
        .iter()
        .enumerate()
        .map(|(index, id)| EnrolledEntry {
            index,
            name: &id.name,
            dim: id.embedding.dim(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No identities enrolled from {}.", config.known_faces_dir.display());
    } else {
        for e in &entries {
            println!("{:>3}  {}", e.index, e.name);
        }
    }
    Ok(())
}
