//! # voxlink
//!
//! Replays a recorded notification script through a client session and prints
//! the reconstructed channel tree.

#![deny(unsafe_code)]

mod replay;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::TryRecvError;
use voxlink_core::settings::{apply_env_overrides, load_settings_from_path, validate_settings};
use voxlink_core::Settings;
use voxlink_session::{DisconnectedTransport, MemoryAttributeSource, Session};
use voxlink_telemetry::{init_telemetry, TelemetryConfig};

/// Voice session mirror tools.
#[derive(Parser, Debug)]
#[command(name = "voxlink", about = "Voice session mirror tools")]
struct Cli {
    /// Log level (overrides settings and VOXLINK_LOG_LEVEL).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a JSON-lines notification script and print the channel tree.
    Replay {
        /// Script file.
        #[arg(long)]
        script: PathBuf,

        /// Settings JSON file.
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Print the session events published while replaying.
        #[arg(long)]
        events: bool,

        /// Print a metrics snapshot as JSON after the tree.
        #[arg(long)]
        metrics: bool,
    },
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    match path {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => {
            let mut settings = Settings::default();
            apply_env_overrides(&mut settings);
            validate_settings(&settings)?;
            Ok(settings)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            script,
            settings,
            events,
            metrics,
        } => {
            let settings = load_settings(settings.as_ref())?;
            let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
            let _ = init_telemetry(&TelemetryConfig::from_level_name(level, settings.logging.json));

            let file = File::open(&script)
                .with_context(|| format!("failed to open script {}", script.display()))?;
            let steps = replay::parse_script(BufReader::new(file))?;
            tracing::info!(steps = steps.len(), script = %script.display(), "replaying script");

            let source = Arc::new(MemoryAttributeSource::new());
            let session = Session::new(settings, Arc::new(DisconnectedTransport), source.clone());
            let mut rx = session.subscribe();

            let applied = replay::run(&session, &source, steps);
            tracing::info!(applied, channels = session.tree().len(), "replay finished");

            if events {
                loop {
                    match rx.try_recv() {
                        Ok(event) => println!("{event:?}"),
                        Err(TryRecvError::Lagged(skipped)) => {
                            println!("... {skipped} events dropped");
                        }
                        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                    }
                }
            }

            print!("{}", replay::render_tree(&session));

            if metrics {
                let snapshot = session.metrics().snapshot();
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            Ok(())
        }
    }
}
