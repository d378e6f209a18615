use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ocular_core::{EyeLandmarkIndices, Resolution};
use tracing_subscriber::EnvFilter;

mod client;
mod rectify;

/// Ocular: train and watch the eye-state classifier
#[derive(Parser)]
#[command(name = "ocular")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon and pipeline status
    Status,
    /// Start capture and classification
    Activate,
    /// Stop capture and classification
    Deactivate,
    /// Stop recording training examples
    Release,
    /// Record examples for a class until Ctrl-C
    Train {
        /// Class index, starting at 0
        class: u32,
    },
    /// Print predictions as they change
    Watch {
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,
    },
    /// Produce the canonical eye crop for a still frame
    Rectify {
        #[arg(long)]
        image: PathBuf,
        /// JSON array of [x, y] landmark points
        #[arg(long)]
        landmarks: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Resolution the landmarks are expressed in, e.g. 320x240
        #[arg(long, value_parser = rectify::parse_resolution)]
        display: Option<Resolution>,
        #[arg(long, default_value_t = 227)]
        size: u32,
        #[arg(long, default_value_t = 3.0)]
        padding: f32,
        /// Eye landmark indices as LEFT,TOP,RIGHT,BOTTOM (default 23,24,25,26)
        #[arg(long, value_parser = rectify::parse_eye_indices)]
        eye_indices: Option<EyeLandmarkIndices>,
    },
    /// Check a model file against its expected SHA-256
    VerifyModel { path: PathBuf, sha256: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rectify {
            image,
            landmarks,
            out,
            display,
            size,
            padding,
            eye_indices,
        } => rectify::run(rectify::RectifyArgs {
            image: &image,
            landmarks: &landmarks,
            out: &out,
            display,
            size,
            padding,
            eye: eye_indices.unwrap_or_default(),
        }),
        Commands::VerifyModel { path, sha256 } => {
            let digest = ocular_models::verify_model(&path, Some(&sha256))?;
            println!("{}: ok ({digest})", path.display());
            Ok(())
        }
        Commands::Status => {
            let proxy = client::connect(cli.session_bus).await?;
            let status = client::status(&proxy).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Activate => {
            client::connect(cli.session_bus).await?.activate().await?;
            println!("Pipeline active.");
            Ok(())
        }
        Commands::Deactivate => {
            client::connect(cli.session_bus).await?.deactivate().await?;
            println!("Pipeline stopped.");
            Ok(())
        }
        Commands::Release => {
            client::connect(cli.session_bus).await?.release().await?;
            println!("Training released.");
            Ok(())
        }
        Commands::Train { class } => {
            let proxy = client::connect(cli.session_bus).await?;
            client::train(&proxy, class).await
        }
        Commands::Watch { interval_ms } => {
            let proxy = client::connect(cli.session_bus).await?;
            client::watch(&proxy, Duration::from_millis(interval_ms.max(1))).await
        }
    }
}
