use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facescreen_core::pipeline::{EYE_CASCADE, FRONTAL_ALT_CASCADE, FRONTAL_CASCADE, PROFILE_CASCADE};
use facescreen_core::{AnalysisResponse, Pipeline, PredictionResult};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod bootstrap;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facescreen", about = "Facial image screening CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one or more images and print a JSON result per image
    Analyze {
        /// Image files (JPEG, PNG, ...)
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Download the 68-point landmark model
    FetchLandmarks {
        /// Source of the bzip2-compressed model
        #[arg(long, default_value = bootstrap::LANDMARK_MODEL_URL)]
        url: String,
        /// Replace an existing model
        #[arg(long)]
        force: bool,
    },
    /// Show resolved configuration and model availability
    Status,
}

/// One line of `analyze` output.
#[derive(Serialize)]
struct ImageReport {
    image: PathBuf,
    #[serde(flatten)]
    response: AnalysisResponse,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Analyze { images, pretty } => analyze(&config, images, pretty).await?,
        Commands::FetchLandmarks { url, force } => {
            match bootstrap::fetch_landmarks(&url, &config.landmark_model, force).await? {
                bootstrap::FetchOutcome::AlreadyPresent(path) => {
                    println!("Landmark model already present: {} (use --force to replace)", path.display());
                }
                bootstrap::FetchOutcome::Installed { path, bytes } => {
                    println!("Installed landmark model: {} ({bytes} bytes)", path.display());
                }
            }
        }
        Commands::Status => {
            let status = status(&config);
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

async fn analyze(config: &Config, images: Vec<PathBuf>, pretty: bool) -> Result<()> {
    let paths = config.model_paths();
    let pipeline = tokio::task::spawn_blocking(move || Pipeline::load(&paths))
        .await?
        .context("loading models")?;
    let pipeline = Arc::new(pipeline);

    let handles: Vec<_> = images
        .into_iter()
        .map(|image| {
            let pipeline = Arc::clone(&pipeline);
            tokio::task::spawn_blocking(move || {
                let result = match image::open(&image) {
                    Ok(decoded) => pipeline.predict_dynamic(&decoded),
                    Err(e) => {
                        tracing::warn!(image = %image.display(), error = %e, "cannot decode image");
                        PredictionResult::error(format!("cannot decode image: {e}"))
                    }
                };
                ImageReport {
                    image,
                    response: AnalysisResponse::from(result),
                }
            })
        })
        .collect();

    for handle in handles {
        let report = handle.await?;
        let line = if pretty {
            serde_json::to_string_pretty(&report)?
        } else {
            serde_json::to_string(&report)?
        };
        println!("{line}");
    }

    Ok(())
}

fn status(config: &Config) -> serde_json::Value {
    let cascades: serde_json::Map<String, serde_json::Value> =
        [FRONTAL_CASCADE, FRONTAL_ALT_CASCADE, PROFILE_CASCADE, EYE_CASCADE]
            .iter()
            .map(|name| (name.to_string(), config.cascade_dir.join(name).exists().into()))
            .collect();

    serde_json::json!({
        "config": config,
        "models": {
            "cascades": cascades,
            "landmarks": config.landmark_model.exists(),
            "classifier": config.classifier_model.exists(),
        },
        "ready": config.cascade_dir.join(FRONTAL_CASCADE).exists() && config.classifier_model.exists(),
    })
}
