//! Shoplift Guard smoke runner (sg-smoke)
//!
//! Exercises the alert pipeline end to end without cameras: runs the stub
//! track batch, then the legacy single-event sequence (two events from the
//! same camera, one from another), and prints the tail of the incident log.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sg_alerts::{AlertPipeline, AlertResponse, RawEvent};
use sg_common::config::{read_toml_config, TomlConfig};
use sg_common::logging::init_tracing;
use sg_common::SystemClock;
use tracing::info;

/// Command-line arguments for sg-smoke
#[derive(Parser, Debug)]
#[command(name = "sg-smoke")]
#[command(about = "Smoke test for the Shoplift Guard alert pipeline")]
#[command(version)]
struct Args {
    /// TOML config file (overrides SHOPLIFT_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for incidents.jsonl and audio
    #[arg(short, long, env = "SHOPLIFT_ALERTS_DIR")]
    alerts_dir: Option<PathBuf>,

    /// Force local judge and voice
    #[arg(long)]
    dry_run: bool,

    /// Incident lines to print after the run
    #[arg(short, long, default_value = "10")]
    tail: usize,

    /// Skip the legacy single-event sequence
    #[arg(long)]
    batch_only: bool,
}

fn load_config(args: &Args) -> Result<TomlConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = read_toml_config(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            config.apply_overrides(|key| std::env::var(key).ok());
            config.sanitize();
            config
        }
        None => TomlConfig::load(),
    };

    if let Some(dir) = &args.alerts_dir {
        config.alerts_dir = dir.clone();
    }
    if args.dry_run {
        config.dry_run = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.logging);

    info!(
        "Starting sg-smoke (alerts dir {}, dry_run={})",
        config.alerts_dir.display(),
        config.dry_run
    );

    let pipeline = AlertPipeline::new(&config, Arc::new(SystemClock))
        .context("Failed to initialize alert pipeline")?;

    let simulation = pipeline.simulate().await;
    println!("{}", serde_json::to_string_pretty(&simulation)?);

    if !args.batch_only {
        let legacy = [
            RawEvent::stub().with_camera("cam1").with_confidence(0.85),
            RawEvent::stub().with_camera("cam1").with_confidence(0.90),
            RawEvent::stub().with_camera("cam2").with_confidence(0.80),
        ];
        for raw in legacy {
            let camera = raw.camera_id.clone().unwrap_or_default();
            let result = pipeline
                .process(raw)
                .await
                .with_context(|| format!("Legacy event for {} rejected", camera))?;
            println!("{}", serde_json::to_string(&AlertResponse::from(&result))?);
        }
    }

    let records = pipeline
        .recorder()
        .tail(args.tail)
        .await
        .context("Failed to read incident log")?;
    println!("--- last {} incidents ({}) ---", records.len(), pipeline.recorder().path().display());
    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }

    Ok(())
}
