#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that plays a headless dreamflap session.

mod config;
mod reference;
mod runtime;
mod session;

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use dreamflap_world::{JsonFile, NoSnapshot, WorldModelEnv};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::AppConfig,
    runtime::InferenceRuntime,
    session::SessionPlan,
};

#[derive(Parser, Debug)]
#[command(name = "dreamflap", version, about = "Play a headless world-model session")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON snapshot used to seed the context.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Number of steps to play.
    #[arg(long, default_value_t = 16)]
    steps: u64,

    /// Zero-based ticks on which to flap, comma separated.
    #[arg(long, value_delimiter = ',')]
    flap_at: Vec<u64>,

    /// Overrides the sampler seed from the configuration.
    #[arg(long)]
    seed: Option<u64>,

    /// Writes the final state as a JSON snapshot.
    #[arg(long)]
    export: Option<PathBuf>,
}

/// Entry point for the dreamflap command-line interface.
fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.world.sampler.seed = seed;
    }

    let runtime = InferenceRuntime::initialise(&config.reference)?;
    let mut env = WorldModelEnv::new(config.world, runtime.denoiser(), runtime.predictor())
        .context("invalid sampler configuration")?;

    let outcome = match &args.snapshot {
        Some(path) => env.reset(&JsonFile::new(path)),
        None => env.reset(&NoSnapshot),
    };
    if args.snapshot.is_some() && !outcome.is_restored() {
        warn!(?outcome, "continuing from zeroed state");
    }

    let plan = SessionPlan::new(args.steps, args.flap_at.iter().copied());
    let summary = session::run(&mut env, &plan)?;

    if let Some(path) = &args.export {
        let json = env
            .capture_snapshot()
            .to_json()
            .context("failed to encode snapshot")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        info!(path = %path.display(), "snapshot exported");
    }

    println!("{summary}");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
