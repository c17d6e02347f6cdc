//! CLI driver: build the simulation from a config file and run it to
//! completion.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use satnet_sim::Simulator;

#[derive(Parser, Debug)]
#[command(name = "satnet-sim", about = "Discrete-time satellite-network simulator")]
struct Args {
    /// Path to the simulation config (JSON)
    config: PathBuf,
    /// Worker threads for per-step node fan-out (1 = serial)
    #[arg(long, default_value = "1")]
    workers: usize,
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let sim = Simulator::new(&args.config, args.workers)
        .with_context(|| format!("building simulation from {:?}", args.config))?;

    let started = Instant::now();
    sim.execute().context("simulation run aborted")?;
    info!(elapsed_s = started.elapsed().as_secs_f64(), "simulation finished");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "satnet_sim=info".into()),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("satnet-sim: {e:#}");
        std::process::exit(1);
    }
}
