use anyhow::{Context, Result};
use clap::Parser;
use strata_app::{DriverOptions, Snapshot, bootstrap, drive};
use strata_core::SimulationConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    version,
    about = "Run the Strata region/node simulation and print periodic snapshots"
)]
struct Cli {
    /// Number of nodes to seed.
    #[arg(long, default_value_t = 60)]
    nodes: usize,
    /// Number of steps to run.
    #[arg(long, default_value_t = 200)]
    steps: usize,
    /// RNG seed; omitted means a fresh seed from OS entropy.
    #[arg(long, env = "STRATA_SEED")]
    seed: Option<u64>,
    /// Print a snapshot every N steps.
    #[arg(long, default_value_t = 20)]
    report_every: usize,
    /// Radius used for spatial neighbor subsets.
    #[arg(long, default_value_t = SimulationConfig::default().spatial_radius)]
    spatial_radius: f64,
    /// Per-step checkpoint probability.
    #[arg(long, default_value_t = SimulationConfig::default().checkpoint_probability)]
    checkpoint_probability: f64,
    /// Include a wall-clock timestamp in checkpoint hashes.
    #[arg(long)]
    timestamped: bool,
    /// Emit snapshots as JSON lines instead of log records.
    #[arg(long)]
    json: bool,
}

impl From<&Cli> for DriverOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            nodes: cli.nodes,
            seed: cli.seed,
            spatial_radius: cli.spatial_radius,
            checkpoint_probability: cli.checkpoint_probability,
            timestamped: cli.timestamped,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut sim = bootstrap(&DriverOptions::from(&cli))?;
    info!(steps = cli.steps, seed = ?cli.seed, "starting Strata simulation");
    let json = cli.json;
    drive(&mut sim, cli.steps, cli.report_every, |snap| print_snapshot(snap, json))?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_snapshot(snap: &Snapshot, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(snap).context("failed to encode snapshot")?;
        println!("{line}");
    } else {
        info!(
            tick = snap.tick,
            nodes = snap.nodes,
            incubating = snap.incubating,
            thriving = snap.thriving,
            observers = snap.observers,
            mean_coherence = format_args!("{:.2}", snap.mean_coherence),
            mean_entropy = format_args!("{:.3}", snap.mean_entropy),
            mean_sandbox = format_args!("{:.3}", snap.mean_sandbox),
            checkpoints = snap.checkpoints,
            "snapshot"
        );
    }
    Ok(())
}
