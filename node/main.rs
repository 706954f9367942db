//! Tenure node CLI
//!
//! ```bash
//! # Deterministic in-process chain, 30 rounds, one in five participants offline
//! tenure-node simulate --rounds 30 --offline-probability 0.2 --report report.json
//!
//! # Produce on the wall clock for a minute
//! tenure-node --config tenure.toml run --duration-secs 60
//!
//! # Summarise a saved round store
//! tenure-node inspect snapshot.bin
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use tenure_consensus::{ConsensusEngine, PublicKey, RoundStore};
use tenure_node::simulation::devnet_keys;
use tenure_node::telemetry::init_tracing;
use tenure_node::{Clock, LocalChain, NodeSettings, ProducedBlock, ProducerLoop, Simulation, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "tenure-node")]
#[command(version, about = "Round-based leader-rotation consensus node", long_about = None)]
struct Cli {
    /// Settings file (TOML); `TENURE__*` environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info,tenure_consensus=debug`; `RUST_LOG` wins
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every participant against one engine on a simulated clock
    Simulate {
        #[arg(short, long)]
        rounds: Option<u64>,

        #[arg(short, long)]
        participants: Option<u8>,

        #[arg(long)]
        seed: Option<u64>,

        /// Chance that a participant sits out a round (0.0-1.0)
        #[arg(long)]
        offline_probability: Option<f64>,

        /// Write the per-round report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write the final round store
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Produce blocks on the wall clock until interrupted
    Run {
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Print a summary of a saved round store
    Inspect { snapshot: PathBuf },

    /// Print the effective settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = NodeSettings::load(cli.config.as_deref()).context("loading settings")?;
    if let Some(filter) = &cli.log_filter {
        settings.logging.filter = filter.clone();
    }
    init_tracing(&settings.logging.filter)?;

    match cli.command {
        Command::Simulate {
            rounds,
            participants,
            seed,
            offline_probability,
            report,
            snapshot,
        } => {
            let sim = &mut settings.simulation;
            sim.rounds = rounds.unwrap_or(sim.rounds);
            sim.participants = participants.unwrap_or(sim.participants);
            sim.seed = seed.unwrap_or(sim.seed);
            sim.offline_probability = offline_probability.unwrap_or(sim.offline_probability);
            settings.validate()?;
            simulate(&settings, report.as_deref(), snapshot.as_deref())
        }
        Command::Run { duration_secs } => run(&settings, duration_secs).await,
        Command::Inspect { snapshot } => inspect(&snapshot),
        Command::Config => {
            print!("{}", settings.to_toml_string()?);
            Ok(())
        }
    }
}

fn simulate(settings: &NodeSettings, report_path: Option<&Path>, snapshot_path: Option<&Path>) -> Result<()> {
    info!(
        participants = settings.simulation.participants,
        rounds = settings.simulation.rounds,
        seed = settings.simulation.seed,
        offline_probability = settings.simulation.offline_probability,
        "starting simulation"
    );
    let mut simulation = Simulation::new(settings.consensus.clone(), settings.simulation.clone())?;
    let report = simulation.run()?;

    info!(
        height = report.height,
        lib = report.confirmed_irreversible_height,
        "simulation finished"
    );
    if let Some(path) = report_path {
        std::fs::write(path, serde_json::to_vec_pretty(&report)?)
            .with_context(|| format!("writing report to {}", path.display()))?;
    }
    if let Some(path) = snapshot_path {
        std::fs::write(path, simulation.snapshot()?)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "rounds": report.rounds.len(),
            "height": report.height,
            "confirmed_irreversible_height": report.confirmed_irreversible_height,
        }))?
    );
    Ok(())
}

async fn run(settings: &NodeSettings, duration_secs: Option<u64>) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut participants = settings.participant_keys()?;
    if participants.is_empty() {
        participants = devnet_keys(settings.simulation.participants);
        warn!(count = participants.len(), "no participants configured, using devnet keys");
    }
    let local: Vec<PublicKey> = match settings.self_key()? {
        Some(key) if participants.contains(&key) => vec![key],
        Some(key) => bail!("self key {key} is not among the configured participants"),
        None => participants.clone(),
    };

    let start = settings.chain.chain_start_ms.unwrap_or_else(|| clock.now());
    let engine = ConsensusEngine::genesis(settings.consensus.clone(), participants, start)?;
    let chain = LocalChain::shared(engine);
    let (stop, shutdown) = watch::channel(false);
    let (events, mut blocks) = mpsc::unbounded_channel::<ProducedBlock>();

    let mut producers = Vec::new();
    for key in local {
        let producer = ProducerLoop::new(key, chain.clone(), clock.clone())
            .with_events(events.clone())
            .with_block_spacing(settings.block_spacing_ms())
            .with_tiny_blocks(settings.chain.tiny_blocks_per_slot);
        producers.push(tokio::spawn(producer.run(shutdown.clone())));
    }
    drop(events);

    let reporter = tokio::spawn(async move {
        while let Some(block) = blocks.recv().await {
            if block.effects.round_advanced {
                info!(
                    round = block.effects.round_number,
                    term = block.effects.term_number,
                    height = block.height,
                    lib = ?block.effects.irreversible_height,
                    "round advanced"
                );
            }
        }
    });

    match duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?,
    }
    info!("shutting down");
    let _ = stop.send(true);

    let mut produced = 0;
    for task in producers {
        produced += task.await.context("producer task panicked")??;
    }
    reporter.await.context("reporter task panicked")?;

    let chain = chain.lock().await;
    info!(
        produced,
        height = chain.height,
        lib = chain.engine.confirmed_irreversible_height(),
        "node stopped"
    );
    if let Some(path) = &settings.chain.snapshot_path {
        std::fs::write(path, chain.engine.snapshot()?)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
        info!(path = %path.display(), "snapshot written");
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let store = RoundStore::from_bytes(&bytes)?;
    let round = store.current_round()?;
    let participants: Vec<_> = round
        .sorted_by_order()
        .into_iter()
        .map(|r| {
            json!({
                "public_key": r.public_key.to_hex(),
                "order": r.order,
                "produced_blocks": r.produced_blocks,
                "missed_time_slots": r.missed_time_slots,
                "implied_irreversible_height": r.implied_irreversible_height,
            })
        })
        .collect();
    let summary = json!({
        "round_number": round.round_number,
        "term_number": round.term_number,
        "chain_start_timestamp": store.chain_start_timestamp(),
        "confirmed_irreversible_height": store.confirmed_irreversible_height(),
        "confirmed_irreversible_round": store.confirmed_irreversible_round(),
        "retained_rounds": store.retained_rounds(),
        "extra_block_producer": round.extra_block_producer_pubkey.to_hex(),
        "participants": participants,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
