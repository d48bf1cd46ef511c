//! npc-sim - Drive synthetic participants against an in-process connector
//!
//! Provides subcommands for running a simulated session and for writing
//! or inspecting manager configuration files.

use anyhow::Result;
use clap::{Parser, Subcommand};
use npcman::runtime::loopback::{Behavior, ScriptedConnector};
use npcman::runtime::{HumanId, HumanRoster, ManagerConfig, NpcManager, Phase, ScriptId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "npc-sim")]
#[command(about = "Synthetic participant lifecycle simulator", long_about = None)]
struct Cli {
    /// Manager configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn participants, let them connect, then dispose the manager
    Run {
        /// Number of participants to create
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Desired name shared by every participant
        #[arg(long, default_value = "Bot")]
        name: String,

        /// Handshake latency of the simulated connector
        #[arg(long, default_value = "200")]
        latency_ms: u64,

        /// Override the configured handshake timeout
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Every Nth participant hangs until its handshake times out
        #[arg(long)]
        hang_every: Option<usize>,

        /// Every Nth participant is refused by the connector
        #[arg(long)]
        fail_every: Option<usize>,

        /// Humans already holding the desired name
        #[arg(long, default_value = "1")]
        humans: u64,

        /// Fraction of live participants to disconnect before disposing
        #[arg(long, default_value = "0.5")]
        disconnect_ratio: f64,
    },

    /// Write the default configuration to the config path
    InitConfig,

    /// Print the effective configuration
    ShowConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<ManagerConfig> {
    Ok(match path {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig::default(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            count,
            name,
            latency_ms,
            timeout_ms,
            hang_every,
            fail_every,
            humans,
            disconnect_ratio,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(timeout_ms) = timeout_ms {
                config.connect_timeout_ms = timeout_ms;
            }

            let connector = ScriptedConnector::new(Behavior::succeed_after(latency_ms));
            let roster = Arc::new(HumanRoster::new());
            for i in 0..humans {
                let held = if i == 0 { name.clone() } else { format!("{}_{}", name, i) };
                roster.join(HumanId(i), held);
            }

            let manager = NpcManager::new(config, Arc::new(connector.clone()), roster.clone())?;
            manager.watch_renames(roster.subscribe());

            let mut participants = Vec::with_capacity(count);
            for i in 0..count {
                let script = ScriptId::new(format!("script-{}", i));
                if hang_every.is_some_and(|n| n > 0 && i % n == 0) {
                    connector.script(script.clone(), Behavior::Hang);
                } else if fail_every.is_some_and(|n| n > 0 && i % n == 0) {
                    connector.script(script.clone(), Behavior::fail_after(latency_ms, "server full"));
                }
                participants.push(manager.create(&name, script)?);
            }
            println!("Created {} participants (count = {})", participants.len(), manager.count());

            // Let handshakes resolve or time out
            let settle = manager.config().connect_timeout() + manager.config().settle_grace();
            tokio::time::sleep(settle.max(Duration::from_millis(latency_ms * 2))).await;

            let status = manager.status();
            println!(
                "Live: {}, pending: {}, closing: {}, closed: {}",
                status.in_phase(Phase::Live),
                status.in_phase(Phase::Pending),
                status.in_phase(Phase::ClosingFromPending) + status.in_phase(Phase::ClosingFromLive),
                count - status.count
            );
            println!("{}", serde_json::to_string_pretty(&status)?);

            let live: Vec<_> = participants.iter().filter(|p| p.is_connected()).collect();
            let to_drop = ((live.len() as f64) * disconnect_ratio.clamp(0.0, 1.0)).round() as usize;
            for participant in live.iter().take(to_drop) {
                participant.disconnect();
            }
            for participant in live.iter().take(to_drop) {
                participant.disconnected().await;
            }
            println!("Disconnected {} participants (count = {})", to_drop, manager.count());

            manager.dispose().await;
            println!(
                "Disposed: count = {}, handshakes = {}, handles issued = {}, released = {}, leaked = {}",
                manager.count(),
                connector.attempts(),
                connector.issued(),
                connector.released(),
                connector.live_handles()
            );
        }

        Commands::InitConfig => {
            let path = cli.config.unwrap_or_else(|| PathBuf::from("npcman.json"));
            ManagerConfig::default().save(&path)?;
            println!("Wrote default configuration to {:?}", path);
        }

        Commands::ShowConfig => {
            let config = load_config(cli.config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
