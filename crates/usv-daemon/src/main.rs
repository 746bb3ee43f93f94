// crates/usv-daemon/src/main.rs
//
// Binary entrypoint for the USV daemon.
//
// Initializes tracing, parses CLI arguments, loads configuration, opens the
// state store, restores persisted protocol state (or runs genesis), and
// drives block progression and epoch rollovers until shutdown.

mod config;
mod epoch_events;
mod scheduler;
mod shared;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::DaemonConfig;
use epoch_events::EpochEvent;
use scheduler::EpochScheduler;
use shared::DaemonSharedState;

use usv_core::traits::StateStore;
use usv_economics::{snapshot, Capability, Protocol, Usv};
use usv_store::{MemoryStore, RocksStore};

/// USV daemon: runs the treasury protocol's epoch clock.
#[derive(Parser, Debug)]
#[command(name = "usv-daemon", version = "0.1.0", about = "Universal (USV) treasury protocol daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.usv/config.toml")]
    config: String,

    /// Override the configured data directory.
    #[arg(long)]
    data_dir: Option<String>,

    /// Keep all state in memory.
    #[arg(long)]
    ephemeral: bool,

    /// Override the configured block interval, in milliseconds.
    #[arg(long)]
    block_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration from TOML file, falling back to defaults if the file
    // is not found.
    let config_path = expand_tilde(&args.config);
    let (mut daemon_config, config_error) = match DaemonConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (DaemonConfig::default(), Some(e.to_string())),
    };

    // Initialize tracing subscriber for structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&daemon_config.log_level)),
        )
        .init();

    match config_error {
        None => tracing::info!("Loaded configuration from {}", config_path),
        Some(e) => tracing::warn!(
            "Could not load config from {}: {}. Using defaults.",
            config_path,
            e
        ),
    }

    // CLI flags override the config file.
    if let Some(dir) = args.data_dir {
        daemon_config.data_dir = dir;
    }
    if args.ephemeral {
        daemon_config.ephemeral = true;
    }
    if let Some(ms) = args.block_interval_ms {
        daemon_config.block_interval_ms = ms;
    }

    tracing::info!("USV Daemon v0.1.0");
    tracing::info!("Data directory: {}", daemon_config.data_dir);
    tracing::info!("Block interval: {} ms", daemon_config.block_interval_ms);
    tracing::info!(
        "Epoch length: {} blocks",
        daemon_config.genesis.epoch_length_blocks
    );

    let store: Arc<dyn StateStore> = if daemon_config.ephemeral {
        tracing::warn!("Running ephemeral: state is kept in memory only");
        Arc::new(MemoryStore::new())
    } else {
        let db_path = format!("{}/rocksdb", expand_tilde(&daemon_config.data_dir));
        let store = RocksStore::open(&db_path)
            .map_err(|e| format!("Failed to open RocksDB at {}: {}", db_path, e))?;
        tracing::info!("RocksStore opened at {}", db_path);
        Arc::new(store)
    };

    let protocol = restore_or_genesis(store.as_ref(), &daemon_config).await?;
    log_protocol_summary(&protocol);

    let shared_state = DaemonSharedState::new(protocol, store);
    if daemon_config.ephemeral {
        tracing::debug!("Skipping initial snapshot in ephemeral mode");
    } else {
        shared_state.persist().await?;
    }

    // Create broadcast channel for epoch events.
    let (event_tx, mut event_rx) = tokio::sync::broadcast::channel::<EpochEvent>(64);
    let uptime_state = shared_state.clone();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            if let EpochEvent::EpochAdvanced { epoch, block, index, next_distribution } = event {
                tracing::info!(
                    epoch,
                    block,
                    index,
                    next_distribution = %Usv::from_units(next_distribution),
                    uptime_secs = uptime_state.start_time.elapsed().as_secs(),
                    "Epoch advanced"
                );
            }
        }
    });

    let mut scheduler = EpochScheduler::new(
        shared_state,
        Duration::from_millis(daemon_config.block_interval_ms),
        daemon_config.snapshot_interval_blocks,
        event_tx,
    );
    scheduler.run().await?;

    tracing::info!("USV daemon shut down gracefully");
    Ok(())
}

/// Load persisted state, or run genesis when the store is empty.
///
/// Configured liquidity pools are re-attached either way.
async fn restore_or_genesis(
    store: &dyn StateStore,
    config: &DaemonConfig,
) -> Result<Protocol, Box<dyn std::error::Error>> {
    let mut protocol = match snapshot::load(store).await? {
        Some(state) => {
            tracing::info!(block = state.block, "Restored protocol state");
            Protocol::from_state(state)
        }
        None => {
            tracing::info!("No persisted state found, running genesis");
            Protocol::genesis(&config.genesis)?
        }
    };
    let bound = protocol.rebind_pools(&config.genesis.liquidity_pools);
    if bound > 0 {
        tracing::info!(pools = bound, "Liquidity valuations bound");
    }
    Ok(protocol)
}

fn log_protocol_summary(protocol: &Protocol) {
    let addresses = protocol.addresses();
    tracing::info!(
        block = protocol.block(),
        epoch = protocol.epoch().number,
        next_epoch_block = protocol.epoch().end_block,
        reserves = %Usv::from_units(protocol.total_reserves()),
        supply = %Usv::from_units(protocol.total_supply(&addresses.usv)),
        staked = %Usv::from_units(protocol.circulating_supply()),
        index = protocol.index(),
        reserve_tokens = protocol.grantees(Capability::ReserveToken).len(),
        liquidity_tokens = protocol.grantees(Capability::LiquidityToken).len(),
        "Protocol ready"
    );
    tracing::info!("Administrator: {}", addresses.admin);
    tracing::info!("Treasury: {}", addresses.treasury);
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}
