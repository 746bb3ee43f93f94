// crates/usv-daemon/src/config.rs
//
// Runtime configuration for the USV daemon.
// Loaded from a TOML file or populated with sensible defaults.

use serde::Deserialize;
use std::fs;

use usv_economics::GenesisConfig;

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Directory for local data storage (RocksDB).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Log level used when `RUST_LOG` is unset: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Keep state in memory only. Nothing survives a restart.
    #[serde(default)]
    pub ephemeral: bool,

    /// Wall-clock time per simulated block.
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,

    /// Persist at least this often, in blocks. Epoch rollovers always persist.
    #[serde(default = "default_snapshot_interval_blocks")]
    pub snapshot_interval_blocks: u64,

    /// Deployment parameters, used only when no persisted state exists.
    #[serde(default)]
    pub genesis: GenesisConfig,
}

fn default_data_dir() -> String {
    "~/.usv/data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_block_interval_ms() -> u64 {
    12_000
}

fn default_snapshot_interval_blocks() -> u64 {
    100
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            ephemeral: false,
            block_interval_ms: default_block_interval_ms(),
            snapshot_interval_blocks: default_snapshot_interval_blocks(),
            genesis: GenesisConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: DaemonConfig = toml::from_str(contents)?;
        if config.snapshot_interval_blocks == 0 {
            return Err("snapshot_interval_blocks must be positive".into());
        }
        Ok(config)
    }
}
