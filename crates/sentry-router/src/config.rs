use std::path::PathBuf;

use alloy_primitives::B256;
use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// CLI STRUCTS
// ============================================================================

/// sentry-router: multi-sentry eth/66 message router.
#[derive(Parser, Debug)]
#[command(name = "sentry-router", version = "0.1.0")]
pub struct Cli {
    /// Path to TOML configuration file.
    #[arg(short = 'C', long)]
    pub config: Option<PathBuf>,

    /// Comma-separated sentry gRPC addresses (host:port).
    #[arg(short = 's', long = "sentry", value_delimiter = ',')]
    pub sentries: Vec<String>,

    /// Network id announced in the status handshake.
    #[arg(long = "network-id")]
    pub network_id: Option<u64>,

    /// Genesis hash announced in the status handshake (0x-prefixed hex).
    #[arg(long = "genesis")]
    pub genesis: Option<String>,

    /// The chain has passed its terminal total difficulty.
    #[arg(long = "ttd-passed")]
    pub ttd_passed: bool,

    /// Fetch and log peer metadata on connect events.
    #[arg(long = "log-peer-info")]
    pub log_peer_info: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

// ============================================================================
// CONFIG FILE STRUCTS
// ============================================================================

/// Configuration loaded from TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub sentries: Vec<String>,
    pub network_id: Option<u64>,
    pub genesis: Option<String>,
    pub ttd_passed: Option<bool>,
    pub log_peer_info: Option<bool>,
    pub log_level: Option<String>,
}

// ============================================================================
// RUNTIME CONFIG
// ============================================================================

/// Final merged configuration for runtime.
#[derive(Debug)]
pub struct RuntimeConfig {
    pub sentries: Vec<String>,
    pub network_id: u64,
    pub genesis_hash: B256,
    pub ttd_passed: bool,
    pub log_peer_info: bool,
    pub log_level: String,
}

impl RuntimeConfig {
    /// Merge CLI args with config file. Precedence: CLI > config file > defaults.
    pub fn from_cli_and_file(cli: &Cli, file: ConfigFile) -> Result<Self, ConfigError> {
        let sentries = if !cli.sentries.is_empty() {
            cli.sentries.clone()
        } else {
            file.sentries
        };
        if sentries.is_empty() {
            return Err(ConfigError::MissingRequired("sentry"));
        }

        let network_id = cli.network_id.or(file.network_id).unwrap_or(1);

        let genesis = cli
            .genesis
            .clone()
            .or(file.genesis)
            .ok_or(ConfigError::MissingRequired("genesis"))?;
        let genesis_hash = parse_hash(&genesis)?;

        let ttd_passed = cli.ttd_passed || file.ttd_passed.unwrap_or(false);

        let log_peer_info = cli.log_peer_info || file.log_peer_info.unwrap_or(false);

        let log_level = cli
            .log_level
            .clone()
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        Ok(RuntimeConfig {
            sentries,
            network_id,
            genesis_hash,
            ttd_passed,
            log_peer_info,
            log_level,
        })
    }
}

fn parse_hash(s: &str) -> Result<B256, ConfigError> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| ConfigError::InvalidHash(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(ConfigError::InvalidHash(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("--{0} is required (via CLI or config file)")]
    MissingRequired(&'static str),
    #[error("invalid hash: {0}")]
    InvalidHash(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

// ============================================================================
// LOADING FUNCTIONS
// ============================================================================

/// Load TOML config file, returns default if path is None.
pub fn load_config_file(path: Option<&PathBuf>) -> Result<ConfigFile, ConfigError> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)?;
            toml::from_str(&content).map_err(ConfigError::Toml)
        }
        None => Ok(ConfigFile::default()),
    }
}
