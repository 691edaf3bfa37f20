//! Configuration resolution for wavecap-ci
//!
//! Multi-tier resolution with CLI > environment > TOML > built-in defaults.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use wavecap_common::config::{resolve_root_folder, TomlConfig};
use wavecap_common::Result;

/// Default HTTP port for the capture-ingest service
pub const DEFAULT_PORT: u16 = 5741;

/// Default platform location bridge endpoint
pub const DEFAULT_LOCATION_ENDPOINT: &str = "http://127.0.0.1:5742/location";

/// Default bound on location resolution
pub const DEFAULT_LOCATION_TIMEOUT_MS: u64 = 2000;

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "wavecap-ci", about = "WaveCap capture ingest service")]
pub struct CliArgs {
    /// Root folder for captured data and the database
    #[arg(long)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port
    #[arg(long)]
    pub port: Option<u16>,
}

/// Resolved service configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub root_folder: PathBuf,
    pub port: u16,
    pub location_endpoint: String,
    pub location_timeout: Duration,
}

impl IngestConfig {
    /// Resolve configuration from CLI args, environment, and TOML.
    pub fn resolve(cli: &CliArgs) -> Result<Self> {
        let toml_config = TomlConfig::load()?;

        let root_folder = resolve_root_folder(
            cli.root_folder.as_deref(),
            "WAVECAP_ROOT_FOLDER",
            &toml_config,
        );

        let port = cli
            .port
            .or_else(|| env_port("WAVECAP_PORT"))
            .or(toml_config.port)
            .unwrap_or(DEFAULT_PORT);

        let location_endpoint = std::env::var("WAVECAP_LOCATION_ENDPOINT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or(toml_config.location_endpoint)
            .unwrap_or_else(|| DEFAULT_LOCATION_ENDPOINT.to_string());

        let location_timeout = Duration::from_millis(
            toml_config
                .location_timeout_ms
                .unwrap_or(DEFAULT_LOCATION_TIMEOUT_MS),
        );

        Ok(Self {
            root_folder,
            port,
            location_endpoint,
            location_timeout,
        })
    }
}

fn env_port(var: &str) -> Option<u16> {
    let raw = std::env::var(var).ok()?;
    match raw.parse() {
        Ok(port) => Some(port),
        Err(_) => {
            warn!("Ignoring unparseable {}={}", var, raw);
            None
        }
    }
}
