#![forbid(unsafe_code)]

//! Pieces shared by the `burrow` binary: configuration file handling and
//! logging setup.

/// TOML configuration with named option profiles.
pub mod config;

pub use config::{default_config_path, CliConfig, ConfigError, Profile};

use tracing_subscriber::EnvFilter;

/// Installs a stderr `tracing` subscriber. `RUST_LOG` wins over `level`
/// when set. Calling it twice is harmless.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
