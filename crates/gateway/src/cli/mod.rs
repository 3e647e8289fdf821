pub mod config;

use clap::{Parser, Subcommand};

/// nodebridge: pair remote device nodes and invoke their commands.
#[derive(Debug, Parser)]
#[command(name = "nodebridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load config from `NB_CONFIG` (default `config.toml`).  A missing file
/// yields the defaults.
pub fn load_config() -> anyhow::Result<(nb_domain::config::Config, String)> {
    let config_path = std::env::var("NB_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = nb_domain::config::Config::load(&config_path)
        .map_err(|e| anyhow::anyhow!("loading {config_path}: {e}"))?;
    Ok((config, config_path))
}
