#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod apple;
pub mod check_certs;
pub mod config;
pub mod google;
pub mod input;
pub mod inspect;

use crate::runtime;

pub const LOG_ENV: &str = "WALLETC_LOG";

#[derive(Debug, Parser)]
#[command(name = "walletc", about = "Race wallet pass issuer CLI", version)]
pub struct Cli {
    /// Logging filter (overrides WALLETC_LOG)
    #[arg(long = "log", default_value = "info", global = true)]
    pub verbosity: String,

    /// Service configuration file (defaults to WALLETC_CONFIG or ./walletc.toml)
    #[arg(long = "service-config", value_name = "FILE", global = true)]
    pub service_config: Option<PathBuf>,

    /// Emit machine-readable JSON output where applicable
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build and sign an Apple Wallet .pkpass for one runner
    Apple(self::apple::AppleArgs),
    /// Issue a Google Wallet save link for one runner
    Google(self::google::GoogleArgs),
    /// Verify a .pkpass and print its contents
    Inspect(self::inspect::InspectArgs),
    /// Load and validate the Apple signing certificates
    CheckCerts(self::check_certs::CheckCertsArgs),
    /// Show the resolved service configuration and secret availability
    Config(self::config::ConfigArgs),
}

/// Resolve the logging filter to use for telemetry initialisation.
pub fn resolve_env_filter(cli: &Cli) -> String {
    std::env::var(LOG_ENV).unwrap_or_else(|_| cli.verbosity.clone())
}

/// Execute the CLI using a pre-parsed argument set.
pub async fn run_with_cli(cli: Cli) -> Result<()> {
    let runtime = runtime::resolve_runtime(cli.service_config.as_deref())?;

    match cli.command {
        Command::Apple(args) => self::apple::handle(args, cli.json, &runtime).await?,
        Command::Google(args) => self::google::handle(args, cli.json, &runtime).await?,
        Command::Inspect(args) => self::inspect::handle(args, cli.json)?,
        Command::CheckCerts(args) => self::check_certs::handle(args, cli.json, &runtime)?,
        Command::Config(args) => self::config::handle(args, cli.json, &runtime)?,
    }

    Ok(())
}
