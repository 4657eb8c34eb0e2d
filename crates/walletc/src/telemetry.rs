use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub const DEFAULT_FILTER: &str = "info";

/// Install the stderr `fmt` subscriber with the given filter directive.
///
/// An unparsable directive falls back to [`DEFAULT_FILTER`].
pub fn install(filter: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(filter).or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
