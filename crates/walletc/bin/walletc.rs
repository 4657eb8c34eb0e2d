use clap::Parser;
use tokio::runtime::Builder;
use walletc::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    walletc::telemetry::install(&cli::resolve_env_filter(&cli))?;

    let rt = Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(cli::run_with_cli(cli))
}
