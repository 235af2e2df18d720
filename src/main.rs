//! Datom-View: command line entry point

use anyhow::Context;
use clap::Parser;
use datom_view::cli::{self, Cli};
use datom_view::config::ClientConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env().context("reading DATOM_* configuration")?;
    cli::run(cli, config).await.context("command failed")?;
    Ok(())
}
