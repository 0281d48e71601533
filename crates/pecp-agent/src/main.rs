//! # pecp-agent: Binary Entry Point
//!
//! Resolves configuration, starts the sync agent and runs until Ctrl-C.

use std::process::ExitCode;

use clap::Parser;
use pecp_agent::cli::{Cli, LogFormat};
use pecp_agent::SyncAgent;
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_filter()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve()?;
    tracing::info!(?config, "starting sync agent");

    let agent = SyncAgent::from_config(&config)?;
    let handle = agent.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    handle.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
