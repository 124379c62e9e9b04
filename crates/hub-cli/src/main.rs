mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Command::Run => commands::run(config).await,
        Command::Status => commands::status(config).await,
        Command::Events { instance_id } => commands::events(config, instance_id).await,
        Command::Provision { subdomain, owner, name, tier, max_users, hd } => {
            commands::provision(config, subdomain, owner, name, tier, max_users, hd).await
        }
        Command::Destroy { instance_id } => commands::destroy(config, instance_id).await,
    }
}
