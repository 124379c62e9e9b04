use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "xcord-hub",
    about = "Control plane for the hosted communication platform: provisions and tears down tenant instances",
    version
)]
pub struct Cli {
    /// Optional YAML config file; HUB_* environment variables override it.
    #[arg(long, env = "HUB_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the orchestrator: worker loop, reconciler, and the
    /// health/metrics endpoint.
    Run,

    /// Show an instance summary table.
    Status,

    /// Show the provisioning event log of one instance.
    Events {
        /// Instance ID.
        instance_id: i64,
    },

    /// Create an instance row and enqueue it for provisioning.
    Provision {
        /// Subdomain label, e.g. "acme" for acme.<base-domain>.
        subdomain: String,

        /// Owning hub user ID.
        #[arg(long)]
        owner: i64,

        /// Display name; defaults to the subdomain.
        #[arg(long)]
        name: Option<String>,

        /// Feature tier.
        #[arg(long, default_value = "chat")]
        tier: TierArg,

        /// User-count tier.
        #[arg(long, default_value = "10")]
        max_users: u32,

        /// HD media upgrade.
        #[arg(long)]
        hd: bool,
    },

    /// Enqueue an instance for destruction.
    Destroy {
        /// Instance ID.
        instance_id: i64,
    },
}

#[derive(Debug, Clone, ValueEnum)]
pub enum TierArg {
    Chat,
    Audio,
    Video,
}
