//! dnsvisor: DNS forwarding and dynamic DNS supervisor.
//!
//! # Usage
//!
//! ```text
//! dnsvisor [--settings <file>] daemon start|stop|status
//! dnsvisor apply <file>
//! dnsvisor clear
//! dnsvisor config
//! dnsvisor state [--json]
//! dnsvisor reset-forwarding [--instance <name>]
//! dnsvisor reset-cache [--instance <name>]
//! dnsvisor update-dynamic <interface>
//! dnsvisor namespace added|removed <name>
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    actions::{InstanceArgs, NamespaceCommand, UpdateDynamicArgs},
    config::ApplyArgs,
    daemon::DaemonCommand,
    state::StateArgs,
    Context,
};

#[derive(Parser, Debug)]
#[command(
    name = "dnsvisor",
    version,
    about = "Supervise DNS forwarding and dynamic DNS daemons per routing instance",
    long_about = None,
)]
struct Cli {
    /// Settings file (defaults to $DNSVISOR_SETTINGS, then /etc/dnsvisor/dnsvisor.yaml).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or control the supervisor daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Apply a configuration tree from a YAML or JSON file.
    Apply(ApplyArgs),

    /// Remove all configuration.
    Clear,

    /// Print the configuration tree last applied.
    Config,

    /// Show forwarding statistics and dynamic DNS status.
    State(StateArgs),

    /// Restart the forwarding daemon of an instance.
    ResetForwarding(InstanceArgs),

    /// Drop the forwarding cache of an instance.
    ResetCache(InstanceArgs),

    /// Force a dynamic DNS update on an interface.
    UpdateDynamic(UpdateDynamicArgs),

    /// Report routing instance namespace changes.
    Namespace {
        #[command(subcommand)]
        command: NamespaceCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = Context::load(cli.settings.as_deref())?;
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(&ctx, command),
        Commands::Apply(args) => args.run(&ctx),
        Commands::Clear => commands::config::clear(&ctx),
        Commands::Config => commands::config::show(&ctx),
        Commands::State(args) => args.run(&ctx),
        Commands::ResetForwarding(args) => commands::actions::reset_forwarding(&ctx, args),
        Commands::ResetCache(args) => commands::actions::reset_cache(&ctx, args),
        Commands::UpdateDynamic(args) => args.run(&ctx),
        Commands::Namespace { command } => commands::actions::namespace(&ctx, command),
    }
}
