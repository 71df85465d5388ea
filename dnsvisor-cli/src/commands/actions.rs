//! Operator actions forwarded to the daemon.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use dnsvisor_daemon::DaemonRequest;

use super::Context;

#[derive(Args, Debug)]
pub struct InstanceArgs {
    /// Routing instance; the default instance when omitted.
    #[arg(long)]
    pub instance: Option<String>,
}

impl InstanceArgs {
    fn label(&self) -> &str {
        self.instance.as_deref().unwrap_or("default")
    }
}

#[derive(Args, Debug)]
pub struct UpdateDynamicArgs {
    pub interface: String,
}

impl UpdateDynamicArgs {
    pub fn run(self, ctx: &Context) -> Result<()> {
        ctx.request(&DaemonRequest::new("update-dynamic-interface").with_interface(&self.interface))?;
        println!("{} dynamic DNS update requested on {}", "✓".green().bold(), self.interface);
        Ok(())
    }
}

#[derive(Subcommand, Debug)]
pub enum NamespaceCommand {
    /// A routing instance namespace came up.
    Added { name: String },
    /// A routing instance namespace went away.
    Removed { name: String },
}

pub fn reset_forwarding(ctx: &Context, args: InstanceArgs) -> Result<()> {
    ctx.request(&DaemonRequest::new("reset-forwarding").with_instance(args.instance.clone()))?;
    println!("{} forwarding restarted on {}", "✓".green().bold(), args.label());
    Ok(())
}

pub fn reset_cache(ctx: &Context, args: InstanceArgs) -> Result<()> {
    ctx.request(&DaemonRequest::new("reset-forwarding-cache").with_instance(args.instance.clone()))?;
    println!("{} forwarding cache cleared on {}", "✓".green().bold(), args.label());
    Ok(())
}

pub fn namespace(ctx: &Context, command: NamespaceCommand) -> Result<()> {
    let (cmd, name) = match command {
        NamespaceCommand::Added { name } => ("namespace-added", name),
        NamespaceCommand::Removed { name } => ("namespace-removed", name),
    };
    ctx.request(&DaemonRequest::new(cmd).with_namespace(&name))?;
    println!("{} {cmd} {name}", "✓".green().bold());
    Ok(())
}
