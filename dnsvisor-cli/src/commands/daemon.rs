//! `dnsvisor daemon`: foreground runtime and socket lifecycle.

use anyhow::{Context as _, Result};
use clap::Subcommand;

use dnsvisor_daemon::{request_status, request_stop, start_blocking, DaemonError};

use super::{print_json, Context};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground.
    Start,
    /// Request graceful daemon shutdown over the control socket.
    Stop,
    /// Query daemon runtime status over the control socket.
    Status,
}

pub fn run(ctx: &Context, command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start => {
            start_blocking(ctx.settings.clone()).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(ctx.socket()) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(ctx.socket()) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": ctx.socket().display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
    }

    Ok(())
}
