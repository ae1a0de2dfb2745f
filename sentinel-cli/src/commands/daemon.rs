//! `sentinel daemon`: controller lifecycle over the control socket.

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};

use sentinel_daemon::paths::socket_path;
use sentinel_daemon::{request_status, request_stop, start_blocking, DaemonError, LogFormat};

use super::{ConfigOverrides, Context};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the controller in the foreground (scheduler + control socket).
    Start(StartArgs),
    /// Request graceful shutdown over the control socket.
    Stop,
    /// Query controller status over the control socket.
    Status,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

pub fn run(ctx: &Context, command: DaemonCommand) -> Result<()> {
    let home = &ctx.home;

    match command {
        DaemonCommand::Start(args) => {
            let config = args.overrides.resolve(ctx)?;
            let format = if args.log_json {
                LogFormat::Json
            } else {
                LogFormat::Text
            };
            start_blocking(home, config, format).context("controller exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(home) {
            Ok(()) => println!("controller stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("controller is not running");
            }
            Err(err) => return Err(err).context("failed to stop controller"),
        },
        DaemonCommand::Status => match request_status(home) {
            Ok(status) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render controller status JSON")?
                );
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(home).display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render controller status JSON")?
                );
            }
            Err(err) => return Err(err).context("failed to query controller status"),
        },
    }

    Ok(())
}
