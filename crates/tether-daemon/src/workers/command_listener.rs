use tether_types::TetherResult;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::WorkerContext;
use crate::connection::CancellationToken;
use crate::control_plane::CommandResult;

/// Polls for pending commands and hands each one to the supervisor loop.
pub async fn run_command_listener(ctx: WorkerContext, mut cancel: CancellationToken) -> TetherResult<()> {
    let mut ticker = tokio::time::interval(ctx.intervals.command_poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return Ok(()),
        }

        let commands = match ctx.api.fetch_commands().await {
            Ok(commands) => commands,
            Err(e) => {
                ctx.report_error(&e, "command_listener");
                return Err(e);
            }
        };
        ctx.report_success();

        for remote in commands {
            let reply = match remote.to_command() {
                Ok(command) => ctx.supervisor.send(command).await,
                Err(e) => Err(e),
            };
            match reply {
                Ok(ref message) => info!("Command {} ({}): {}", remote.id, remote.kind, message),
                Err(ref message) => warn!("Command {} ({}) failed: {}", remote.id, remote.kind, message),
            }

            let result = CommandResult::from(reply);
            if let Err(e) = ctx.api.post_command_result(&remote.id, &result).await {
                ctx.report_error(&e, "command_listener");
                return Err(e);
            }
        }
    }
}
