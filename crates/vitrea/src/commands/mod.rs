//! Command dispatch: bridges CLI args -> core operations -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod probe;
pub mod send;
pub mod state;
pub mod watch;

use vitrea_core::ControllerConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a controller-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: ControllerConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(config, args, global).await,
        Command::State(args) => state::handle(config, args, global).await,
        Command::Send(args) => send::handle(config, args, global).await,
        Command::Watch(args) => watch::handle(config, args, global).await,
        Command::Probe => probe::handle(config, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Validation {
            field: "command".into(),
            reason: "handled before connecting".into(),
        }),
    }
}
