//! `vitrea state <id>`: one device after a fresh sync.

use vitrea_core::{Controller, ControllerConfig, CoreError, Device};

use crate::cli::{GlobalOpts, StateArgs};
use crate::commands::devices::ago;
use crate::error::CliError;
use crate::output;

fn detail(d: &Device) -> String {
    let mut lines = vec![
        ("ID", d.id.to_string()),
        ("Kind", d.kind.to_string()),
        ("Name", d.label()),
    ];
    if let Some(room) = &d.room {
        lines.push(("Room", room.clone()));
    }
    lines.push(("State", output::state_summary(&d.state)));
    if d.provisional {
        lines.push(("Confirmed", "no (learned from a push)".into()));
    }
    if let Some(at) = d.updated_at {
        lines.push(("Updated", ago(at)));
    }
    output::detail_lines(&lines)
}

pub async fn handle(
    config: ControllerConfig,
    args: StateArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let id = args.id;
    let device = Controller::oneshot(config, |controller| async move {
        controller
            .device(&id)
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: id.to_string(),
            })
    })
    .await?;

    let out = output::render_single(global.output, &device, detail, |d| {
        output::state_summary(&d.state)
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
