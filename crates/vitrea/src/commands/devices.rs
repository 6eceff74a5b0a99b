//! `vitrea devices`: connect, synchronize, list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tabled::Tabled;

use vitrea_core::{Controller, ControllerConfig, Device};

use crate::cli::{DevicesArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Room")]
    room: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

fn row(d: &Arc<Device>) -> DeviceRow {
    let name = d.name.clone().unwrap_or_default();
    DeviceRow {
        id: d.id.to_string(),
        kind: d.kind.to_string(),
        name: if d.provisional && name.is_empty() {
            "(unconfirmed)".into()
        } else {
            name
        },
        room: d.room.clone().unwrap_or_default(),
        state: output::state_summary(&d.state),
        updated: d.updated_at.map(ago).unwrap_or_default(),
    }
}

/// `3s ago` style age, rounded to whole seconds.
pub(crate) fn ago(at: DateTime<Utc>) -> String {
    let elapsed = (Utc::now() - at).to_std().unwrap_or_default();
    let seconds = std::time::Duration::from_secs(elapsed.as_secs());
    format!("{} ago", humantime::format_duration(seconds))
}

pub async fn handle(
    config: ControllerConfig,
    args: DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let snapshot = Controller::oneshot(config, |controller| async move {
        Ok(controller.devices_snapshot())
    })
    .await?;

    let devices: Vec<Arc<Device>> = snapshot
        .iter()
        .filter(|d| args.kind.is_none_or(|kind| d.kind == kind))
        .cloned()
        .collect();
    tracing::debug!(count = devices.len(), "devices listed");

    let out = output::render_list(global.output, &devices, row, |d| d.id.to_string())?;
    output::print_output(&out, global.quiet);
    Ok(())
}
