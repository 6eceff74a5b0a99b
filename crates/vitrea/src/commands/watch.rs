//! `vitrea watch`: a long-lived session printing every state transition
//! and device change until Ctrl-C.

use chrono::Local;
use serde::Serialize;

use vitrea_core::{Controller, ControllerConfig, Device, DeviceKind, SessionState, StateChange};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

/// One line of `--output json` watch output.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WatchEvent<'a> {
    Session {
        session: SessionState,
    },
    Change {
        device: &'a Device,
        created: bool,
    },
    Snapshot {
        devices: Vec<&'a Device>,
    },
}

struct Printer {
    format: OutputFormat,
    color: bool,
    quiet: bool,
}

impl Printer {
    fn emit(&self, event: &WatchEvent<'_>) -> Result<(), CliError> {
        let line = match self.format {
            OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(event)?,
            OutputFormat::Table | OutputFormat::Plain => self.human(event),
        };
        output::print_output(&line, self.quiet);
        Ok(())
    }

    fn human(&self, event: &WatchEvent<'_>) -> String {
        let stamp = output::paint_dim(&Local::now().format("%H:%M:%S").to_string(), self.color);
        match event {
            WatchEvent::Session { session } => {
                format!("{stamp} session {}", output::paint_session(*session, self.color))
            }
            WatchEvent::Change { device, created } => format!(
                "{stamp} {:<10} {:<12} {}{}",
                device.id.to_string(),
                device.kind.to_string(),
                output::state_summary(&device.state),
                if *created { " (new)" } else { "" },
            ),
            WatchEvent::Snapshot { devices } => devices
                .iter()
                .map(|d| {
                    format!(
                        "{stamp} {:<10} {:<12} {}",
                        d.id.to_string(),
                        d.kind.to_string(),
                        output::state_summary(&d.state)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn wanted(change: &StateChange, kind: Option<DeviceKind>) -> bool {
    kind.is_none_or(|kind| change.new.kind == kind)
}

pub async fn handle(
    config: ControllerConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let printer = Printer {
        format: global.output,
        color: output::should_color(global.color),
        quiet: global.quiet,
    };

    let controller = Controller::new(config);
    let mut states = controller.state();
    let mut changes = controller.changes();
    let mut resyncs = controller.resyncs();
    controller.start().await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut snapshot_pending = args.snapshot;

    let result = loop {
        tokio::select! {
            biased;
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "Could not listen for Ctrl-C");
                }
                break Ok(());
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let session = *states.borrow_and_update();
                if let Err(e) = printer.emit(&WatchEvent::Session { session }) {
                    break Err(e);
                }
            }
            changed = resyncs.changed(), if snapshot_pending => {
                snapshot_pending = false;
                if changed.is_err() {
                    continue;
                }
                let snapshot = controller.devices_snapshot();
                let devices = snapshot
                    .iter()
                    .filter(|d| args.kind.is_none_or(|kind| d.kind == kind))
                    .map(|d| &**d)
                    .collect();
                if let Err(e) = printer.emit(&WatchEvent::Snapshot { devices }) {
                    break Err(e);
                }
            }
            change = changes.recv() => {
                let Some(change) = change else { break Ok(()) };
                if !wanted(&change, args.kind) {
                    continue;
                }
                let event = WatchEvent::Change {
                    device: &change.new,
                    created: change.old.is_none(),
                };
                if let Err(e) = printer.emit(&event) {
                    break Err(e);
                }
            }
        }
    };

    controller.shutdown().await;
    result
}
