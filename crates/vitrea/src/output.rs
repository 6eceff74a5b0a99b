//! Output formatting: table, JSON, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use vitrea_core::{DeviceState, SessionState};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Session state label, green when live and yellow while recovering.
pub fn paint_session(state: SessionState, color: bool) -> String {
    let label = state.to_string();
    if !color {
        return label;
    }
    match state {
        SessionState::Live => label.green().to_string(),
        SessionState::Reconnecting { .. } => label.yellow().to_string(),
        SessionState::Stopped => label.red().to_string(),
        _ => label.cyan().to_string(),
    }
}

pub fn paint_dim(text: &str, color: bool) -> String {
    if color {
        text.dimmed().to_string()
    } else {
        text.to_owned()
    }
}

// ── State summaries ──────────────────────────────────────────────────

/// One-line human summary of a device state. Unknown fields are skipped;
/// a state with nothing known yet reads `?`.
pub fn state_summary(state: &DeviceState) -> String {
    let on_off = |on: Option<bool>| on.map(|on| if on { "on" } else { "off" }.to_owned());

    let parts: Vec<String> = match state {
        DeviceState::Light(s) => [
            on_off(s.on),
            s.brightness.map(|b| format!("{b}%")),
        ]
        .into_iter()
        .flatten()
        .collect(),
        DeviceState::Switch(s) => [
            on_off(s.on),
            s.timer_minutes.map(|m| format!("timer {m}m")),
        ]
        .into_iter()
        .flatten()
        .collect(),
        DeviceState::Cover(s) => [
            s.position.map(|p| format!("{p}% open")),
            s.motion.map(|m| m.to_string()),
        ]
        .into_iter()
        .flatten()
        .collect(),
        DeviceState::Fan(s) => s.speed.map(|speed| speed.to_string()).into_iter().collect(),
        DeviceState::Thermostat(s) => {
            let unit = s.unit.map_or("", |u| match u {
                vitrea_core::TemperatureUnit::Celsius => "°C",
                vitrea_core::TemperatureUnit::Fahrenheit => "°F",
            });
            [
                on_off(s.on),
                s.mode.map(|m| m.to_string()),
                s.fan.map(|f| format!("fan {f}")),
                s.target_temperature.map(|t| format!("set {t}{unit}")),
                s.current_temperature.map(|t| format!("now {t}{unit}")),
            ]
            .into_iter()
            .flatten()
            .collect()
        }
        DeviceState::Scenario(s) => s
            .last_run_ok
            .map(|ok| if ok { "last run ok" } else { "last run failed" }.to_owned())
            .into_iter()
            .collect(),
        DeviceState::BinarySensor(s) => on_off(s.on).into_iter().collect(),
        DeviceState::Sensor(s) => s
            .last_press
            .map(|press| format!("last press {press}"))
            .into_iter()
            .collect(),
    };

    if parts.is_empty() {
        "?".into()
    } else {
        parts.join(", ")
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `plain`: calls `id_fn` on each item to emit one identifier per line
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    Ok(match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Plain => data.iter().map(&id_fn).collect::<Vec<_>>().join("\n"),
    })
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses a custom `detail_fn` that returns a pre-formatted
/// string, since single-item detail views don't use `Tabled` derive.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    Ok(match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Plain => id_fn(data),
    })
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// Aligned `Label: value` lines for detail views.
pub fn detail_lines(lines: &[(&str, String)]) -> String {
    let width = lines.iter().map(|(label, _)| label.len() + 1).max().unwrap_or(0);
    lines
        .iter()
        .map(|(label, value)| format!("{:<width$}  {value}", format!("{label}:")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vitrea_core::{CoverMotion, CoverState, LightState, ThermostatState};

    use super::*;

    #[test]
    fn summaries_skip_unknown_fields() {
        let light = DeviceState::Light(LightState {
            on: Some(true),
            brightness: Some(40),
        });
        assert_eq!(state_summary(&light), "on, 40%");

        let cover = DeviceState::Cover(CoverState {
            position: None,
            motion: Some(CoverMotion::Opening),
        });
        assert_eq!(state_summary(&cover), "opening");

        let thermostat = DeviceState::Thermostat(ThermostatState::default());
        assert_eq!(state_summary(&thermostat), "?");
    }

    #[test]
    fn json_output_is_the_serde_form() {
        let out = render_single(
            OutputFormat::JsonCompact,
            &SessionState::Live,
            |_| String::new(),
            |_| String::new(),
        )
        .unwrap();
        assert_eq!(out, r#"{"state":"live"}"#);
    }

    #[test]
    fn detail_lines_align_values() {
        let out = detail_lines(&[("ID", "N042-1".into()), ("Kind", "light".into())]);
        assert_eq!(out, "ID:    N042-1\nKind:  light");
    }
}
