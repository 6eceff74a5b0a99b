//! `vitrea send <id> <action> [value]`.

use std::str::FromStr;

use vitrea_core::{
    Controller, ControllerConfig, DeviceCommand, FanSpeed, TemperatureUnit, ThermostatFan,
    ThermostatMode,
};

use crate::cli::{Action, GlobalOpts, OutputFormat, SendArgs};
use crate::error::CliError;
use crate::output;

/// Builds the device command for an action and its optional argument.
/// Range checks beyond "is a number" happen when the command is planned.
fn to_command(action: Action, value: Option<&str>) -> Result<DeviceCommand, CliError> {
    let command = match action {
        Action::On => DeviceCommand::TurnOn,
        Action::Off => DeviceCommand::TurnOff,
        Action::Toggle => DeviceCommand::Toggle,
        Action::OnFor => DeviceCommand::TurnOnFor {
            minutes: parse(action, value)?,
        },
        Action::Brightness => DeviceCommand::SetBrightness(parse(action, value)?),
        Action::Recall => DeviceCommand::RecallBrightness,
        Action::StopDimming => DeviceCommand::StopDimming,
        Action::Position => DeviceCommand::SetPosition(parse(action, value)?),
        Action::Open => DeviceCommand::Open,
        Action::Close => DeviceCommand::Close,
        Action::Stop => DeviceCommand::Stop,
        Action::Speed => DeviceCommand::SetFanSpeed(parse::<FanSpeed>(action, value)?),
        Action::Activate => DeviceCommand::Activate,
        Action::Mode => DeviceCommand::SetHvacMode(parse::<ThermostatMode>(action, value)?),
        Action::Fan => DeviceCommand::SetHvacFan(parse::<ThermostatFan>(action, value)?),
        Action::Temperature => DeviceCommand::SetTargetTemperature(parse(action, value)?),
        Action::Raise => DeviceCommand::RaiseTemperature,
        Action::Lower => DeviceCommand::LowerTemperature,
        Action::Unit => {
            DeviceCommand::SetTemperatureUnit(parse::<TemperatureUnit>(action, value)?)
        }
    };

    if value.is_some() && !takes_value(action) {
        return Err(CliError::Validation {
            field: "value".into(),
            reason: format!("'{}' takes no value", action_name(action)),
        });
    }
    Ok(command)
}

fn takes_value(action: Action) -> bool {
    matches!(
        action,
        Action::OnFor
            | Action::Brightness
            | Action::Position
            | Action::Speed
            | Action::Mode
            | Action::Fan
            | Action::Temperature
            | Action::Unit
    )
}

fn action_name(action: Action) -> String {
    use clap::ValueEnum;
    action
        .to_possible_value()
        .map_or_else(|| format!("{action:?}"), |v| v.get_name().to_owned())
}

fn parse<T>(action: Action, value: Option<&str>) -> Result<T, CliError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = value.ok_or_else(|| CliError::Validation {
        field: "value".into(),
        reason: format!("'{}' needs a value", action_name(action)),
    })?;
    raw.trim().parse().map_err(|e: T::Err| CliError::Validation {
        field: "value".into(),
        reason: format!("'{raw}' for '{}': {e}", action_name(action)),
    })
}

pub async fn handle(
    config: ControllerConfig,
    args: SendArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let id = args.id;
    let command = to_command(args.action, args.value.as_deref())?;

    let device = Controller::oneshot(config, |controller| async move {
        controller.send_command(&id, command).await?;
        Ok(controller.device(&id))
    })
    .await?;
    tracing::info!(%id, %command, "command acknowledged");

    let out = match global.output {
        OutputFormat::Table | OutputFormat::Plain => match &device {
            Some(device) => format!(
                "{id}: {command} ok, now {}",
                output::state_summary(&device.state)
            ),
            None => format!("{id}: {command} ok"),
        },
        format => output::render_single(format, &device, |_| String::new(), |_| String::new())?,
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn actions_with_values_parse_them() {
        assert_eq!(
            to_command(Action::Brightness, Some("40")).unwrap(),
            DeviceCommand::SetBrightness(40)
        );
        assert_eq!(
            to_command(Action::Speed, Some("High")).unwrap(),
            DeviceCommand::SetFanSpeed(FanSpeed::High)
        );
        assert_eq!(
            to_command(Action::OnFor, Some("15")).unwrap(),
            DeviceCommand::TurnOnFor { minutes: 15 }
        );
    }

    #[test]
    fn missing_or_extra_values_are_usage_errors() {
        let err = to_command(Action::Mode, None).unwrap_err();
        assert!(err.to_string().contains("needs a value"), "{err}");

        let err = to_command(Action::Toggle, Some("3")).unwrap_err();
        assert!(err.to_string().contains("takes no value"), "{err}");

        let err = to_command(Action::Brightness, Some("bright")).unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
    }
}
