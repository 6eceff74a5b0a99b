// ── Command API ──
//
// Every device write flows through `DeviceCommand`. Planning turns a
// command for a device of a given kind into the one wire request that
// carries it, plus the optimistic state the store may assume once the
// controller acknowledges it.

use std::fmt;

use serde::{Deserialize, Serialize};
use vitrea_api::request::{
    BLIND_STOP, DIMMER_RECALL, DIMMER_STOP, MAX_LEVEL, MAX_TIMER_MINUTES,
};
use vitrea_api::{AcSetting, FanSpeed, Request, TemperatureUnit, ThermostatFan, ThermostatMode};

use crate::error::CommandError;
use crate::model::{CoverMotion, CoverState, DeviceId, DeviceKind, DeviceState};

/// Highest setpoint the AC command accepts.
pub const MAX_TARGET_TEMPERATURE: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum DeviceCommand {
    TurnOn,
    TurnOff,
    Toggle,
    /// Turn on with an auto-off timer.
    TurnOnFor { minutes: u16 },
    /// 0..=100, applied immediately.
    SetBrightness(u8),
    /// Back to the level before the last off.
    RecallBrightness,
    /// Freeze a dimmer mid-ramp.
    StopDimming,
    /// 0 closed ..= 100 open.
    SetPosition(u8),
    Open,
    Close,
    Stop,
    SetFanSpeed(FanSpeed),
    Activate,
    SetHvacMode(ThermostatMode),
    SetHvacFan(ThermostatFan),
    SetTargetTemperature(u8),
    RaiseTemperature,
    LowerTemperature,
    SetTemperatureUnit(TemperatureUnit),
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TurnOn => f.write_str("turn_on"),
            Self::TurnOff => f.write_str("turn_off"),
            Self::Toggle => f.write_str("toggle"),
            Self::TurnOnFor { minutes } => write!(f, "turn_on_for({minutes}m)"),
            Self::SetBrightness(level) => write!(f, "set_brightness({level})"),
            Self::RecallBrightness => f.write_str("recall_brightness"),
            Self::StopDimming => f.write_str("stop_dimming"),
            Self::SetPosition(position) => write!(f, "set_position({position})"),
            Self::Open => f.write_str("open"),
            Self::Close => f.write_str("close"),
            Self::Stop => f.write_str("stop"),
            Self::SetFanSpeed(speed) => write!(f, "set_fan_speed({speed})"),
            Self::Activate => f.write_str("activate"),
            Self::SetHvacMode(mode) => write!(f, "set_hvac_mode({mode})"),
            Self::SetHvacFan(fan) => write!(f, "set_hvac_fan({fan})"),
            Self::SetTargetTemperature(t) => write!(f, "set_target_temperature({t})"),
            Self::RaiseTemperature => f.write_str("raise_temperature"),
            Self::LowerTemperature => f.write_str("lower_temperature"),
            Self::SetTemperatureUnit(unit) => write!(f, "set_temperature_unit({unit})"),
        }
    }
}

/// The wire request for a command and the state to assume once it is
/// acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    pub request: Request,
    pub optimistic: Option<DeviceState>,
}

impl CommandPlan {
    fn new(request: Request) -> Self {
        Self {
            request,
            optimistic: None,
        }
    }

    fn assuming(mut self, state: DeviceState) -> Self {
        self.optimistic = Some(state);
        self
    }
}

impl DeviceCommand {
    /// Maps this command onto a request for `id`, a device of `kind`.
    /// `current` is the last-known state, used to pick a cover direction.
    pub fn plan(
        self,
        id: DeviceId,
        kind: DeviceKind,
        current: Option<&DeviceState>,
    ) -> Result<CommandPlan, CommandError> {
        let unsupported =
            || CommandError::Invalid(format!("{self} is not supported by {kind} device {id}"));

        let plan = match (id, kind) {
            (DeviceId::Key { node, key }, DeviceKind::Light) => match self {
                Self::TurnOn | Self::RecallBrightness => dimmer(node, key, DIMMER_RECALL),
                Self::TurnOff => dimmer(node, key, 0),
                Self::SetBrightness(level) => {
                    check("brightness", level, MAX_LEVEL)?;
                    dimmer(node, key, level)
                }
                Self::StopDimming => dimmer(node, key, DIMMER_STOP),
                Self::Toggle => CommandPlan::new(Request::KeyToggle { node, key }),
                Self::TurnOnFor { minutes } => key_on(node, key, minutes)?,
                _ => return Err(unsupported()),
            },

            (DeviceId::Key { node, key }, DeviceKind::Switch) => match self {
                Self::TurnOn => key_on(node, key, 0)?,
                Self::TurnOnFor { minutes } => key_on(node, key, minutes)?,
                Self::TurnOff => CommandPlan::new(Request::KeyOff { node, key }),
                Self::Toggle => CommandPlan::new(Request::KeyToggle { node, key }),
                _ => return Err(unsupported()),
            },

            (DeviceId::Key { node, key }, DeviceKind::Cover) => {
                let position = match self {
                    Self::Open => 100,
                    Self::Close => 0,
                    Self::Stop => BLIND_STOP,
                    Self::SetPosition(position) => {
                        check("position", position, MAX_LEVEL)?;
                        position
                    }
                    _ => return Err(unsupported()),
                };
                let plan = CommandPlan::new(Request::Blind {
                    node,
                    key,
                    position,
                });
                match cover_motion(position, current) {
                    Some(motion) => plan.assuming(DeviceState::Cover(CoverState {
                        position: None,
                        motion: Some(motion),
                    })),
                    None => plan,
                }
            }

            (DeviceId::Key { node, .. }, DeviceKind::Fan) => match self {
                Self::SetFanSpeed(speed) => CommandPlan::new(Request::FanSpeed { node, speed }),
                Self::TurnOff => CommandPlan::new(Request::FanSpeed {
                    node,
                    speed: FanSpeed::Off,
                }),
                _ => return Err(unsupported()),
            },

            (DeviceId::Ac(ac), DeviceKind::Thermostat) => {
                let request = match self {
                    Self::TurnOn => Request::AcPower { ac, on: true },
                    Self::TurnOff => Request::AcPower { ac, on: false },
                    Self::SetHvacMode(mode) => ac_setting(ac, AcSetting::Mode(mode)),
                    Self::SetHvacFan(fan) => ac_setting(ac, AcSetting::Fan(fan)),
                    Self::SetTargetTemperature(target) => {
                        check("target temperature", target, MAX_TARGET_TEMPERATURE)?;
                        ac_setting(ac, AcSetting::Temperature(target))
                    }
                    Self::SetTemperatureUnit(unit) => ac_setting(ac, AcSetting::Unit(unit)),
                    Self::RaiseTemperature => Request::AcStep { ac, up: true },
                    Self::LowerTemperature => Request::AcStep { ac, up: false },
                    _ => return Err(unsupported()),
                };
                CommandPlan::new(request)
            }

            (DeviceId::Scenario(scenario), DeviceKind::Scenario) => match self {
                Self::Activate | Self::TurnOn => {
                    CommandPlan::new(Request::Scenario { id: scenario })
                }
                _ => return Err(unsupported()),
            },

            _ => return Err(unsupported()),
        };

        plan.request
            .validate()
            .map_err(|e| CommandError::Invalid(e.to_string()))?;
        Ok(plan)
    }
}

fn dimmer(node: u16, key: u8, level: u8) -> CommandPlan {
    CommandPlan::new(Request::Dimmer {
        node,
        key,
        duration: 0,
        level,
    })
}

fn key_on(node: u16, key: u8, minutes: u16) -> Result<CommandPlan, CommandError> {
    if minutes > MAX_TIMER_MINUTES {
        return Err(CommandError::Invalid(format!(
            "timer must be at most {MAX_TIMER_MINUTES} minutes, got {minutes}"
        )));
    }
    Ok(CommandPlan::new(Request::KeyOn { node, key, minutes }))
}

fn ac_setting(ac: u16, setting: AcSetting) -> Request {
    Request::AcSetting { ac, setting }
}

fn check(field: &str, value: u8, max: u8) -> Result<(), CommandError> {
    if value > max {
        return Err(CommandError::Invalid(format!(
            "{field} must be at most {max}, got {value}"
        )));
    }
    Ok(())
}

/// Which way a blind will move for a position request, if we can tell.
fn cover_motion(target: u8, current: Option<&DeviceState>) -> Option<CoverMotion> {
    if target == BLIND_STOP {
        return Some(CoverMotion::Stopped);
    }
    let from = match current {
        Some(DeviceState::Cover(state)) => state.position,
        _ => None,
    };
    match from {
        Some(from) if target > from => Some(CoverMotion::Opening),
        Some(from) if target < from => Some(CoverMotion::Closing),
        Some(_) => None,
        None if target == 100 => Some(CoverMotion::Opening),
        None if target == 0 => Some(CoverMotion::Closing),
        None => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const LIGHT: DeviceId = DeviceId::Key { node: 42, key: 1 };
    const BLIND: DeviceId = DeviceId::Key { node: 5, key: 2 };

    fn request(id: DeviceId, kind: DeviceKind, command: DeviceCommand) -> Request {
        command.plan(id, kind, None).unwrap().request
    }

    #[test]
    fn light_commands_use_the_dimmer_line() {
        assert_eq!(
            request(LIGHT, DeviceKind::Light, DeviceCommand::SetBrightness(40)).to_string(),
            "H:N042:1:D:000:040"
        );
        assert_eq!(
            request(LIGHT, DeviceKind::Light, DeviceCommand::TurnOn),
            Request::Dimmer {
                node: 42,
                key: 1,
                duration: 0,
                level: DIMMER_RECALL,
            }
        );
        assert_eq!(
            request(LIGHT, DeviceKind::Light, DeviceCommand::TurnOff),
            Request::Dimmer {
                node: 42,
                key: 1,
                duration: 0,
                level: 0,
            }
        );
    }

    #[test]
    fn switch_timer_is_bounded() {
        assert_eq!(
            request(LIGHT, DeviceKind::Switch, DeviceCommand::TurnOnFor { minutes: 30 }),
            Request::KeyOn {
                node: 42,
                key: 1,
                minutes: 30,
            }
        );
        let err = DeviceCommand::TurnOnFor { minutes: 1000 }
            .plan(LIGHT, DeviceKind::Switch, None)
            .unwrap_err();
        assert!(matches!(err, CommandError::Invalid(_)));
    }

    #[test]
    fn out_of_range_brightness_is_invalid() {
        let err = DeviceCommand::SetBrightness(140)
            .plan(LIGHT, DeviceKind::Light, None)
            .unwrap_err();
        assert!(matches!(err, CommandError::Invalid(_)));
    }

    #[test]
    fn cover_motion_follows_current_position() {
        let at = |position| {
            DeviceState::Cover(CoverState {
                position: Some(position),
                motion: None,
            })
        };
        let plan = DeviceCommand::SetPosition(80)
            .plan(BLIND, DeviceKind::Cover, Some(&at(20)))
            .unwrap();
        assert_eq!(
            plan.optimistic,
            Some(DeviceState::Cover(CoverState {
                position: None,
                motion: Some(CoverMotion::Opening),
            }))
        );

        let plan = DeviceCommand::SetPosition(20)
            .plan(BLIND, DeviceKind::Cover, Some(&at(20)))
            .unwrap();
        assert_eq!(plan.optimistic, None);

        let plan = DeviceCommand::Stop.plan(BLIND, DeviceKind::Cover, None).unwrap();
        assert_eq!(plan.request.to_string(), "H:N005:2:B:255");
    }

    #[test]
    fn thermostat_commands_map_to_ac_lines() {
        assert_eq!(
            request(DeviceId::Ac(1), DeviceKind::Thermostat, DeviceCommand::RaiseTemperature),
            Request::AcStep { ac: 1, up: true }
        );
        assert_eq!(
            request(
                DeviceId::Ac(1),
                DeviceKind::Thermostat,
                DeviceCommand::SetHvacMode(ThermostatMode::Heat)
            ),
            Request::AcSetting {
                ac: 1,
                setting: AcSetting::Mode(ThermostatMode::Heat),
            }
        );
    }

    #[test]
    fn unsupported_pairs_are_invalid() {
        for (id, kind, command) in [
            (LIGHT, DeviceKind::Sensor, DeviceCommand::TurnOn),
            (LIGHT, DeviceKind::Light, DeviceCommand::Open),
            (DeviceId::Scenario(3), DeviceKind::Scenario, DeviceCommand::TurnOff),
            (DeviceId::Occupancy, DeviceKind::BinarySensor, DeviceCommand::TurnOn),
        ] {
            assert!(
                matches!(command.plan(id, kind, None), Err(CommandError::Invalid(_))),
                "{command} on {kind} should be rejected"
            );
        }
    }

    #[test]
    fn serde_form_is_action_and_value() {
        let json = serde_json::to_string(&DeviceCommand::SetBrightness(40)).unwrap();
        assert_eq!(json, r#"{"action":"set_brightness","value":40}"#);
        let back: DeviceCommand = serde_json::from_str(r#"{"action":"toggle"}"#).unwrap();
        assert_eq!(back, DeviceCommand::Toggle);
    }
}
