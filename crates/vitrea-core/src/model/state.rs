// ── Per-kind device state ──
//
// Every field is optional: `None` means "not reported yet". The same
// types double as partial updates; `merge` copies over only the fields a
// delta actually carries.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use vitrea_api::{AcType, FanSpeed, KeyPress, TemperatureUnit, ThermostatFan, ThermostatMode};

/// The closed set of device kinds the bridge exposes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DeviceKind {
    Light,
    Cover,
    Fan,
    Thermostat,
    Scenario,
    BinarySensor,
    Sensor,
    Switch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CoverMotion {
    Opening,
    Closing,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub on: Option<bool>,
    /// 0..=100
    pub brightness: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverState {
    /// 0 closed ..= 100 open.
    pub position: Option<u8>,
    pub motion: Option<CoverMotion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanState {
    pub speed: Option<FanSpeed>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermostatState {
    pub on: Option<bool>,
    pub mode: Option<ThermostatMode>,
    pub fan: Option<ThermostatFan>,
    pub target_temperature: Option<u8>,
    pub current_temperature: Option<u8>,
    pub unit: Option<TemperatureUnit>,
    pub relay_on: Option<bool>,
    pub unit_type: Option<AcType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioState {
    pub last_run_ok: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySensorState {
    pub on: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorState {
    pub last_press: Option<KeyPress>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchState {
    pub on: Option<bool>,
    /// Minutes left on an auto-off timer; 0 when none is running.
    pub timer_minutes: Option<u16>,
}

/// Last-known state of one device, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceState {
    Light(LightState),
    Cover(CoverState),
    Fan(FanState),
    Thermostat(ThermostatState),
    Scenario(ScenarioState),
    BinarySensor(BinarySensorState),
    Sensor(SensorState),
    Switch(SwitchState),
}

impl DeviceState {
    /// A state of `kind` with every field unknown.
    pub fn unknown(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Light => Self::Light(LightState::default()),
            DeviceKind::Cover => Self::Cover(CoverState::default()),
            DeviceKind::Fan => Self::Fan(FanState::default()),
            DeviceKind::Thermostat => Self::Thermostat(ThermostatState::default()),
            DeviceKind::Scenario => Self::Scenario(ScenarioState::default()),
            DeviceKind::BinarySensor => Self::BinarySensor(BinarySensorState::default()),
            DeviceKind::Sensor => Self::Sensor(SensorState::default()),
            DeviceKind::Switch => Self::Switch(SwitchState::default()),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Light(_) => DeviceKind::Light,
            Self::Cover(_) => DeviceKind::Cover,
            Self::Fan(_) => DeviceKind::Fan,
            Self::Thermostat(_) => DeviceKind::Thermostat,
            Self::Scenario(_) => DeviceKind::Scenario,
            Self::BinarySensor(_) => DeviceKind::BinarySensor,
            Self::Sensor(_) => DeviceKind::Sensor,
            Self::Switch(_) => DeviceKind::Switch,
        }
    }

    /// On/off reading, for kinds that have one.
    pub fn is_on(&self) -> Option<bool> {
        match self {
            Self::Light(s) => s.on,
            Self::Switch(s) => s.on,
            Self::BinarySensor(s) => s.on,
            Self::Thermostat(s) => s.on,
            _ => None,
        }
    }

    /// This state re-read as `kind`: an unknown state of that kind that
    /// keeps the on/off reading when both kinds have one.
    pub fn rekind(&self, kind: DeviceKind) -> Self {
        let mut state = Self::unknown(kind);
        let on = self.is_on();
        match &mut state {
            Self::Light(s) => s.on = on,
            Self::Switch(s) => s.on = on,
            Self::BinarySensor(s) => s.on = on,
            _ => {}
        }
        state
    }

    /// Folds the known fields of `delta` into `self`.
    ///
    /// Returns whether any field changed. A delta of another kind is
    /// ignored and reports no change.
    pub fn merge(&mut self, delta: &Self) -> bool {
        let mut changed = false;
        match (self, delta) {
            (Self::Light(s), Self::Light(d)) => {
                set(&mut s.on, d.on, &mut changed);
                set(&mut s.brightness, d.brightness, &mut changed);
            }
            (Self::Cover(s), Self::Cover(d)) => {
                set(&mut s.position, d.position, &mut changed);
                set(&mut s.motion, d.motion, &mut changed);
            }
            (Self::Fan(s), Self::Fan(d)) => set(&mut s.speed, d.speed, &mut changed),
            (Self::Thermostat(s), Self::Thermostat(d)) => {
                set(&mut s.on, d.on, &mut changed);
                set(&mut s.mode, d.mode, &mut changed);
                set(&mut s.fan, d.fan, &mut changed);
                set(&mut s.target_temperature, d.target_temperature, &mut changed);
                set(&mut s.current_temperature, d.current_temperature, &mut changed);
                set(&mut s.unit, d.unit, &mut changed);
                set(&mut s.relay_on, d.relay_on, &mut changed);
                set(&mut s.unit_type, d.unit_type, &mut changed);
            }
            (Self::Scenario(s), Self::Scenario(d)) => {
                set(&mut s.last_run_ok, d.last_run_ok, &mut changed);
            }
            (Self::BinarySensor(s), Self::BinarySensor(d)) => set(&mut s.on, d.on, &mut changed),
            (Self::Sensor(s), Self::Sensor(d)) => {
                set(&mut s.last_press, d.last_press, &mut changed);
            }
            (Self::Switch(s), Self::Switch(d)) => {
                set(&mut s.on, d.on, &mut changed);
                set(&mut s.timer_minutes, d.timer_minutes, &mut changed);
            }
            _ => {}
        }
        changed
    }
}

fn set<T: Copy + PartialEq>(slot: &mut Option<T>, value: Option<T>, changed: &mut bool) {
    if let Some(value) = value {
        if *slot != Some(value) {
            *slot = Some(value);
            *changed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_field_wise() {
        let mut state = DeviceState::Light(LightState {
            on: Some(true),
            brightness: Some(10),
        });
        let changed = state.merge(&DeviceState::Light(LightState {
            on: Some(true),
            brightness: None,
        }));
        assert!(!changed);
        assert_eq!(
            state,
            DeviceState::Light(LightState {
                on: Some(true),
                brightness: Some(10),
            })
        );
    }

    #[test]
    fn merge_reports_changes() {
        let mut state = DeviceState::unknown(DeviceKind::Switch);
        assert!(state.merge(&DeviceState::Switch(SwitchState {
            on: Some(true),
            timer_minutes: Some(15),
        })));
        assert!(!state.merge(&DeviceState::Switch(SwitchState {
            on: Some(true),
            timer_minutes: None,
        })));
    }

    #[test]
    fn merge_ignores_other_kinds() {
        let mut state = DeviceState::unknown(DeviceKind::Fan);
        let delta = DeviceState::Light(LightState {
            on: Some(true),
            brightness: None,
        });
        assert!(!state.merge(&delta));
        assert_eq!(state.kind(), DeviceKind::Fan);
    }

    #[test]
    fn kind_parses_from_snake_case() {
        assert_eq!("binary_sensor".parse::<DeviceKind>().ok(), Some(DeviceKind::BinarySensor));
        assert_eq!(DeviceKind::BinarySensor.to_string(), "binary_sensor");
    }
}
