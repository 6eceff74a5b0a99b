// ── Push interpretation ──
//
// Turns a push frame into a partial state for one device. A key status
// letter means different things for different key types, so the kind the
// store already holds wins; unknown keys get a kind inferred from the
// status itself.

use vitrea_api::{FanSpeed, KeyPress, KeyStatus, Push};

use crate::model::{
    BinarySensorState, CoverMotion, CoverState, DeviceId, DeviceKind, DeviceState, FanState,
    LightState, SensorState, SwitchState, ThermostatState,
};

/// The device a push is about. Clock pushes address no device.
pub(crate) fn push_target(push: &Push) -> Option<DeviceId> {
    match push {
        Push::Key { node, key, .. } => Some(DeviceId::Key {
            node: *node,
            key: *key,
        }),
        Push::Ac(status) => Some(DeviceId::Ac(status.ac)),
        Push::Input { input, .. } => Some(DeviceId::Input(*input)),
        Push::Occupancy { .. } => Some(DeviceId::Occupancy),
        Push::Clock { .. } => None,
    }
}

/// Best guess at the kind of a key nobody has told us about.
pub(crate) fn infer_kind(status: KeyStatus) -> Option<DeviceKind> {
    match status {
        KeyStatus::On { .. } | KeyStatus::Off => Some(DeviceKind::Switch),
        KeyStatus::Level(_) => Some(DeviceKind::Light),
        KeyStatus::Position(_) => Some(DeviceKind::Cover),
        KeyStatus::Press(_) => Some(DeviceKind::Sensor),
        KeyStatus::Fan(_) => Some(DeviceKind::Fan),
        KeyStatus::DoNotDisturb(_) | KeyStatus::Ring => None,
    }
}

/// Kind for a provisional key after it reported `status`. Statuses that
/// only one key type produces override a weaker earlier guess; an `O`/`F`
/// fits every on/off kind and changes nothing.
pub(crate) fn refine_kind(current: DeviceKind, status: KeyStatus) -> DeviceKind {
    match (current, status) {
        (DeviceKind::Switch | DeviceKind::BinarySensor, KeyStatus::Level(_)) => DeviceKind::Light,
        (_, KeyStatus::Position(_)) => DeviceKind::Cover,
        (_, KeyStatus::Fan(_)) => DeviceKind::Fan,
        (DeviceKind::Switch, KeyStatus::Press(_)) => DeviceKind::Sensor,
        _ => current,
    }
}

/// The partial state `push` carries for a device of kind `known`
/// (inferred when `None`). `None` when the push says nothing this kind
/// can represent.
pub(crate) fn push_delta(push: &Push, known: Option<DeviceKind>) -> Option<DeviceState> {
    match push {
        Push::Key { status, .. } => {
            let kind = known.or_else(|| infer_kind(*status))?;
            key_delta(kind, *status)
        }
        Push::Ac(status) => Some(DeviceState::Thermostat(ThermostatState {
            on: Some(status.on),
            mode: status.mode,
            fan: status.fan,
            target_temperature: status.target,
            current_temperature: status.current,
            unit: status.unit,
            relay_on: status.relay_on,
            unit_type: status.ac_type,
        })),
        Push::Input { closed, .. } => Some(DeviceState::BinarySensor(BinarySensorState {
            on: Some(*closed),
        })),
        Push::Occupancy { occupied } => Some(DeviceState::BinarySensor(BinarySensorState {
            on: Some(*occupied),
        })),
        Push::Clock { .. } => None,
    }
}

fn key_delta(kind: DeviceKind, status: KeyStatus) -> Option<DeviceState> {
    match (kind, status) {
        (DeviceKind::Light, KeyStatus::On { .. }) => Some(light(Some(true), None)),
        (DeviceKind::Light, KeyStatus::Off) => Some(light(Some(false), None)),
        (DeviceKind::Light, KeyStatus::Level(level)) => {
            Some(light(Some(level > 0), Some(level)))
        }

        (DeviceKind::Switch, KeyStatus::On { timer }) => Some(DeviceState::Switch(SwitchState {
            on: Some(true),
            timer_minutes: timer,
        })),
        (DeviceKind::Switch, KeyStatus::Off) => Some(DeviceState::Switch(SwitchState {
            on: Some(false),
            timer_minutes: Some(0),
        })),
        (DeviceKind::Switch, KeyStatus::Level(level)) => Some(DeviceState::Switch(SwitchState {
            on: Some(level > 0),
            timer_minutes: None,
        })),

        // Position reports arrive once the blind has settled.
        (DeviceKind::Cover, KeyStatus::Position(position)) => {
            Some(DeviceState::Cover(CoverState {
                position: Some(position),
                motion: Some(CoverMotion::Stopped),
            }))
        }

        (DeviceKind::Fan, KeyStatus::Fan(code)) => FanSpeed::from_code(code)
            .map(|speed| DeviceState::Fan(FanState { speed: Some(speed) })),
        (DeviceKind::Fan, KeyStatus::Off) => Some(DeviceState::Fan(FanState {
            speed: Some(FanSpeed::Off),
        })),

        (DeviceKind::Sensor, KeyStatus::Press(press)) => Some(DeviceState::Sensor(SensorState {
            last_press: Some(press),
        })),

        (DeviceKind::BinarySensor, KeyStatus::On { .. }) => Some(binary(true)),
        (DeviceKind::BinarySensor, KeyStatus::Off) => Some(binary(false)),
        (DeviceKind::BinarySensor, KeyStatus::Press(press)) => {
            Some(binary(press != KeyPress::Release))
        }

        _ => None,
    }
}

fn light(on: Option<bool>, brightness: Option<u8>) -> DeviceState {
    DeviceState::Light(LightState { on, brightness })
}

fn binary(on: bool) -> DeviceState {
    DeviceState::BinarySensor(BinarySensorState { on: Some(on) })
}

#[cfg(test)]
mod tests {
    use vitrea_api::{AcStatus, ThermostatMode};

    use super::*;

    fn key(status: KeyStatus) -> Push {
        Push::Key {
            node: 42,
            key: 1,
            status,
        }
    }

    #[test]
    fn known_kind_decides_meaning() {
        let on = key(KeyStatus::On { timer: None });
        assert_eq!(
            push_delta(&on, Some(DeviceKind::Light)),
            Some(light(Some(true), None))
        );
        assert_eq!(
            push_delta(&on, None),
            Some(DeviceState::Switch(SwitchState {
                on: Some(true),
                timer_minutes: None,
            }))
        );
    }

    #[test]
    fn dimmer_level_implies_on_state() {
        assert_eq!(
            push_delta(&key(KeyStatus::Level(0)), Some(DeviceKind::Light)),
            Some(light(Some(false), Some(0)))
        );
        assert_eq!(
            push_delta(&key(KeyStatus::Level(10)), None),
            Some(light(Some(true), Some(10)))
        );
    }

    #[test]
    fn mismatched_status_is_dropped() {
        assert_eq!(
            push_delta(&key(KeyStatus::Position(30)), Some(DeviceKind::Light)),
            None
        );
        assert_eq!(push_delta(&key(KeyStatus::Ring), None), None);
        assert_eq!(
            push_delta(&key(KeyStatus::Fan(9)), Some(DeviceKind::Fan)),
            None
        );
    }

    #[test]
    fn specific_statuses_refine_a_weak_guess() {
        assert_eq!(
            refine_kind(DeviceKind::Switch, KeyStatus::Level(10)),
            DeviceKind::Light
        );
        assert_eq!(
            refine_kind(DeviceKind::Light, KeyStatus::Position(30)),
            DeviceKind::Cover
        );
        assert_eq!(
            refine_kind(DeviceKind::Light, KeyStatus::On { timer: None }),
            DeviceKind::Light
        );
        assert_eq!(
            refine_kind(DeviceKind::Cover, KeyStatus::Level(10)),
            DeviceKind::Cover
        );
    }

    #[test]
    fn ac_report_maps_every_field() {
        let push = Push::Ac(AcStatus {
            ac: 1,
            on: true,
            mode: Some(ThermostatMode::Cool),
            fan: None,
            target: Some(24),
            current: Some(27),
            ac_type: None,
            relay_on: Some(false),
            unit: None,
        });
        assert_eq!(push_target(&push), Some(DeviceId::Ac(1)));
        let Some(DeviceState::Thermostat(state)) = push_delta(&push, None) else {
            panic!("expected thermostat delta");
        };
        assert_eq!(state.on, Some(true));
        assert_eq!(state.mode, Some(ThermostatMode::Cool));
        assert_eq!(state.fan, None);
        assert_eq!(state.target_temperature, Some(24));
        assert_eq!(state.current_temperature, Some(27));
    }

    #[test]
    fn satellite_release_clears_binary_sensor() {
        let press = key(KeyStatus::Press(KeyPress::Release));
        assert_eq!(
            push_delta(&press, Some(DeviceKind::BinarySensor)),
            Some(binary(false))
        );
        assert_eq!(
            push_delta(&press, None),
            Some(DeviceState::Sensor(SensorState {
                last_press: Some(KeyPress::Release),
            }))
        );
    }
}
