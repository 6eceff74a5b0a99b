//! Controller enumerations shared by requests, pushes and parameter replies.
//!
//! Each type maps to the small integer the VBox puts on the wire.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

macro_rules! wire_codes {
    ($ty:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        impl $ty {
            /// Numeric code used on the wire.
            pub const fn code(self) -> u8 {
                match self {
                    $(Self::$variant => $code),+
                }
            }

            /// Parses a wire code, `None` for values the controller never sends.
            pub const fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

pub(crate) use wire_codes;

// ── Thermostat ──────────────────────────────────────────────────────

/// Operating mode of an AC / thermostat unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ThermostatMode {
    Cool,
    Heat,
    Fan,
    Dry,
    Auto,
}

wire_codes!(ThermostatMode { Cool = 0, Heat = 1, Fan = 2, Dry = 3, Auto = 4 });

/// Fan setting of an AC / thermostat unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ThermostatFan {
    Low,
    Medium,
    High,
    Top,
    Auto,
}

wire_codes!(ThermostatFan { Low = 0, Medium = 1, High = 2, Top = 3, Auto = 4 });

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

wire_codes!(TemperatureUnit { Celsius = 0, Fahrenheit = 1 });

/// Hardware family of an AC unit, as reported by the controller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AcType {
    Type1,
    Type2,
    Type3,
    /// Fan-coil / floor heating unit with a separate relay.
    Tmsf,
}

wire_codes!(AcType { Type1 = 1, Type2 = 2, Type3 = 3, Tmsf = 4 });

// ── Fan ─────────────────────────────────────────────────────────────

/// Speed of a keypad-controlled ceiling fan.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FanSpeed {
    Off,
    Low,
    Medium,
    High,
    Max,
}

wire_codes!(FanSpeed { Off = 0, Low = 1, Medium = 2, High = 3, Max = 4 });

// ── Keys ────────────────────────────────────────────────────────────

/// Which way a satellite (scene) key was pressed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum KeyPress {
    Short,
    Long,
    Release,
}

/// Function assigned to a keypad key in the controller database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeyType {
    NotUsed,
    Toggle,
    PushButton,
    Dimmer,
    BlindUp,
    BlindDown,
    BlindUpAndDown,
    TiltUp,
    TiltDown,
    TiltUpAndDown,
    Boiler,
    Heater,
    Satellite,
    RoomOn,
    Scene,
    DoNotDisturb,
    Thermostat,
    UnderfloorHeating,
    Fan,
    ToggleMw,
    BlindMw,
    AcType1,
    AcType2,
    AcType3,
    AcTypeTmsf,
}

wire_codes!(KeyType {
    NotUsed = 0,
    Toggle = 1,
    PushButton = 2,
    Dimmer = 3,
    BlindUp = 4,
    BlindDown = 5,
    BlindUpAndDown = 6,
    TiltUp = 7,
    TiltDown = 8,
    TiltUpAndDown = 9,
    Boiler = 10,
    Heater = 11,
    Satellite = 12,
    RoomOn = 13,
    Scene = 14,
    DoNotDisturb = 15,
    Thermostat = 16,
    UnderfloorHeating = 17,
    Fan = 18,
    ToggleMw = 19,
    BlindMw = 20,
    AcType1 = 21,
    AcType2 = 22,
    AcType3 = 23,
    AcTypeTmsf = 24,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 0..=4 {
            let mode = ThermostatMode::from_code(code);
            assert_eq!(mode.map(ThermostatMode::code), Some(code));
        }
        assert_eq!(ThermostatMode::from_code(5), None);
        assert_eq!(AcType::from_code(0), None);
        assert_eq!(AcType::from_code(4), Some(AcType::Tmsf));
        assert_eq!(KeyType::from_code(24), Some(KeyType::AcTypeTmsf));
        assert_eq!(KeyType::from_code(25), None);
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("HEAT".parse::<ThermostatMode>().ok(), Some(ThermostatMode::Heat));
        assert_eq!("max".parse::<FanSpeed>().ok(), Some(FanSpeed::Max));
        assert_eq!(TemperatureUnit::Fahrenheit.to_string(), "fahrenheit");
    }
}
