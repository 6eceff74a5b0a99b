// ── Device identity ──
//
// Every addressable thing on a VBox is named by its wire address. The
// string forms mirror the controller's own notation so ids read the
// same in logs, CLI arguments and JSON output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use vitrea_api::request::{MAX_AC, MAX_INPUT, MAX_KEY, MAX_NODE, MAX_SCENARIO};

use super::DeviceKind;

/// Stable key for a device.
///
/// | Variant     | String form |
/// |-------------|-------------|
/// | `Key`       | `N001-1`    |
/// | `Ac`        | `A001`      |
/// | `Scenario`  | `R0001`     |
/// | `Input`     | `I001`      |
/// | `Occupancy` | `occupancy` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceId {
    /// One key of a keypad node.
    Key { node: u16, key: u8 },
    /// A thermostat / air-conditioner unit.
    Ac(u16),
    Scenario(u16),
    /// A dry-contact input.
    Input(u16),
    /// The controller's built-in occupancy sensor.
    Occupancy,
}

impl DeviceId {
    /// The kind every device with this address has, when the address
    /// alone decides it. Keypad keys depend on their configured key type.
    pub fn implied_kind(&self) -> Option<DeviceKind> {
        match self {
            Self::Key { .. } => None,
            Self::Ac(_) => Some(DeviceKind::Thermostat),
            Self::Scenario(_) => Some(DeviceKind::Scenario),
            Self::Input(_) | Self::Occupancy => Some(DeviceKind::BinarySensor),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key { node, key } => write!(f, "N{node:03}-{key}"),
            Self::Ac(ac) => write!(f, "A{ac:03}"),
            Self::Scenario(id) => write!(f, "R{id:04}"),
            Self::Input(input) => write!(f, "I{input:03}"),
            Self::Occupancy => f.write_str("occupancy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid device id {input:?}: {reason}")]
pub struct ParseDeviceIdError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| ParseDeviceIdError {
            input: s.to_owned(),
            reason,
        };

        if s.eq_ignore_ascii_case("occupancy") {
            return Ok(Self::Occupancy);
        }

        let mut chars = s.chars();
        let prefix = chars
            .next()
            .ok_or_else(|| fail("empty"))?
            .to_ascii_uppercase();
        let rest = chars.as_str();

        match prefix {
            'N' => {
                let (node, key) = rest
                    .split_once('-')
                    .ok_or_else(|| fail("expected N<node>-<key>"))?;
                let node = bounded(node, MAX_NODE).ok_or_else(|| fail("node must be 0-999"))?;
                let key = bounded(key, u16::from(MAX_KEY))
                    .and_then(|k| u8::try_from(k).ok())
                    .ok_or_else(|| fail("key must be 0-9"))?;
                Ok(Self::Key { node, key })
            }
            'A' => bounded(rest, MAX_AC)
                .map(Self::Ac)
                .ok_or_else(|| fail("AC must be 0-999")),
            'R' => bounded(rest, MAX_SCENARIO)
                .map(Self::Scenario)
                .ok_or_else(|| fail("scenario must be 0-9999")),
            'I' => bounded(rest, MAX_INPUT)
                .map(Self::Input)
                .ok_or_else(|| fail("input must be 0-999")),
            _ => Err(fail("unknown prefix")),
        }
    }
}

fn bounded(digits: &str, max: u16) -> Option<u16> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u16>().ok().filter(|n| *n <= max)
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_controller_notation() {
        assert_eq!(DeviceId::Key { node: 42, key: 1 }.to_string(), "N042-1");
        assert_eq!(DeviceId::Ac(7).to_string(), "A007");
        assert_eq!(DeviceId::Scenario(12).to_string(), "R0012");
        assert_eq!(DeviceId::Input(3).to_string(), "I003");
        assert_eq!(DeviceId::Occupancy.to_string(), "occupancy");
    }

    #[test]
    fn parse_accepts_any_padding_and_case() {
        assert_eq!(
            "n7-2".parse::<DeviceId>().unwrap(),
            DeviceId::Key { node: 7, key: 2 }
        );
        assert_eq!("A001".parse::<DeviceId>().unwrap(), DeviceId::Ac(1));
        assert_eq!("r12".parse::<DeviceId>().unwrap(), DeviceId::Scenario(12));
        assert_eq!("OCCUPANCY".parse::<DeviceId>().unwrap(), DeviceId::Occupancy);
    }

    #[test]
    fn parse_rejects_out_of_range_and_junk() {
        for input in ["", "N1000-1", "N001-10", "N001", "A", "A-1", "X001", "I+12", "R10000"] {
            assert!(input.parse::<DeviceId>().is_err(), "{input:?} should not parse");
        }
    }

    #[test]
    fn ordering_groups_by_address_space() {
        let mut ids = vec![
            DeviceId::Occupancy,
            DeviceId::Ac(1),
            DeviceId::Key { node: 2, key: 1 },
            DeviceId::Key { node: 1, key: 3 },
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                DeviceId::Key { node: 1, key: 3 },
                DeviceId::Key { node: 2, key: 1 },
                DeviceId::Ac(1),
                DeviceId::Occupancy,
            ]
        );
    }

    #[test]
    fn serializes_as_its_string_form() {
        let id = DeviceId::Key { node: 5, key: 4 };
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"N005-4\"");
        assert_eq!(serde_json::from_str::<DeviceId>(&json).unwrap(), id);
    }
}
