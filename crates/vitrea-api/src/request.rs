// ── Control-protocol requests ──
//
// Everything the client sends to a VBox. Text requests are colon-separated
// ASCII lines with zero-padded decimal fields; parameter requests are the
// binary `VTH>` frames built in `parameter.rs`.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::InvalidRequest;
use crate::frame::Response;
use crate::parameter::{ParameterCommand, ParameterRequest};
use crate::types::{FanSpeed, TemperatureUnit, ThermostatFan, ThermostatMode};

pub const MAX_NODE: u16 = 999;
pub const MAX_KEY: u8 = 9;
pub const MAX_AC: u16 = 999;
pub const MAX_INPUT: u16 = 999;
pub const MAX_SCENARIO: u16 = 9999;
pub const MAX_LEVEL: u8 = 100;
pub const MAX_DIM_DURATION: u8 = 120;
pub const MAX_TIMER_MINUTES: u16 = 999;

/// Dimmer level value asking the controller to restore the last level.
pub const DIMMER_RECALL: u8 = 254;
/// Dimmer level value halting a running fade.
pub const DIMMER_STOP: u8 = 255;
/// Blind position value halting a moving blind.
pub const BLIND_STOP: u8 = 255;

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `P:<password>`. Logs in on a fresh socket and doubles as keep-alive.
    Authenticate { password: String },
    /// `G:V:S`
    GetVersion,
    /// `H:NALL:G`, status of every node.
    GetFullStatus,
    GetNodeStatus { node: u16 },
    GetKeyStatus { node: u16, key: u8 },
    GetAcStatus { ac: u16 },
    GetInputStatus { input: u16 },
    GetOccupancy,
    /// Switch a key on, optionally with an auto-off timer (0 = none).
    KeyOn { node: u16, key: u8, minutes: u16 },
    KeyOff { node: u16, key: u8 },
    KeyToggle { node: u16, key: u8 },
    /// Fade a dimmer to `level` over `duration` seconds.
    Dimmer { node: u16, key: u8, duration: u8, level: u8 },
    Blind { node: u16, key: u8, position: u8 },
    FanSpeed { node: u16, speed: FanSpeed },
    Scenario { id: u16 },
    AcPower { ac: u16, on: bool },
    /// Nudge the target temperature one degree up or down.
    AcStep { ac: u16, up: bool },
    AcSetting { ac: u16, setting: AcSetting },
    Parameter(ParameterRequest),
}

/// Thermostat parameter writes (`H:A<nnn>:<type>:...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcSetting {
    Full {
        mode: ThermostatMode,
        fan: ThermostatFan,
        temperature: u8,
        unit: TemperatureUnit,
    },
    Mode(ThermostatMode),
    Fan(ThermostatFan),
    Temperature(u8),
    Unit(TemperatureUnit),
}

// ── Reply classes ───────────────────────────────────────────────────

/// What kind of reply, if any, the controller sends back for a request.
///
/// The VBox echoes no correlation id, so a reply is attributed to the
/// oldest outstanding request whose class accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// Status queries: the answer arrives as ordinary pushes.
    None,
    /// `OK` or an error line.
    Ack,
    /// `S:PSW:OK`
    KeepAlive,
    /// `V:<digits>` or an error line.
    Version,
    /// `S:R<id>:OK|ERROR` for this scenario, `OK` or an error line.
    Scenario(u16),
    /// A `VTH<` frame for this command, or an error line.
    Parameter(ParameterCommand),
}

impl ReplyClass {
    pub fn accepts(self, response: &Response) -> bool {
        match (self, response) {
            (Self::None, _) => false,
            (Self::KeepAlive, Response::KeepAliveAck)
            | (Self::Ack | Self::Scenario(_), Response::Ok)
            | (Self::Version, Response::Version { .. })
            | (
                Self::Ack | Self::Version | Self::Scenario(_) | Self::Parameter(_),
                Response::Error { .. },
            ) => true,
            (Self::Scenario(id), Response::ScenarioResult { id: got, .. }) => id == *got,
            (Self::Parameter(command), Response::Parameter(reply)) => reply.command == command,
            _ => false,
        }
    }
}

impl Request {
    pub fn authenticate(password: impl Into<String>) -> Self {
        Self::Authenticate {
            password: password.into(),
        }
    }

    pub fn reply_class(&self) -> ReplyClass {
        match self {
            Self::Authenticate { .. } => ReplyClass::KeepAlive,
            Self::GetVersion => ReplyClass::Version,
            Self::GetFullStatus
            | Self::GetNodeStatus { .. }
            | Self::GetKeyStatus { .. }
            | Self::GetAcStatus { .. }
            | Self::GetInputStatus { .. }
            | Self::GetOccupancy => ReplyClass::None,
            Self::Scenario { id } => ReplyClass::Scenario(*id),
            Self::Parameter(request) => ReplyClass::Parameter(request.command),
            Self::KeyOn { .. }
            | Self::KeyOff { .. }
            | Self::KeyToggle { .. }
            | Self::Dimmer { .. }
            | Self::Blind { .. }
            | Self::FanSpeed { .. }
            | Self::AcPower { .. }
            | Self::AcStep { .. }
            | Self::AcSetting { .. } => ReplyClass::Ack,
        }
    }

    /// Checks every numeric field against the controller's ranges.
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        match self {
            Self::Authenticate { .. }
            | Self::GetVersion
            | Self::GetFullStatus
            | Self::GetOccupancy
            | Self::Parameter(_) => Ok(()),
            Self::GetNodeStatus { node } | Self::FanSpeed { node, .. } => check_node(*node),
            Self::GetKeyStatus { node, key }
            | Self::KeyOff { node, key }
            | Self::KeyToggle { node, key } => check_key(*node, *key),
            Self::GetAcStatus { ac } | Self::AcPower { ac, .. } | Self::AcStep { ac, .. } => {
                check("ac", u32::from(*ac), u32::from(MAX_AC))
            }
            Self::GetInputStatus { input } => {
                check("input", u32::from(*input), u32::from(MAX_INPUT))
            }
            Self::KeyOn { node, key, minutes } => {
                check_key(*node, *key)?;
                check("minutes", u32::from(*minutes), u32::from(MAX_TIMER_MINUTES))
            }
            Self::Dimmer {
                node,
                key,
                duration,
                level,
            } => {
                check_key(*node, *key)?;
                check("duration", u32::from(*duration), u32::from(MAX_DIM_DURATION))?;
                if matches!(*level, DIMMER_RECALL | DIMMER_STOP) {
                    return Ok(());
                }
                check("level", u32::from(*level), u32::from(MAX_LEVEL))
            }
            Self::Blind { node, key, position } => {
                check_key(*node, *key)?;
                if *position == BLIND_STOP {
                    return Ok(());
                }
                check("position", u32::from(*position), u32::from(MAX_LEVEL))
            }
            Self::Scenario { id } => check("scenario", u32::from(*id), u32::from(MAX_SCENARIO)),
            Self::AcSetting { ac, .. } => check("ac", u32::from(*ac), u32::from(MAX_AC)),
        }
    }

    /// Appends the wire form of this request to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        match self {
            Self::Parameter(request) => request.encode_into(dst),
            other => {
                let line = other.text_line();
                dst.reserve(line.len() + 2);
                dst.put_slice(line.as_bytes());
                dst.put_slice(b"\r\n");
            }
        }
    }

    fn text_line(&self) -> String {
        match self {
            Self::Authenticate { password } => format!("P:{password}"),
            Self::GetVersion => "G:V:S".to_owned(),
            Self::GetFullStatus => "H:NALL:G".to_owned(),
            Self::GetNodeStatus { node } => format!("H:N{node:03}:G"),
            Self::GetKeyStatus { node, key } => format!("H:N{node:03}:G:{key}"),
            Self::GetAcStatus { ac } => format!("H:A{ac:03}:G"),
            Self::GetInputStatus { input } => format!("H:I{input:03}:G"),
            Self::GetOccupancy => "H:C:G".to_owned(),
            Self::KeyOn { node, key, minutes } => format!("H:N{node:03}:{key}:O:{minutes:03}"),
            Self::KeyOff { node, key } => format!("H:N{node:03}:{key}:F"),
            Self::KeyToggle { node, key } => format!("H:N{node:03}:{key}:T"),
            Self::Dimmer {
                node,
                key,
                duration,
                level,
            } => format!("H:N{node:03}:{key}:D:{duration:03}:{level:03}"),
            Self::Blind {
                node,
                key,
                position,
            } => format!("H:N{node:03}:{key}:B:{position:03}"),
            Self::FanSpeed { node, speed } => format!("H:N{node:03}:S:{}", speed.code()),
            Self::Scenario { id } => format!("H:R{id:04}"),
            Self::AcPower { ac, on } => format!("H:A{ac:03}:2:{}", if *on { 'O' } else { 'F' }),
            Self::AcStep { ac, up } => format!("H:A{ac:03}:{}", if *up { 6 } else { 7 }),
            Self::AcSetting { ac, setting } => match setting {
                AcSetting::Full {
                    mode,
                    fan,
                    temperature,
                    unit,
                } => format!(
                    "H:A{ac:03}:1:O:{}{}:{temperature:03}:{}",
                    mode.code(),
                    fan.code(),
                    unit.code()
                ),
                AcSetting::Mode(mode) => format!("H:A{ac:03}:3:{}", mode.code()),
                AcSetting::Fan(fan) => format!("H:A{ac:03}:4:{}", fan.code()),
                AcSetting::Temperature(t) => format!("H:A{ac:03}:5:{t:03}"),
                AcSetting::Unit(unit) => format!("H:A{ac:03}:8:{}", unit.code()),
            },
            Self::Parameter(request) => format!("VTH>{}", request.command),
        }
    }

    /// Parses a text request line (without its terminator).
    ///
    /// The controller echoes what it receives, so the decoder needs this to
    /// recognise its own traffic coming back.
    pub(crate) fn parse_line(line: &str) -> Result<Self, &'static str> {
        let parts: Vec<&str> = line.split(':').collect();
        match parts.as_slice() {
            ["P", password] => Ok(Self::authenticate(*password)),
            ["G", "V", "S"] => Ok(Self::GetVersion),
            ["H", "NALL", "G"] => Ok(Self::GetFullStatus),
            ["H", "C", "G"] => Ok(Self::GetOccupancy),
            ["H", target, rest @ ..] => parse_addressed(target, rest),
            _ => Err("unknown request"),
        }
    }
}

impl fmt::Display for Request {
    /// The wire line, with the password masked.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticate { .. } => f.write_str("P:****"),
            other => f.write_str(&other.text_line()),
        }
    }
}

// ── Parsing helpers ─────────────────────────────────────────────────

fn parse_addressed(target: &str, rest: &[&str]) -> Result<Request, &'static str> {
    let (prefix, id) = target.split_at_checked(1).ok_or("empty address")?;
    match prefix {
        "R" if rest.is_empty() => Ok(Request::Scenario {
            id: number(id).ok_or("bad scenario id")?,
        }),
        "N" => parse_node(number(id).ok_or("bad node id")?, rest),
        "A" => parse_ac(number(id).ok_or("bad ac id")?, rest),
        "I" if rest == ["G"] => Ok(Request::GetInputStatus {
            input: number(id).ok_or("bad input id")?,
        }),
        _ => Err("unknown request target"),
    }
}

fn parse_node(node: u16, rest: &[&str]) -> Result<Request, &'static str> {
    let field = |s: &str| number::<u8>(s).ok_or("bad numeric field");
    match rest {
        ["G"] => Ok(Request::GetNodeStatus { node }),
        ["G", key] => Ok(Request::GetKeyStatus {
            node,
            key: field(key)?,
        }),
        ["S", speed] => Ok(Request::FanSpeed {
            node,
            speed: FanSpeed::from_code(field(speed)?).ok_or("bad fan speed")?,
        }),
        [key, "O", minutes] => Ok(Request::KeyOn {
            node,
            key: field(key)?,
            minutes: number(minutes).ok_or("bad timer")?,
        }),
        [key, "F"] => Ok(Request::KeyOff {
            node,
            key: field(key)?,
        }),
        [key, "T"] => Ok(Request::KeyToggle {
            node,
            key: field(key)?,
        }),
        [key, "D", level] => Ok(Request::Dimmer {
            node,
            key: field(key)?,
            duration: 0,
            level: field(level)?,
        }),
        [key, "D", duration, level] => Ok(Request::Dimmer {
            node,
            key: field(key)?,
            duration: field(duration)?,
            level: field(level)?,
        }),
        [key, "B", position] => Ok(Request::Blind {
            node,
            key: field(key)?,
            position: field(position)?,
        }),
        _ => Err("unknown node request"),
    }
}

fn parse_ac(ac: u16, rest: &[&str]) -> Result<Request, &'static str> {
    let code = |s: &str| number::<u8>(s).ok_or("bad numeric field");
    let setting = |setting| Ok(Request::AcSetting { ac, setting });
    match rest {
        ["G"] => Ok(Request::GetAcStatus { ac }),
        ["2", "O"] => Ok(Request::AcPower { ac, on: true }),
        ["2", "F"] => Ok(Request::AcPower { ac, on: false }),
        ["6"] => Ok(Request::AcStep { ac, up: true }),
        ["7"] => Ok(Request::AcStep { ac, up: false }),
        ["3", mode] => setting(AcSetting::Mode(
            ThermostatMode::from_code(code(mode)?).ok_or("bad mode")?,
        )),
        ["4", fan] => setting(AcSetting::Fan(
            ThermostatFan::from_code(code(fan)?).ok_or("bad fan")?,
        )),
        ["5", temperature] => setting(AcSetting::Temperature(code(temperature)?)),
        ["8", unit] => setting(AcSetting::Unit(
            TemperatureUnit::from_code(code(unit)?).ok_or("bad unit")?,
        )),
        ["1", "O", mode_fan, temperature, unit] => {
            let mut digits = mode_fan.bytes().map(|b| b.wrapping_sub(b'0'));
            let (Some(mode), Some(fan), None) = (digits.next(), digits.next(), digits.next())
            else {
                return Err("bad mode/fan pair");
            };
            setting(AcSetting::Full {
                mode: ThermostatMode::from_code(mode).ok_or("bad mode")?,
                fan: ThermostatFan::from_code(fan).ok_or("bad fan")?,
                temperature: code(temperature)?,
                unit: TemperatureUnit::from_code(code(unit)?).ok_or("bad unit")?,
            })
        }
        _ => Err("unknown ac request"),
    }
}

/// Parses an all-digit field. Signs, blanks and padding other than
/// leading zeros are rejected.
pub(crate) fn number<T: std::str::FromStr>(field: &str) -> Option<T> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

fn check(field: &'static str, value: u32, max: u32) -> Result<(), InvalidRequest> {
    if value > max {
        return Err(InvalidRequest { field, value, max });
    }
    Ok(())
}

fn check_node(node: u16) -> Result<(), InvalidRequest> {
    check("node", u32::from(node), u32::from(MAX_NODE))
}

fn check_key(node: u16, key: u8) -> Result<(), InvalidRequest> {
    check_node(node)?;
    check("key", u32::from(key), u32::from(MAX_KEY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wire(request: &Request) -> String {
        let mut buf = BytesMut::new();
        request.encode_into(&mut buf);
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn encodes_zero_padded_lines() {
        assert_eq!(wire(&Request::authenticate("VITREA")), "P:VITREA\r\n");
        assert_eq!(wire(&Request::GetFullStatus), "H:NALL:G\r\n");
        assert_eq!(
            wire(&Request::KeyOn { node: 7, key: 1, minutes: 0 }),
            "H:N007:1:O:000\r\n"
        );
        assert_eq!(
            wire(&Request::Dimmer { node: 42, key: 3, duration: 2, level: 55 }),
            "H:N042:3:D:002:055\r\n"
        );
        assert_eq!(wire(&Request::Scenario { id: 12 }), "H:R0012\r\n");
        assert_eq!(
            wire(&Request::FanSpeed { node: 5, speed: FanSpeed::High }),
            "H:N005:S:3\r\n"
        );
        assert_eq!(wire(&Request::AcStep { ac: 2, up: false }), "H:A002:7\r\n");
    }

    #[test]
    fn encodes_full_thermostat_setting() {
        let request = Request::AcSetting {
            ac: 1,
            setting: AcSetting::Full {
                mode: ThermostatMode::Heat,
                fan: ThermostatFan::Auto,
                temperature: 23,
                unit: TemperatureUnit::Celsius,
            },
        };
        assert_eq!(wire(&request), "H:A001:1:O:14:023:0\r\n");
    }

    #[test]
    fn validation_rejects_out_of_range_fields() {
        let err = Request::KeyOff { node: 1000, key: 1 }.validate().unwrap_err();
        assert_eq!(err.field, "node");

        let err = Request::Dimmer { node: 1, key: 1, duration: 0, level: 101 }
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "level");

        assert!(Request::Dimmer { node: 1, key: 1, duration: 0, level: DIMMER_STOP }
            .validate()
            .is_ok());
        assert!(Request::Blind { node: 1, key: 2, position: BLIND_STOP }
            .validate()
            .is_ok());
        assert!(Request::Scenario { id: 10_000 }.validate().is_err());
        assert!(Request::GetKeyStatus { node: 1, key: 10 }.validate().is_err());
    }

    #[test]
    fn parses_short_dimmer_form_as_instant_fade() {
        assert_eq!(
            Request::parse_line("H:N001:2:D:100"),
            Ok(Request::Dimmer { node: 1, key: 2, duration: 0, level: 100 })
        );
    }

    #[test]
    fn rejects_unknown_lines() {
        assert!(Request::parse_line("H:N001:2:Q").is_err());
        assert!(Request::parse_line("H:Nabc:G").is_err());
        assert!(Request::parse_line("X:Y").is_err());
    }

    #[test]
    fn reply_classes_match_expected_responses() {
        let ok = Response::Ok;
        let ack = Response::KeepAliveAck;
        let scenario = Response::ScenarioResult { id: 4, ok: true };

        assert!(ReplyClass::Ack.accepts(&ok));
        assert!(!ReplyClass::Ack.accepts(&ack));
        assert!(ReplyClass::KeepAlive.accepts(&ack));
        assert!(!ReplyClass::KeepAlive.accepts(&ok));
        assert!(ReplyClass::Scenario(4).accepts(&scenario));
        assert!(!ReplyClass::Scenario(5).accepts(&scenario));
        assert!(!ReplyClass::None.accepts(&ok));
    }

    #[test]
    fn display_masks_password() {
        assert_eq!(Request::authenticate("secret").to_string(), "P:****");
        assert_eq!(Request::GetVersion.to_string(), "G:V:S");
    }
}
