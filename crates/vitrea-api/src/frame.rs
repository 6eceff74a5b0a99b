// ── Decoded frames ──
//
// Every complete unit the codec hands upward. Text lines are classified
// here; binary parameter frames arrive already split by the codec.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::FrameError;
use crate::parameter::ParameterReply;
use crate::request::{Request, number};
use crate::types::{AcType, KeyPress, TemperatureUnit, ThermostatFan, ThermostatMode};

/// Character the controller uses (after lossy UTF-8 decoding) for fields
/// it has no value for.
const UNKNOWN_FIELD: char = '\u{fffd}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A client request, normally the controller echoing our own traffic.
    Command(Request),
    /// A solicited reply to an earlier request.
    Response(Response),
    /// Unsolicited state.
    Push(Push),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    /// `E:<code>:<message>` or a bare `ERROR`.
    Error {
        code: Option<ErrorCode>,
        message: String,
    },
    /// `S:PSW:OK`, the answer to `P:<password>`.
    KeepAliveAck,
    /// `V:<major><minor...>`, e.g. `V:866` is 8.66.
    Version { major: u8, minor: u16 },
    /// `S:R<id>:OK|ERROR`
    ScenarioResult { id: u16, ok: bool },
    Parameter(ParameterReply),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    WrongCommand,
    WrongNode,
    WrongKey,
    WrongInput,
    WrongScenario,
    NodeNotFound,
    Other(u8),
}

impl ErrorCode {
    fn from_wire(code: u8) -> Self {
        match code {
            1 => Self::WrongCommand,
            2 => Self::WrongNode,
            3 => Self::WrongKey,
            4 => Self::WrongInput,
            5 => Self::WrongScenario,
            6 => Self::NodeNotFound,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::WrongCommand => 1,
            Self::WrongNode => 2,
            Self::WrongKey => 3,
            Self::WrongInput => 4,
            Self::WrongScenario => 5,
            Self::NodeNotFound => 6,
            Self::Other(code) => code,
        }
    }
}

// ── Pushes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    /// `S:N<nnn>:<k>:<status>[:<param>]`
    Key { node: u16, key: u8, status: KeyStatus },
    /// `S:A<nnn>:1:...`
    Ac(AcStatus),
    /// `S:I<nnn>:C|O`
    Input { input: u16, closed: bool },
    /// `S:C:0|1`
    Occupancy { occupied: bool },
    /// `T:mm:hh:dd:MM:yyyy:w`
    Clock { at: NaiveDateTime, weekday: u8 },
}

/// What a key reported. The same status letter means different things
/// for different key types, so interpretation is left to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// `O`/`o`, with the remaining timer minutes when the controller sends one.
    On { timer: Option<u16> },
    /// `F`/`f`
    Off,
    /// `D:<lll>` dimmer level.
    Level(u8),
    /// `B:<ppp>` blind position.
    Position(u8),
    /// `S`, `L` or `R` from a satellite key.
    Press(KeyPress),
    /// `M:<s>` fan speed code.
    Fan(u8),
    /// `d:<s>` hotel do-not-disturb status.
    DoNotDisturb(u8),
    /// `r` hotel doorbell.
    Ring,
}

/// Full AC report. Fields the controller marks unknown are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcStatus {
    pub ac: u16,
    pub on: bool,
    pub mode: Option<ThermostatMode>,
    pub fan: Option<ThermostatFan>,
    pub target: Option<u8>,
    pub current: Option<u8>,
    pub ac_type: Option<AcType>,
    pub relay_on: Option<bool>,
    pub unit: Option<TemperatureUnit>,
}

// ── Line classification ─────────────────────────────────────────────

impl Frame {
    /// Classifies one text line (terminator already stripped).
    pub fn parse_line(line: &str) -> Result<Self, FrameError> {
        let malformed = |reason| FrameError::Malformed {
            line: line.to_owned(),
            reason,
        };

        if line == "OK" {
            return Ok(Self::Response(Response::Ok));
        }
        if line == "ERROR" {
            return Ok(Self::Response(Response::Error {
                code: None,
                message: String::new(),
            }));
        }
        if line == "S:PSW:OK" {
            return Ok(Self::Response(Response::KeepAliveAck));
        }

        let parts: Vec<&str> = line.split(':').collect();
        match parts.as_slice() {
            ["E", code, message @ ..] => Ok(Self::Response(Response::Error {
                code: Some(ErrorCode::from_wire(
                    number(code).ok_or_else(|| malformed("bad error code"))?,
                )),
                message: message.join(":"),
            })),
            ["V", digits] => parse_version(digits)
                .map(Self::Response)
                .ok_or_else(|| malformed("bad version")),
            ["S", "C", flag] => match *flag {
                "0" => Ok(Self::Push(Push::Occupancy { occupied: false })),
                "1" => Ok(Self::Push(Push::Occupancy { occupied: true })),
                _ => Err(malformed("bad occupancy flag")),
            },
            ["S", target, rest @ ..] => parse_status(target, rest).map_err(|reason| {
                if reason == UNRECOGNIZED {
                    FrameError::Unrecognized {
                        line: line.to_owned(),
                    }
                } else {
                    malformed(reason)
                }
            }),
            ["T", fields @ ..] => parse_clock(fields)
                .map(Self::Push)
                .ok_or_else(|| malformed("bad clock")),
            ["H" | "P" | "G", ..] => Request::parse_line(line)
                .map(Self::Command)
                .map_err(malformed),
            _ => Err(FrameError::Unrecognized {
                line: line.to_owned(),
            }),
        }
    }
}

const UNRECOGNIZED: &str = "unrecognized status target";

fn parse_version(digits: &str) -> Option<Response> {
    let (major, minor) = digits.split_at_checked(1)?;
    Some(Response::Version {
        major: number(major)?,
        minor: if minor.is_empty() { 0 } else { number(minor)? },
    })
}

fn parse_status(target: &str, rest: &[&str]) -> Result<Frame, &'static str> {
    let (prefix, id) = target.split_at_checked(1).ok_or("empty status target")?;
    match prefix {
        "N" => {
            let node = number(id).ok_or("bad node id")?;
            let [key, code, params @ ..] = rest else {
                return Err("incomplete key status");
            };
            let key = number(key).ok_or("bad key number")?;
            let status = parse_key_status(code, params.first().copied())?;
            Ok(Frame::Push(Push::Key { node, key, status }))
        }
        "A" => parse_ac(number(id).ok_or("bad ac id")?, rest).map(|s| Frame::Push(Push::Ac(s))),
        "I" => {
            let input = number(id).ok_or("bad input id")?;
            match rest {
                ["C"] => Ok(Frame::Push(Push::Input { input, closed: true })),
                ["O"] => Ok(Frame::Push(Push::Input { input, closed: false })),
                _ => Err("bad input status"),
            }
        }
        "R" => {
            let id = number(id).ok_or("bad scenario id")?;
            match rest {
                ["OK"] => Ok(Frame::Response(Response::ScenarioResult { id, ok: true })),
                ["ERROR"] => Ok(Frame::Response(Response::ScenarioResult { id, ok: false })),
                _ => Err("bad scenario result"),
            }
        }
        _ => Err(UNRECOGNIZED),
    }
}

fn parse_key_status(code: &str, param: Option<&str>) -> Result<KeyStatus, &'static str> {
    let param_u8 = || param.and_then(number::<u8>).ok_or("missing or bad status parameter");
    match code {
        "O" | "o" => Ok(KeyStatus::On {
            timer: param.and_then(number),
        }),
        "F" | "f" => Ok(KeyStatus::Off),
        "D" => Ok(KeyStatus::Level(param_u8()?)),
        "B" => Ok(KeyStatus::Position(param_u8()?)),
        "S" => Ok(KeyStatus::Press(KeyPress::Short)),
        "L" => Ok(KeyStatus::Press(KeyPress::Long)),
        "R" => Ok(KeyStatus::Press(KeyPress::Release)),
        "M" => Ok(KeyStatus::Fan(param_u8()?)),
        "d" => Ok(KeyStatus::DoNotDisturb(param_u8()?)),
        "r" => Ok(KeyStatus::Ring),
        _ => Err("unknown key status code"),
    }
}

/// `<k>:<O|F>:<mode><fan>:<set>:<measured>:<type>:<relay>:<unit>`; only the
/// power flag is mandatory.
fn parse_ac(ac: u16, rest: &[&str]) -> Result<AcStatus, &'static str> {
    let [_key, power, params @ ..] = rest else {
        return Err("incomplete ac status");
    };
    let on = match *power {
        "O" => true,
        "F" => false,
        _ => return Err("bad ac power flag"),
    };
    let field = |i: usize| params.get(i).copied().filter(|f| !f.contains(UNKNOWN_FIELD));

    let mut mode_fan = field(0).unwrap_or_default().bytes();
    let mode = mode_fan
        .next()
        .and_then(|b| ThermostatMode::from_code(b.wrapping_sub(b'0')));
    let fan = mode_fan
        .next()
        .and_then(|b| ThermostatFan::from_code(b.wrapping_sub(b'0')));

    Ok(AcStatus {
        ac,
        on,
        mode,
        fan,
        target: field(1).and_then(number),
        current: field(2).and_then(number),
        ac_type: field(3).and_then(number).and_then(AcType::from_code),
        relay_on: field(4).and_then(|r| match r {
            "O" => Some(true),
            "F" => Some(false),
            _ => None,
        }),
        unit: field(5).and_then(number).and_then(TemperatureUnit::from_code),
    })
}

fn parse_clock(fields: &[&str]) -> Option<Push> {
    let [minute, hour, day, month, year, weekday] = fields else {
        return None;
    };
    let at = chrono::NaiveDate::from_ymd_opt(number(year)?, number(month)?, number(day)?)?
        .and_hms_opt(number(hour)?, number(minute)?, 0)?;
    Some(Push::Clock {
        at,
        weekday: number(weekday)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn push(line: &str) -> Push {
        match Frame::parse_line(line).unwrap() {
            Frame::Push(p) => p,
            other => panic!("expected push, got {other:?}"),
        }
    }

    #[test]
    fn classifies_acknowledgements() {
        assert_eq!(Frame::parse_line("OK"), Ok(Frame::Response(Response::Ok)));
        assert_eq!(
            Frame::parse_line("S:PSW:OK"),
            Ok(Frame::Response(Response::KeepAliveAck))
        );
        assert_eq!(
            Frame::parse_line("E:6:NODE NOT FOUND"),
            Ok(Frame::Response(Response::Error {
                code: Some(ErrorCode::NodeNotFound),
                message: "NODE NOT FOUND".into(),
            }))
        );
        assert_eq!(
            Frame::parse_line("V:866"),
            Ok(Frame::Response(Response::Version { major: 8, minor: 66 }))
        );
    }

    #[test]
    fn parses_key_pushes() {
        assert_eq!(
            push("S:N042:1:D:010"),
            Push::Key { node: 42, key: 1, status: KeyStatus::Level(10) }
        );
        assert_eq!(
            push("S:N001:2:o"),
            Push::Key { node: 1, key: 2, status: KeyStatus::On { timer: None } }
        );
        assert_eq!(
            push("S:N001:2:O:015"),
            Push::Key { node: 1, key: 2, status: KeyStatus::On { timer: Some(15) } }
        );
        assert_eq!(
            push("S:N003:4:L"),
            Push::Key { node: 3, key: 4, status: KeyStatus::Press(KeyPress::Long) }
        );
    }

    #[test]
    fn parses_full_ac_status() {
        let Push::Ac(status) = push("S:A001:1:O:14:024:022:4:F:0") else {
            panic!("not an ac push");
        };
        assert!(status.on);
        assert_eq!(status.mode, Some(ThermostatMode::Heat));
        assert_eq!(status.fan, Some(ThermostatFan::Auto));
        assert_eq!(status.target, Some(24));
        assert_eq!(status.current, Some(22));
        assert_eq!(status.ac_type, Some(AcType::Tmsf));
        assert_eq!(status.relay_on, Some(false));
        assert_eq!(status.unit, Some(TemperatureUnit::Celsius));
    }

    #[test]
    fn unknown_ac_fields_become_none() {
        let Push::Ac(status) = push("S:A002:1:F:\u{fffd}\u{fffd}:\u{fffd}:021:1:O:\u{fffd}") else {
            panic!("not an ac push");
        };
        assert!(!status.on);
        assert_eq!(status.mode, None);
        assert_eq!(status.target, None);
        assert_eq!(status.current, Some(21));
        assert_eq!(status.unit, None);
    }

    #[test]
    fn scenario_result_is_a_response() {
        assert_eq!(
            Frame::parse_line("S:R0003:OK"),
            Ok(Frame::Response(Response::ScenarioResult { id: 3, ok: true }))
        );
    }

    #[test]
    fn parses_inputs_occupancy_and_clock() {
        assert_eq!(push("S:I004:C"), Push::Input { input: 4, closed: true });
        assert_eq!(push("S:C:1"), Push::Occupancy { occupied: true });
        let Push::Clock { at, weekday } = push("T:30:14:02:03:2025:1") else {
            panic!("not a clock push");
        };
        assert_eq!(at.to_string(), "2025-03-02 14:30:00");
        assert_eq!(weekday, 1);
    }

    #[test]
    fn rejects_garbage_without_panicking() {
        assert!(matches!(
            Frame::parse_line("S:N0x1:1:O"),
            Err(FrameError::Malformed { .. })
        ));
        assert!(matches!(
            Frame::parse_line("S:N001:1:D"),
            Err(FrameError::Malformed { .. })
        ));
        assert!(matches!(
            Frame::parse_line("S:O001:1"),
            Err(FrameError::Unrecognized { .. })
        ));
        assert!(matches!(
            Frame::parse_line("\u{1}\u{2}"),
            Err(FrameError::Unrecognized { .. })
        ));
    }
}
