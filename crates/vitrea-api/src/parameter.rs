//! Binary parameter API: the VBox's read-only view of its installation
//! database (rooms, keypads, keys, AC units, scenarios).
//!
//! Frame layout, both directions:
//!
//! ```text
//! 'V' 'T' 'H' dir  cmd  len_hi len_lo  data...  checksum
//! ```
//!
//! `dir` is `>` for requests and `<` for replies, `len` counts the data
//! bytes plus the checksum, and the checksum is the byte-sum of everything
//! before it, modulo 256.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use strum::Display;

use crate::error::FrameError;
use crate::types::{AcType, KeyType, wire_codes};

pub(crate) const HEADER_LEN: usize = 7;
pub(crate) const REQUEST_MARKER: &[u8; 4] = b"VTH>";
pub(crate) const REPLY_MARKER: &[u8; 4] = b"VTH<";

/// Keypad id 0 must be requested as 256 in key-parameter requests.
const KEYPAD_ZERO_ALIAS: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ParameterCommand {
    FloorNumbers,
    FloorParams,
    RoomNumbers,
    RoomParams,
    KeypadNumbers,
    KeyParams,
    AcNumbers,
    AcParams,
    ScenarioNumbers,
    ScenarioParams,
}

wire_codes!(ParameterCommand {
    FloorNumbers = 1,
    FloorParams = 2,
    RoomNumbers = 3,
    RoomParams = 4,
    KeypadNumbers = 5,
    KeyParams = 6,
    AcNumbers = 7,
    AcParams = 8,
    ScenarioNumbers = 9,
    ScenarioParams = 10,
});

/// Byte-sum checksum shared by requests and replies.
pub(crate) fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

// ── Requests ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRequest {
    pub command: ParameterCommand,
    pub data: Bytes,
}

impl ParameterRequest {
    fn new(command: ParameterCommand, data: &[u8]) -> Self {
        Self {
            command,
            data: Bytes::copy_from_slice(data),
        }
    }

    pub fn room_numbers() -> Self {
        // Group number; the controller only knows group 0.
        Self::new(ParameterCommand::RoomNumbers, &[0])
    }

    pub fn room_params(room: u16) -> Self {
        Self::new(ParameterCommand::RoomParams, &room.to_be_bytes())
    }

    pub fn keypad_numbers() -> Self {
        Self::new(ParameterCommand::KeypadNumbers, &[])
    }

    pub fn key_params(keypad: u16, key: u8) -> Self {
        let keypad = if keypad == 0 { KEYPAD_ZERO_ALIAS } else { keypad };
        let [hi, lo] = keypad.to_be_bytes();
        Self::new(ParameterCommand::KeyParams, &[hi, lo, key])
    }

    pub fn ac_numbers() -> Self {
        Self::new(ParameterCommand::AcNumbers, &[])
    }

    pub fn ac_params(ac: u16) -> Self {
        Self::new(ParameterCommand::AcParams, &ac.to_be_bytes())
    }

    pub fn scenario_numbers() -> Self {
        Self::new(ParameterCommand::ScenarioNumbers, &[])
    }

    pub fn scenario_params(scenario: u16) -> Self {
        Self::new(ParameterCommand::ScenarioParams, &scenario.to_be_bytes())
    }

    pub(crate) fn encode_into(&self, dst: &mut BytesMut) {
        let start = dst.len();
        dst.reserve(HEADER_LEN + self.data.len() + 1);
        dst.put_slice(REQUEST_MARKER);
        dst.put_u8(self.command.code());
        dst.put_u16(u16::try_from(self.data.len() + 1).unwrap_or(u16::MAX));
        dst.put_slice(&self.data);
        let sum = checksum(&dst[start..]);
        dst.put_u8(sum);
    }
}

// ── Replies ─────────────────────────────────────────────────────────

/// A checksum-verified `VTH<` frame. The body is interpreted lazily by
/// the `parse_*` accessors since only the caller knows which it asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterReply {
    pub command: ParameterCommand,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub id: u16,
    pub floor: u16,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeypadInfo {
    pub id: u16,
    pub keys: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub keypad: u16,
    pub key: u8,
    /// `None` for type codes newer than this client.
    pub key_type: Option<KeyType>,
    pub room: u16,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcInfo {
    pub id: u16,
    pub ac_type: Option<AcType>,
    pub room: u16,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioInfo {
    pub id: u16,
    pub room: u16,
    pub name: String,
}

impl ParameterReply {
    fn reader(&self, expected: ParameterCommand) -> Result<Reader, FrameError> {
        if self.command != expected {
            return Err(FrameError::Payload {
                command: self.command.code(),
                reason: "reply is for a different command",
            });
        }
        Ok(Reader {
            command: self.command.code(),
            buf: self.data.clone(),
        })
    }

    /// Room ids (command 3): `count:u8, id:u16 * count`.
    pub fn parse_room_numbers(&self) -> Result<Vec<u16>, FrameError> {
        let mut r = self.reader(ParameterCommand::RoomNumbers)?;
        let count = r.u8()?;
        (0..count).map(|_| r.u16()).collect()
    }

    pub fn parse_room_params(&self) -> Result<RoomInfo, FrameError> {
        let mut r = self.reader(ParameterCommand::RoomParams)?;
        Ok(RoomInfo {
            id: r.u16()?,
            floor: r.u16()?,
            name: r.name()?,
        })
    }

    /// Keypads (command 5): `count:u16, (id:u16, keys:u8) * count`.
    pub fn parse_keypad_numbers(&self) -> Result<Vec<KeypadInfo>, FrameError> {
        let mut r = self.reader(ParameterCommand::KeypadNumbers)?;
        let count = r.u16()?;
        (0..count)
            .map(|_| {
                Ok(KeypadInfo {
                    id: r.u16()?,
                    keys: r.u8()?,
                })
            })
            .collect()
    }

    pub fn parse_key_params(&self) -> Result<KeyInfo, FrameError> {
        let mut r = self.reader(ParameterCommand::KeyParams)?;
        let keypad = r.u16()?;
        Ok(KeyInfo {
            keypad: if keypad == KEYPAD_ZERO_ALIAS { 0 } else { keypad },
            key: r.u8()?,
            key_type: KeyType::from_code(r.u8()?),
            room: r.u16()?,
            name: r.name()?,
        })
    }

    pub fn parse_ac_numbers(&self) -> Result<Vec<u16>, FrameError> {
        let mut r = self.reader(ParameterCommand::AcNumbers)?;
        let count = r.u8()?;
        (0..count).map(|_| r.u16()).collect()
    }

    /// AC params (command 8). The unit type is an ASCII digit.
    pub fn parse_ac_params(&self) -> Result<AcInfo, FrameError> {
        let mut r = self.reader(ParameterCommand::AcParams)?;
        Ok(AcInfo {
            id: r.u16()?,
            ac_type: AcType::from_code(r.u8()?.wrapping_sub(b'0')),
            room: r.u16()?,
            name: r.name()?,
        })
    }

    pub fn parse_scenario_numbers(&self) -> Result<Vec<u16>, FrameError> {
        let mut r = self.reader(ParameterCommand::ScenarioNumbers)?;
        let count = r.u8()?;
        (0..count).map(|_| r.u16()).collect()
    }

    pub fn parse_scenario_params(&self) -> Result<ScenarioInfo, FrameError> {
        let mut r = self.reader(ParameterCommand::ScenarioParams)?;
        Ok(ScenarioInfo {
            id: r.u16()?,
            room: r.u16()?,
            name: r.name()?,
        })
    }
}

/// Bounds-checked cursor over a reply body.
struct Reader {
    command: u8,
    buf: Bytes,
}

impl Reader {
    fn short(&self) -> FrameError {
        FrameError::Payload {
            command: self.command,
            reason: "reply body truncated",
        }
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        if self.buf.remaining() < 1 {
            return Err(self.short());
        }
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        if self.buf.remaining() < 2 {
            return Err(self.short());
        }
        Ok(self.buf.get_u16())
    }

    /// Length-prefixed name: `len:u8` bytes of UTF-16LE.
    fn name(&mut self) -> Result<String, FrameError> {
        let len = usize::from(self.u8()?);
        if self.buf.remaining() < len || len % 2 != 0 {
            return Err(FrameError::Payload {
                command: self.command,
                reason: "name length does not match body",
            });
        }
        let raw = self.buf.split_to(len);
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units)
            .trim_end_matches('\0')
            .trim()
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn utf16le(name: &str) -> Vec<u8> {
        let bytes: Vec<u8> = name.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let mut out = vec![u8::try_from(bytes.len()).unwrap()];
        out.extend(bytes);
        out
    }

    fn reply(command: ParameterCommand, data: Vec<u8>) -> ParameterReply {
        ParameterReply {
            command,
            data: Bytes::from(data),
        }
    }

    #[test]
    fn request_layout_and_checksum() {
        let mut buf = BytesMut::new();
        ParameterRequest::ac_params(0x0102).encode_into(&mut buf);
        let sum = checksum(&buf[..buf.len() - 1]);
        assert_eq!(
            buf.to_vec(),
            vec![b'V', b'T', b'H', b'>', 8, 0, 3, 1, 2, sum]
        );
    }

    #[test]
    fn keypad_zero_is_requested_as_256() {
        let request = ParameterRequest::key_params(0, 4);
        assert_eq!(request.data.as_ref(), &[1, 0, 4]);
    }

    #[test]
    fn parses_keypad_list() {
        let body = reply(
            ParameterCommand::KeypadNumbers,
            vec![0, 2, 0, 1, 4, 0, 9, 2],
        );
        assert_eq!(
            body.parse_keypad_numbers().unwrap(),
            vec![KeypadInfo { id: 1, keys: 4 }, KeypadInfo { id: 9, keys: 2 }]
        );
    }

    #[test]
    fn parses_key_params_with_name() {
        let mut data = vec![1, 0, 3, 3, 0, 7];
        data.extend(utf16le("Salon"));
        let key = reply(ParameterCommand::KeyParams, data)
            .parse_key_params()
            .unwrap();
        assert_eq!(key.keypad, 0);
        assert_eq!(key.key, 3);
        assert_eq!(key.key_type, Some(KeyType::Dimmer));
        assert_eq!(key.room, 7);
        assert_eq!(key.name, "Salon");
    }

    #[test]
    fn parses_ac_params_ascii_type() {
        let mut data = vec![0, 5, b'4', 0, 2];
        data.extend(utf16le("Bedroom AC"));
        let ac = reply(ParameterCommand::AcParams, data)
            .parse_ac_params()
            .unwrap();
        assert_eq!(ac.id, 5);
        assert_eq!(ac.ac_type, Some(AcType::Tmsf));
        assert_eq!(ac.name, "Bedroom AC");
    }

    #[test]
    fn truncated_body_is_an_error() {
        let err = reply(ParameterCommand::ScenarioNumbers, vec![3, 0, 1])
            .parse_scenario_numbers()
            .unwrap_err();
        assert!(matches!(err, FrameError::Payload { command: 9, .. }));
    }

    #[test]
    fn wrong_command_is_an_error() {
        let err = reply(ParameterCommand::RoomNumbers, vec![0])
            .parse_ac_numbers()
            .unwrap_err();
        assert!(matches!(err, FrameError::Payload { .. }));
    }
}
