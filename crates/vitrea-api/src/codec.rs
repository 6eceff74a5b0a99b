//! Frame codec for the VBox byte stream.
//!
//! The controller multiplexes two framings on one socket: CRLF-terminated
//! ASCII lines (control protocol) and length-prefixed `VTH` frames
//! (parameter protocol). [`VboxCodec`] splits both out of a
//! [`BytesMut`] and plugs into `tokio_util::codec::{FramedRead, FramedWrite}`.
//!
//! Decoding never fails the stream. Corrupt input is skipped up to the next
//! plausible frame start and surfaced as an `Err(FrameError)` *item*, so a
//! `FramedRead` keeps going; the decoder's own error type is reserved for
//! socket I/O.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;
use crate::frame::{Frame, Response};
use crate::parameter::{
    self, HEADER_LEN, ParameterCommand, ParameterReply, ParameterRequest, REPLY_MARKER,
    REQUEST_MARKER,
};
use crate::request::Request;

/// Longest text line accepted before the buffer is treated as garbage.
pub const MAX_LINE_LEN: usize = 1024;

/// Largest parameter frame body (data plus checksum) accepted.
pub const MAX_PARAMETER_LEN: usize = 4096;

const MARKER_STEM: &[u8] = b"VTH";

pub type DecodedFrame = Result<Frame, FrameError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct VboxCodec;

impl VboxCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for VboxCodec {
    type Item = DecodedFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(decode_frame(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = decode_frame(src) {
            return Ok(Some(item));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Peer closed mid-line: classify whatever is left as a final line.
        let rest = src.split();
        let text = String::from_utf8_lossy(&rest);
        Ok(Some(Frame::parse_line(text.trim_end())))
    }
}

impl Encoder<Request> for VboxCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        Ok(())
    }
}

/// Serializes one request into a standalone buffer.
pub fn encode_request(request: &Request) -> Bytes {
    let mut buf = BytesMut::new();
    request.encode_into(&mut buf);
    buf.freeze()
}

/// Drains every complete frame from `src`, leaving any partial frame in place.
pub fn decode_all(src: &mut BytesMut) -> Vec<DecodedFrame> {
    std::iter::from_fn(|| decode_frame(src)).collect()
}

/// Pulls at most one frame (or one corruption report) off the front of `src`.
///
/// `None` means more bytes are needed; nothing has been consumed except
/// blank line terminators.
pub fn decode_frame(src: &mut BytesMut) -> Option<DecodedFrame> {
    loop {
        let blank = src
            .iter()
            .take_while(|b| matches!(b, b'\r' | b'\n'))
            .count();
        src.advance(blank);

        if src.is_empty() {
            return None;
        }

        if could_be_parameter_frame(src) {
            return decode_parameter(src);
        }

        let newline = src.iter().position(|b| *b == b'\n');
        let marker = find(src, MARKER_STEM, 1);

        // Garbage glued in front of a binary frame.
        if let Some(at) = marker {
            if newline.is_none_or(|nl| at < nl) {
                src.advance(at);
                return Some(Err(FrameError::Garbage { discarded: at }));
            }
        }

        let Some(end) = newline else {
            if src.len() > MAX_LINE_LEN {
                let discarded = src.len();
                src.clear();
                return Some(Err(FrameError::Garbage { discarded }));
            }
            return None;
        };

        let raw = src.split_to(end + 1);
        let line = trim_terminator(&raw);
        if line.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(line);
        return Some(Frame::parse_line(&text));
    }
}

// ── Parameter frames ────────────────────────────────────────────────

/// `true` while the buffer head is, or may still become, a `VTH<`/`VTH>` frame.
fn could_be_parameter_frame(src: &[u8]) -> bool {
    let head = &src[..src.len().min(REPLY_MARKER.len())];
    REPLY_MARKER.starts_with(head) || REQUEST_MARKER.starts_with(head)
}

fn decode_parameter(src: &mut BytesMut) -> Option<DecodedFrame> {
    if src.len() < HEADER_LEN {
        return None;
    }

    let len = usize::from(u16::from_be_bytes([src[5], src[6]]));
    if len == 0 || len > MAX_PARAMETER_LEN {
        skip_to_resync_point(src);
        return Some(Err(FrameError::Oversized {
            len,
            max: MAX_PARAMETER_LEN,
        }));
    }

    let total = HEADER_LEN + len;
    if src.len() < total {
        src.reserve(total - src.len());
        return None;
    }

    let frame = src.split_to(total).freeze();
    let command = frame[4];
    let expected = parameter::checksum(&frame[..total - 1]);
    let actual = frame[total - 1];
    if expected != actual {
        return Some(Err(FrameError::Checksum {
            command,
            expected,
            actual,
        }));
    }

    let Some(command) = ParameterCommand::from_code(command) else {
        return Some(Err(FrameError::Payload {
            command,
            reason: "unknown parameter command",
        }));
    };
    let data = frame.slice(HEADER_LEN..total - 1);

    Some(Ok(if frame[3] == b'<' {
        Frame::Response(Response::Parameter(ParameterReply { command, data }))
    } else {
        Frame::Command(Request::Parameter(ParameterRequest { command, data }))
    }))
}

/// Drops a bad header and everything up to the next `VTH` or line end.
fn skip_to_resync_point(src: &mut BytesMut) {
    let marker = find(src, MARKER_STEM, 1);
    let newline = src.iter().position(|b| *b == b'\n').map(|nl| nl + 1);
    let cut = match (marker, newline) {
        (Some(m), Some(n)) => m.min(n),
        (Some(at), None) | (None, Some(at)) => at,
        (None, None) => src.len(),
    };
    src.advance(cut);
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn trim_terminator(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.strip_suffix(b"\r").unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{KeyStatus, Push};
    use crate::request::AcSetting;
    use crate::types::{FanSpeed, TemperatureUnit, ThermostatFan, ThermostatMode};
    use pretty_assertions::assert_eq;

    fn reply_frame(command: u8, data: &[u8]) -> Vec<u8> {
        let mut out = b"VTH<".to_vec();
        out.push(command);
        out.extend_from_slice(&u16::try_from(data.len() + 1).unwrap().to_be_bytes());
        out.extend_from_slice(data);
        out.push(parameter::checksum(&out));
        out
    }

    #[test]
    fn splits_multiple_lines_from_one_read() {
        let mut buf = BytesMut::from(&b"OK\r\nS:N001:1:F\r\nS:PSW:OK\r\n"[..]);
        let frames = decode_all(&mut buf);
        assert_eq!(
            frames,
            vec![
                Ok(Frame::Response(Response::Ok)),
                Ok(Frame::Push(Push::Key { node: 1, key: 1, status: KeyStatus::Off })),
                Ok(Frame::Response(Response::KeepAliveAck)),
            ]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn truncated_line_waits_for_more_bytes() {
        let mut buf = BytesMut::from(&b"S:N001:1:"[..]);
        assert_eq!(decode_frame(&mut buf), None);
        assert_eq!(&buf[..], b"S:N001:1:");

        buf.extend_from_slice(b"O\r\n");
        assert!(matches!(decode_frame(&mut buf), Some(Ok(Frame::Push(_)))));
    }

    #[test]
    fn malformed_line_is_skipped_and_stream_continues() {
        let mut buf = BytesMut::from(&b"S:N0#1:1:O\r\nOK\r\n"[..]);
        let frames = decode_all(&mut buf);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(FrameError::Malformed { .. })));
        assert_eq!(frames[1], Ok(Frame::Response(Response::Ok)));
    }

    #[test]
    fn decodes_parameter_reply_split_across_reads() {
        let bytes = reply_frame(7, &[2, 0, 1, 0, 2]);
        let (first, second) = bytes.split_at(6);

        let mut buf = BytesMut::from(first);
        assert_eq!(decode_frame(&mut buf), None);
        buf.extend_from_slice(second);

        let Some(Ok(Frame::Response(Response::Parameter(reply)))) = decode_frame(&mut buf) else {
            panic!("expected parameter reply");
        };
        assert_eq!(reply.command, ParameterCommand::AcNumbers);
        assert_eq!(reply.parse_ac_numbers().unwrap(), vec![1, 2]);
        assert!(buf.is_empty());
    }

    #[test]
    fn bad_checksum_consumes_exactly_one_frame() {
        let mut bytes = reply_frame(9, &[0]);
        let last = bytes.len() - 1;
        bytes[last] = bytes[last].wrapping_add(1);
        bytes.extend_from_slice(b"OK\r\n");

        let mut buf = BytesMut::from(&bytes[..]);
        let frames = decode_all(&mut buf);
        assert!(matches!(frames[0], Err(FrameError::Checksum { command: 9, .. })));
        assert_eq!(frames[1], Ok(Frame::Response(Response::Ok)));
    }

    #[test]
    fn garbage_before_binary_frame_is_discarded() {
        let mut bytes = b"\x01\x02zz".to_vec();
        bytes.extend(reply_frame(3, &[0]));

        let mut buf = BytesMut::from(&bytes[..]);
        let frames = decode_all(&mut buf);
        assert_eq!(frames[0], Err(FrameError::Garbage { discarded: 4 }));
        assert!(matches!(frames[1], Ok(Frame::Response(Response::Parameter(_)))));
    }

    #[test]
    fn oversized_header_resyncs_at_next_line() {
        let mut buf = BytesMut::from(&b"VTH<\x05\xff\xffjunk\r\nOK\r\n"[..]);
        let frames = decode_all(&mut buf);
        assert!(matches!(frames[0], Err(FrameError::Oversized { .. })));
        assert_eq!(frames[1], Ok(Frame::Response(Response::Ok)));
    }

    #[test]
    fn runaway_line_is_dropped() {
        let mut buf = BytesMut::from(&vec![b'x'; MAX_LINE_LEN + 1][..]);
        assert_eq!(
            decode_frame(&mut buf),
            Some(Err(FrameError::Garbage { discarded: MAX_LINE_LEN + 1 }))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn version_line_is_not_mistaken_for_binary() {
        let mut buf = BytesMut::from(&b"V:866\r\n"[..]);
        assert_eq!(
            decode_frame(&mut buf),
            Some(Ok(Frame::Response(Response::Version { major: 8, minor: 66 })))
        );
    }

    #[test]
    fn round_trips_every_request_shape() {
        let requests = vec![
            Request::authenticate("VITREA"),
            Request::GetVersion,
            Request::GetFullStatus,
            Request::GetNodeStatus { node: 12 },
            Request::GetKeyStatus { node: 12, key: 3 },
            Request::GetAcStatus { ac: 1 },
            Request::GetInputStatus { input: 2 },
            Request::GetOccupancy,
            Request::KeyOn { node: 7, key: 1, minutes: 30 },
            Request::KeyOff { node: 7, key: 1 },
            Request::KeyToggle { node: 999, key: 9 },
            Request::Dimmer { node: 42, key: 1, duration: 120, level: 10 },
            Request::Blind { node: 3, key: 2, position: 255 },
            Request::FanSpeed { node: 4, speed: FanSpeed::Medium },
            Request::Scenario { id: 9999 },
            Request::AcPower { ac: 1, on: true },
            Request::AcStep { ac: 1, up: true },
            Request::AcSetting { ac: 1, setting: AcSetting::Mode(ThermostatMode::Dry) },
            Request::AcSetting { ac: 1, setting: AcSetting::Fan(ThermostatFan::Top) },
            Request::AcSetting { ac: 1, setting: AcSetting::Temperature(19) },
            Request::AcSetting { ac: 1, setting: AcSetting::Unit(TemperatureUnit::Fahrenheit) },
            Request::AcSetting {
                ac: 3,
                setting: AcSetting::Full {
                    mode: ThermostatMode::Cool,
                    fan: ThermostatFan::Low,
                    temperature: 22,
                    unit: TemperatureUnit::Celsius,
                },
            },
            Request::Parameter(ParameterRequest::key_params(5, 2)),
            Request::Parameter(ParameterRequest::scenario_numbers()),
        ];

        for request in requests {
            let mut buf = BytesMut::from(&encode_request(&request)[..]);
            assert_eq!(
                decode_frame(&mut buf),
                Some(Ok(Frame::Command(request.clone()))),
                "round trip of {request:?}"
            );
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn codec_keeps_reading_after_corruption() {
        let mut codec = VboxCodec::new();
        let mut buf = BytesMut::from(&b"??\r\nS:C:0\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Ok(Some(Err(_)))));
        assert!(matches!(
            codec.decode(&mut buf),
            Ok(Some(Ok(Frame::Push(Push::Occupancy { occupied: false }))))
        ));
        assert!(matches!(codec.decode(&mut buf), Ok(None)));
    }

    #[test]
    fn final_unterminated_line_is_decoded_at_eof() {
        let mut codec = VboxCodec::new();
        let mut buf = BytesMut::from(&b"OK"[..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Ok(Some(Ok(Frame::Response(Response::Ok))))
        ));
        assert!(matches!(codec.decode_eof(&mut buf), Ok(None)));
    }
}
