use std::time::Duration;

use thiserror::Error;

// ── Connect ─────────────────────────────────────────────────────────

/// Failure to establish a TCP session with the VBox.
///
/// Always transient from the session's point of view: the controller
/// lives on the local network and is expected to come and go.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Socket-level failure (refused, unreachable, DNS).
    #[error("Failed to connect to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP handshake did not finish in time.
    #[error("Timed out connecting to {addr} after {}ms", .timeout.as_millis())]
    Timeout { addr: String, timeout: Duration },
}

impl ConnectError {
    pub fn addr(&self) -> &str {
        match self {
            Self::Io { addr, .. } | Self::Timeout { addr, .. } => addr,
        }
    }
}

// ── Write ───────────────────────────────────────────────────────────

/// Failure to put a request on the wire.
///
/// Any write failure other than [`WriteError::Invalid`] also tears the
/// connection down.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The connection has already been lost or closed.
    #[error("Connection is closed")]
    Closed,

    /// The socket rejected the write.
    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),

    /// The socket did not accept the frame in time.
    #[error("Write timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The request carries out-of-range fields and was never sent.
    #[error("Invalid request: {0}")]
    Invalid(#[from] InvalidRequest),
}

impl WriteError {
    /// Returns `true` if this failure means the connection is gone.
    pub fn is_connection_loss(&self) -> bool {
        !matches!(self, Self::Invalid(_))
    }
}

/// A request field outside the range the controller accepts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} must be at most {max}, got {value}")]
pub struct InvalidRequest {
    pub field: &'static str,
    pub value: u32,
    pub max: u32,
}

// ── Framing ─────────────────────────────────────────────────────────

/// Corruption detected while decoding the inbound byte stream.
///
/// The decoder has already skipped past the offending bytes when this
/// is reported; the stream continues with the next frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// A complete text line that does not match any known message.
    #[error("Malformed line {line:?}: {reason}")]
    Malformed { line: String, reason: &'static str },

    /// A well-formed line of a message type this client does not model.
    #[error("Unrecognized message {line:?}")]
    Unrecognized { line: String },

    /// A binary parameter frame whose trailing checksum does not match.
    #[error("Checksum mismatch on parameter frame {command}: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { command: u8, expected: u8, actual: u8 },

    /// A binary parameter frame advertising an implausible length.
    #[error("Parameter frame length {len} exceeds limit {max}")]
    Oversized { len: usize, max: usize },

    /// Bytes that could not start any frame were discarded.
    #[error("Discarded {discarded} bytes of unframed data")]
    Garbage { discarded: usize },

    /// A parameter reply body shorter or shaped differently than expected.
    #[error("Invalid parameter reply for command {command}: {reason}")]
    Payload { command: u8, reason: &'static str },
}
