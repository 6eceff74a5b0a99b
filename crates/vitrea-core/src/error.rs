// ── Core error types ──
//
// `CommandError` is what a single device command can fail with; it is
// returned to the caller and never retried. `CoreError` covers session,
// discovery and lookup failures and wraps the wire-level errors from
// vitrea-api.

use std::time::Duration;

use thiserror::Error;
use vitrea_api::{ConnectError, ErrorCode, FrameError, WriteError};

use crate::model::ParseDeviceIdError;

// ── CommandError ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CommandError {
    /// No acknowledgement arrived in time. The pending entry is gone.
    #[error("No reply from controller after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The entry was cancelled: connection loss, shutdown or explicit cancel.
    #[error("Command cancelled")]
    Cancelled,

    /// The controller answered `E:` or `ERROR`.
    #[error("Controller rejected command: {message}")]
    Rejected {
        code: Option<ErrorCode>,
        message: String,
    },

    #[error("Controller is not connected")]
    NotConnected,

    /// Unsupported command for the device kind, or an out-of-range value.
    #[error("Invalid command: {0}")]
    Invalid(String),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl CommandError {
    /// Returns `true` if the same command may succeed once the session
    /// is live again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Cancelled | Self::NotConnected => true,
            Self::Write(e) => e.is_connection_loss(),
            Self::Rejected { .. } | Self::Invalid(_) => false,
        }
    }
}

// ── CoreError ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Controller disconnected")]
    ControllerDisconnected,

    /// The first session attempt failed before going live.
    #[error("Could not establish a session: {message}")]
    SessionFailed { message: String },

    #[error("Timed out after {}ms waiting for {what}", .timeout.as_millis())]
    Timeout {
        what: &'static str,
        timeout: Duration,
    },

    // ── Protocol errors ──────────────────────────────────────────────
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Catalog discovery failed: {message}")]
    Discovery { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error(transparent)]
    InvalidDeviceId(#[from] ParseDeviceIdError),

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Controller session already started")]
    AlreadyStarted,

    #[error("Controller session has been shut down")]
    Stopped,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Returns `true` for failures a reconnect is expected to cure.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(_)
            | Self::ControllerDisconnected
            | Self::SessionFailed { .. }
            | Self::Timeout { .. }
            | Self::Frame(_) => true,
            Self::Write(e) => e.is_connection_loss(),
            Self::Command(e) => e.is_transient(),
            Self::AuthenticationFailed { .. }
            | Self::Discovery { .. }
            | Self::DeviceNotFound { .. }
            | Self::InvalidDeviceId(_)
            | Self::AlreadyStarted
            | Self::Stopped
            | Self::Config { .. } => false,
        }
    }
}
