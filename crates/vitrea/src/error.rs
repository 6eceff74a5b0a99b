//! CLI error types with miette diagnostics.
//!
//! Maps core, command and config errors into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use vitrea_config::ConfigError;
use vitrea_core::{CommandError, CoreError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the controller: {reason}")]
    #[diagnostic(
        code(vitrea::connection_failed),
        help(
            "Check that the VBox is powered and reachable on its TCP port (default 11502).\n\
             Try: vitrea probe --host <address>"
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Controller connection was lost: {reason}")]
    #[diagnostic(
        code(vitrea::disconnected),
        help("The command may or may not have been applied. Check with: vitrea state <id>")
    )]
    Disconnected { reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(vitrea::auth_failed),
        help(
            "Verify the controller password.\n\
             Set it with --password, VITREA_PASSWORD, or: vitrea config init --password <pw>"
        )
    )]
    AuthFailed { message: String },

    // ── Devices ──────────────────────────────────────────────────────
    #[error("Device '{identifier}' not found")]
    #[diagnostic(
        code(vitrea::not_found),
        help("Run: vitrea devices to see available devices")
    )]
    NotFound { identifier: String },

    #[error("Controller rejected the command: {message}")]
    #[diagnostic(code(vitrea::rejected))]
    Rejected { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(vitrea::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(vitrea::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: vitrea config init --host <address> --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No controller configured")]
    #[diagnostic(
        code(vitrea::no_config),
        help(
            "Pass --host, or create a profile with: vitrea config init --host <address>\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(vitrea::config))]
    Config(#[from] ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {millis}ms waiting for {what}")]
    #[diagnostic(
        code(vitrea::timeout),
        help("Increase the timeout with --timeout or check controller responsiveness.")
    )]
    Timeout { what: String, millis: u128 },

    // ── Session ──────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(vitrea::session))]
    Session(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not serialize output: {0}")]
    #[diagnostic(code(vitrea::json))]
    Json(#[from] serde_json::Error),

    #[error("Could not serialize config: {0}")]
    #[diagnostic(code(vitrea::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. }
            | Self::ProfileNotFound { .. }
            | Self::Config(ConfigError::Validation { .. } | ConfigError::UnknownProfile { .. }) => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Connect(e) => Self::ConnectionFailed {
                reason: e.to_string(),
            },

            CoreError::SessionFailed { message } => Self::ConnectionFailed { reason: message },

            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },

            CoreError::ControllerDisconnected => Self::Disconnected {
                reason: "controller closed the connection".into(),
            },

            e @ (CoreError::Frame(_) | CoreError::Write(_)) => Self::Disconnected {
                reason: e.to_string(),
            },

            CoreError::Timeout { what, timeout } => Self::Timeout {
                what: what.into(),
                millis: timeout.as_millis(),
            },

            CoreError::Command(e) => e.into(),

            CoreError::DeviceNotFound { identifier } => Self::NotFound { identifier },

            CoreError::InvalidDeviceId(e) => Self::Validation {
                field: "device id".into(),
                reason: e.to_string(),
            },

            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },

            e @ (CoreError::Discovery { .. }
            | CoreError::AlreadyStarted
            | CoreError::Stopped) => Self::Session(e.to_string()),
        }
    }
}

impl From<CommandError> for CliError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Timeout(timeout) => Self::Timeout {
                what: "the controller to acknowledge".into(),
                millis: timeout.as_millis(),
            },
            CommandError::Cancelled => Self::Disconnected {
                reason: "command cancelled".into(),
            },
            CommandError::NotConnected => Self::Disconnected {
                reason: "controller is not connected".into(),
            },
            CommandError::Write(e) => Self::Disconnected {
                reason: e.to_string(),
            },
            CommandError::Rejected { message, .. } => Self::Rejected { message },
            CommandError::Invalid(reason) => Self::Validation {
                field: "command".into(),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        let timeout: CliError = CommandError::Timeout(Duration::from_secs(5)).into();
        assert_eq!(timeout.exit_code(), exit_code::TIMEOUT);

        let invalid: CliError = CommandError::Invalid("brightness 140".into()).into();
        assert_eq!(invalid.exit_code(), exit_code::USAGE);

        let lost: CliError = CoreError::ControllerDisconnected.into();
        assert_eq!(lost.exit_code(), exit_code::CONNECTION);

        let auth: CliError = CoreError::AuthenticationFailed {
            message: "bad password".into(),
        }
        .into();
        assert_eq!(auth.exit_code(), exit_code::AUTH);
    }

    #[test]
    fn wrapped_command_errors_keep_their_class() {
        let err: CliError = CoreError::Command(CommandError::Rejected {
            code: None,
            message: "ERROR".into(),
        })
        .into();
        assert!(matches!(err, CliError::Rejected { .. }));
        assert_eq!(err.exit_code(), exit_code::REJECTED);
    }
}
