// ── Controller probe ──
//
// A throwaway connection that logs in, asks for the firmware version and
// hangs up. No store, no correlator: replies are read straight off the
// frame stream.

use std::time::Duration;

use secrecy::ExposeSecret;
use serde::Serialize;
use vitrea_api::{Connection, ConnectionEvent, Frame, Frames, ReplyClass, Request, Response};

use crate::config::ControllerConfig;
use crate::error::{CommandError, CoreError};

/// What a VBox reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControllerInfo {
    pub major: u8,
    pub minor: u16,
    /// The firmware is recent enough for this client.
    pub supported: bool,
    /// The firmware understands keypad LED commands.
    pub led_commands: bool,
}

impl ControllerInfo {
    pub fn new(major: u8, minor: u16) -> Self {
        let minimum_minor = match major {
            8 => Some(66),
            9 => Some(0),
            _ => None,
        };
        Self {
            major,
            minor,
            supported: minimum_minor.is_none_or(|min| minor >= min),
            led_commands: major >= 9 || major < 1,
        }
    }

    /// `8.66` style version string.
    pub fn version(&self) -> String {
        format!("{}.{:02}", self.major, self.minor)
    }
}

/// Connects, authenticates, reads the firmware version and disconnects.
pub async fn probe(config: &ControllerConfig) -> Result<ControllerInfo, CoreError> {
    let (connection, mut frames) =
        Connection::connect(&config.address(), config.connection_config()).await?;
    let result = exchange(&connection, &mut frames, config).await;
    connection.close();
    if let Ok(info) = &result {
        tracing::info!(
            version = %info.version(),
            supported = info.supported,
            "Controller probed"
        );
    }
    result
}

async fn exchange(
    connection: &Connection,
    frames: &mut Frames,
    config: &ControllerConfig,
) -> Result<ControllerInfo, CoreError> {
    let timeout = config.command_timeout;

    let login = Request::authenticate(config.password.expose_secret());
    connection.send(&login).await?;
    match next_reply(frames, login.reply_class(), timeout).await {
        Ok(Response::Error { message, .. }) => {
            return Err(CoreError::AuthenticationFailed { message });
        }
        Ok(_) => {}
        Err(CoreError::Timeout { .. }) => {
            return Err(CoreError::AuthenticationFailed {
                message: "controller did not acknowledge the password".into(),
            });
        }
        Err(e) => return Err(e),
    }

    connection.send(&Request::GetVersion).await?;
    match next_reply(frames, ReplyClass::Version, timeout).await? {
        Response::Version { major, minor } => Ok(ControllerInfo::new(major, minor)),
        Response::Error { code, message } => {
            Err(CommandError::Rejected { code, message }.into())
        }
        other => Err(CommandError::Invalid(format!(
            "unexpected reply to version request: {other:?}"
        ))
        .into()),
    }
}

/// Reads until a response `class` accepts (or any error line) arrives.
/// Pushes and echoes are skipped.
async fn next_reply(
    frames: &mut Frames,
    class: ReplyClass,
    timeout: Duration,
) -> Result<Response, CoreError> {
    let wait = async {
        loop {
            match frames.recv().await {
                Some(ConnectionEvent::Frame(Frame::Response(response)))
                    if class.accepts(&response)
                        || matches!(response, Response::Error { .. }) =>
                {
                    return Ok(response);
                }
                Some(ConnectionEvent::Frame(_) | ConnectionEvent::Corrupt(_)) => {}
                Some(ConnectionEvent::Lost(reason)) => {
                    tracing::debug!(%reason, "Connection lost during probe");
                    return Err(CoreError::ControllerDisconnected);
                }
                None => return Err(CoreError::ControllerDisconnected),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| CoreError::Timeout {
            what: "controller reply",
            timeout,
        })?
}
