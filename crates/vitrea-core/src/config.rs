// ── Runtime connection configuration ──
//
// These types describe *how* to talk to a VBox. They carry the password
// and timing knobs but never touch disk; vitrea-config builds a
// `ControllerConfig` from files and the environment and hands it in.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use vitrea_api::ConnectionConfig;

pub const DEFAULT_PORT: u16 = 11502;
pub const DEFAULT_PASSWORD: &str = "VITREA";

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on the delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Configuration for one VBox.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub host: String,
    pub port: u16,
    pub password: SecretString,
    pub connect_timeout: Duration,
    /// How long a command waits for its acknowledgement. Also the age
    /// after which unanswered pending entries are swept.
    pub command_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Read the installation catalog over the parameter API after the
    /// first successful connect.
    pub discover: bool,
}

impl ControllerConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// `host:port`, as handed to the socket layer.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub(crate) fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: self.connect_timeout,
            keepalive_interval: self.keepalive_interval,
            keepalive_timeout: self.keepalive_timeout,
            password: self.password.expose_secret().to_owned(),
            ..ConnectionConfig::default()
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let connection = ConnectionConfig::default();
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            password: SecretString::from(DEFAULT_PASSWORD.to_owned()),
            connect_timeout: connection.connect_timeout,
            command_timeout: Duration::from_secs(5),
            keepalive_interval: connection.keepalive_interval,
            keepalive_timeout: connection.keepalive_timeout,
            reconnect: ReconnectConfig::default(),
            discover: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_controller_conventions() {
        let config = ControllerConfig::new("192.168.1.23");
        assert_eq!(config.address(), "192.168.1.23:11502");
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.connection_config().password, "VITREA");
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let config = ControllerConfig {
            port: 7000,
            ..ControllerConfig::new("fe80::1")
        };
        assert_eq!(config.address(), "[fe80::1]:7000");
    }
}
