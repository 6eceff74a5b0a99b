//! Shared configuration for Vitrea tools.
//!
//! TOML profiles layered with `VITREA_` environment variables, password
//! resolution, and translation to `vitrea_core::ControllerConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vitrea_core::config::{DEFAULT_PASSWORD, DEFAULT_PORT};
use vitrea_core::{ControllerConfig, ReconnectConfig};

pub const ENV_PREFIX: &str = "VITREA_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("environment variable {var} (password_env of profile '{profile}') is not set")]
    MissingPasswordEnv { profile: String, var: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named controller profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Command acknowledgement timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    5
}

/// A named controller profile. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Controller host name or IP address.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Plaintext password. Prefer `password_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable holding the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,

    /// Overrides `defaults.timeout`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keepalive_interval: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keepalive_timeout: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_initial: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_max: Option<u64>,

    /// Read the installation catalog after connecting. Default: true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discover: Option<bool>,
}

impl Profile {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            password: None,
            password_env: None,
            connect_timeout: None,
            command_timeout: None,
            keepalive_interval: None,
            keepalive_timeout: None,
            reconnect_initial: None,
            reconnect_max: None,
            discover: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "vitrea", "vitrea").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("vitrea");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Nested keys in the environment use a double underscore, e.g.
/// `VITREA_PROFILES__HOME__HOST`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

/// Picks the profile named `requested`, else the configured default.
pub fn resolve_profile<'a>(
    config: &'a Config,
    requested: Option<&str>,
) -> Result<(&'a str, &'a Profile), ConfigError> {
    let name = requested
        .or(config.default_profile.as_deref())
        .unwrap_or("default");
    config
        .profiles
        .get_key_value(name)
        .map(|(name, profile)| (name.as_str(), profile))
        .ok_or_else(|| ConfigError::UnknownProfile {
            profile: name.into(),
        })
}

/// Resolve the password: `password_env`, then plaintext, then the
/// controller's factory default.
pub fn resolve_password(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    if let Some(ref var) = profile.password_env {
        return std::env::var(var)
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingPasswordEnv {
                profile: profile_name.into(),
                var: var.clone(),
            });
    }
    if let Some(ref password) = profile.password {
        return Ok(SecretString::from(password.clone()));
    }
    Ok(SecretString::from(DEFAULT_PASSWORD.to_owned()))
}

/// Build a validated `ControllerConfig` from a profile.
pub fn profile_to_controller_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ControllerConfig, ConfigError> {
    if profile.host.trim().is_empty() {
        return Err(validation("host", "must not be empty"));
    }
    if profile.port == 0 {
        return Err(validation("port", "must not be 0"));
    }

    let base = ControllerConfig::default();
    let reconnect = ReconnectConfig {
        initial_delay: seconds("reconnect_initial", profile.reconnect_initial)?
            .unwrap_or(base.reconnect.initial_delay),
        max_delay: seconds("reconnect_max", profile.reconnect_max)?
            .unwrap_or(base.reconnect.max_delay),
    };
    if reconnect.initial_delay > reconnect.max_delay {
        return Err(validation("reconnect_initial", "must not exceed reconnect_max"));
    }

    let command_timeout = seconds(
        "command_timeout",
        Some(profile.command_timeout.unwrap_or(defaults.timeout)),
    )?
    .unwrap_or(base.command_timeout);

    Ok(ControllerConfig {
        host: profile.host.trim().to_owned(),
        port: profile.port,
        password: resolve_password(profile, profile_name)?,
        connect_timeout: seconds("connect_timeout", profile.connect_timeout)?
            .unwrap_or(base.connect_timeout),
        command_timeout,
        keepalive_interval: seconds("keepalive_interval", profile.keepalive_interval)?
            .unwrap_or(base.keepalive_interval),
        keepalive_timeout: seconds("keepalive_timeout", profile.keepalive_timeout)?
            .unwrap_or(base.keepalive_timeout),
        reconnect,
        discover: profile.discover.unwrap_or(base.discover),
    })
}

fn seconds(field: &str, value: Option<u64>) -> Result<Option<Duration>, ConfigError> {
    match value {
        Some(0) => Err(validation(field, "must be at least 1 second")),
        other => Ok(other.map(Duration::from_secs)),
    }
}

fn validation(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}
