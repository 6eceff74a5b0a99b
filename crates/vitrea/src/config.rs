//! Turns the TOML profiles plus global flags into a `ControllerConfig`.
//!
//! Profile storage lives in vitrea-config; this module only applies the
//! command-line overrides on top.

use std::time::Duration;

use secrecy::SecretString;

use vitrea_config::{Config, ConfigError, profile_to_controller_config, resolve_profile};
use vitrea_core::ControllerConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Build a `ControllerConfig` from the config file, profile, and CLI overrides.
pub fn build_controller_config(global: &GlobalOpts) -> Result<ControllerConfig, CliError> {
    let cfg = vitrea_config::load_config()?;

    match resolve_profile(&cfg, global.profile.as_deref()) {
        Ok((name, profile)) => {
            let base = profile_to_controller_config(profile, name, &cfg.defaults)?;
            apply_overrides(base, global)
        }
        // An explicitly requested profile must exist.
        Err(ConfigError::UnknownProfile { profile }) if global.profile.is_some() => {
            Err(CliError::ProfileNotFound {
                name: profile,
                available: available_profiles(&cfg),
            })
        }
        // No profile: the flags alone have to name a controller.
        Err(ConfigError::UnknownProfile { .. }) => {
            let host = global.host.as_deref().ok_or_else(|| CliError::NoConfig {
                path: vitrea_config::config_path().display().to_string(),
            })?;
            let mut base = ControllerConfig::new(host);
            base.command_timeout = Duration::from_secs(cfg.defaults.timeout.max(1));
            apply_overrides(base, global)
        }
        Err(e) => Err(e.into()),
    }
}

fn apply_overrides(
    mut config: ControllerConfig,
    global: &GlobalOpts,
) -> Result<ControllerConfig, CliError> {
    if let Some(host) = &global.host {
        if host.trim().is_empty() {
            return Err(CliError::Validation {
                field: "host".into(),
                reason: "must not be empty".into(),
            });
        }
        config.host = host.trim().to_owned();
    }
    if let Some(port) = global.port {
        if port == 0 {
            return Err(CliError::Validation {
                field: "port".into(),
                reason: "must not be 0".into(),
            });
        }
        config.port = port;
    }
    if let Some(password) = &global.password {
        config.password = SecretString::from(password.clone());
    }
    if let Some(timeout) = global.timeout {
        if timeout.is_zero() {
            return Err(CliError::Validation {
                field: "timeout".into(),
                reason: "must be greater than zero".into(),
            });
        }
        config.command_timeout = timeout;
    }
    Ok(config)
}

/// Comma-separated profile names, or `(none)`.
pub fn available_profiles(cfg: &Config) -> String {
    if cfg.profiles.is_empty() {
        "(none)".into()
    } else {
        cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}
