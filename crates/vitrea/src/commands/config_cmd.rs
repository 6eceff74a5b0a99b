//! Config subcommand handlers.

use tabled::Tabled;

use vitrea_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, ConfigInitArgs, GlobalOpts, OutputFormat};
use crate::config::available_profiles;
use crate::error::CliError;
use crate::output;

const MASK: &str = "********";

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Password")]
    password: String,
    #[tabled(rename = "Default")]
    default: String,
}

#[derive(serde::Serialize)]
struct ProfileEntry<'a> {
    name: &'a str,
    #[serde(flatten)]
    profile: Profile,
    default: bool,
}

fn profile_row(entry: &ProfileEntry<'_>) -> ProfileRow {
    let password = match (&entry.profile.password_env, &entry.profile.password) {
        (Some(var), _) => format!("${var}"),
        (None, Some(_)) => MASK.into(),
        (None, None) => "(factory default)".into(),
    };
    ProfileRow {
        name: entry.name.to_owned(),
        host: entry.profile.host.clone(),
        port: entry.profile.port,
        password,
        default: if entry.default { "*".into() } else { String::new() },
    }
}

/// A copy of `cfg` safe to print.
fn masked(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some(MASK.into());
        }
    }
    cfg
}

fn init(args: ConfigInitArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let host = global
        .host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| CliError::Validation {
            field: "host".into(),
            reason: "config init needs --host".into(),
        })?;
    if args.password_env.is_some() && global.password.is_some() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "use either --password or --password-env, not both".into(),
        });
    }

    let mut cfg = vitrea_config::load_config()?;
    if cfg.profiles.contains_key(&args.name) && !args.force {
        return Err(CliError::Validation {
            field: "name".into(),
            reason: format!("profile '{}' already exists (use --force to replace it)", args.name),
        });
    }

    let mut profile = Profile::new(host);
    if let Some(port) = global.port {
        profile.port = port;
    }
    profile.password.clone_from(&global.password);
    profile.password_env = args.password_env;
    if let Some(timeout) = global.timeout {
        profile.command_timeout = Some(timeout.as_secs().max(1));
    }
    if args.no_discover {
        profile.discover = Some(false);
    }

    // Reject values the connect path would refuse later. The password
    // variable need not be set yet.
    let mut check = profile.clone();
    check.password_env = None;
    vitrea_config::profile_to_controller_config(&check, &args.name, &cfg.defaults)?;

    cfg.profiles.insert(args.name.clone(), profile);
    if cfg.default_profile.is_none() || cfg.profiles.len() == 1 {
        cfg.default_profile = Some(args.name.clone());
    }
    let path = vitrea_config::save_config(&cfg)?;

    if !global.quiet {
        eprintln!("Wrote profile '{}' to {}", args.name, path.display());
        if global.password.is_some() {
            eprintln!("  The password is stored in plaintext; consider --password-env.");
        }
        eprintln!("  Test it: vitrea probe --profile {}", args.name);
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init(init_args) => init(init_args, global),

        ConfigCommand::Show => {
            let cfg = masked(&vitrea_config::load_config()?);
            let out = match global.output {
                OutputFormat::Json => serde_json::to_string_pretty(&cfg)?,
                OutputFormat::JsonCompact => serde_json::to_string(&cfg)?,
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)?,
            };
            output::print_output(out.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(
                &vitrea_config::config_path().display().to_string(),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = vitrea_config::load_config()?;
            if cfg.profiles.is_empty() {
                if !global.quiet {
                    eprintln!("No profiles configured. Run: vitrea config init --host <address>");
                }
                return Ok(());
            }
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            let shown = masked(&cfg);
            let entries: Vec<ProfileEntry<'_>> = shown
                .profiles
                .iter()
                .map(|(name, profile)| ProfileEntry {
                    name,
                    profile: profile.clone(),
                    default: name == default,
                })
                .collect();
            let out = output::render_list(global.output, &entries, profile_row, |e| {
                e.name.to_owned()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = vitrea_config::load_config()?;
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: available_profiles(&cfg),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            vitrea_config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("Default profile set to '{name}'");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_masks_plaintext_passwords() {
        let mut cfg = Config::default();
        let mut profile = Profile::new("10.0.0.5");
        profile.password = Some("hunter2".into());
        cfg.profiles.insert("home".into(), profile);

        let shown = masked(&cfg);
        assert_eq!(shown.profiles["home"].password.as_deref(), Some(MASK));
        assert_eq!(cfg.profiles["home"].password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn profile_rows_describe_password_source() {
        let mut profile = Profile::new("10.0.0.5");
        profile.password_env = Some("VBOX_PW".into());
        let row = profile_row(&ProfileEntry {
            name: "home",
            profile,
            default: true,
        });
        assert_eq!(row.password, "$VBOX_PW");
        assert_eq!(row.default, "*");
    }
}
