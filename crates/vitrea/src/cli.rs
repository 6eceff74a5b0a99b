//! Clap derive structures for the `vitrea` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use vitrea_core::{DeviceId, DeviceKind};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// vitrea -- control a Vitrea VBox from the command line
#[derive(Debug, Parser)]
#[command(
    name = "vitrea",
    version,
    about = "Control Vitrea VBox home-automation controllers",
    long_about = "Talks to a Vitrea VBox over its TCP line protocol.\n\n\
        Lists lights, covers, fans, thermostats, scenarios and sensors,\n\
        sends commands to them and streams their state changes.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Controller profile to use
    #[arg(long, short = 'p', env = "VITREA_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Controller host name or IP address (overrides profile)
    #[arg(long, env = "VITREA_HOST", global = true)]
    pub host: Option<String>,

    /// Controller TCP port (overrides profile)
    #[arg(long, env = "VITREA_PORT", global = true)]
    pub port: Option<u16>,

    /// Controller password (overrides profile)
    #[arg(long, env = "VITREA_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "VITREA_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Command acknowledgement timeout, e.g. `5s` or `800ms`
    #[arg(
        long,
        env = "VITREA_TIMEOUT",
        value_parser = humantime::parse_duration,
        global = true
    )]
    pub timeout: Option<Duration>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect, synchronize and list every known device
    #[command(alias = "ls", alias = "d")]
    Devices(DevicesArgs),

    /// Show the current state of one device
    State(StateArgs),

    /// Send a command to a device
    Send(SendArgs),

    /// Stream session state and device changes until Ctrl-C
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Log in, read the firmware version and disconnect
    Probe,

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Device Commands ──────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Only list devices of this kind (light, cover, fan, thermostat, ...)
    #[arg(long, short = 'k')]
    pub kind: Option<DeviceKind>,
}

#[derive(Debug, Args)]
pub struct StateArgs {
    /// Device id: N042-1, A001, R0012, I003 or occupancy
    pub id: DeviceId,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Device id: N042-1, A001, R0012, I003 or occupancy
    pub id: DeviceId,

    /// What to do
    pub action: Action,

    /// Argument for actions that take one (level, minutes, speed, mode, ...)
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Turn a light, switch or thermostat on; activate a scenario
    On,
    /// Turn a light, switch, fan or thermostat off
    Off,
    /// Toggle a light or switch
    Toggle,
    /// Turn on with an auto-off timer (value: minutes)
    OnFor,
    /// Set dimmer level (value: 0-100)
    Brightness,
    /// Restore the level a dimmer had before it was switched off
    Recall,
    /// Freeze a dimmer mid-ramp
    StopDimming,
    /// Move a cover to a position (value: 0 closed - 100 open)
    Position,
    Open,
    Close,
    /// Stop a moving cover
    Stop,
    /// Set fan speed (value: off, low, medium, high, max)
    Speed,
    /// Run a scenario
    Activate,
    /// Set thermostat mode (value: cool, heat, fan, dry, auto)
    Mode,
    /// Set thermostat fan (value: low, medium, high, top, auto)
    Fan,
    /// Set thermostat target temperature (value: degrees)
    Temperature,
    /// Raise the thermostat setpoint by one step
    Raise,
    /// Lower the thermostat setpoint by one step
    Lower,
    /// Set thermostat display unit (value: celsius, fahrenheit)
    Unit,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show changes for devices of this kind
    #[arg(long, short = 'k')]
    pub kind: Option<DeviceKind>,

    /// Print the full device list once the first sync completes
    #[arg(long)]
    pub snapshot: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or replace a profile from --host/--port/--password
    Init(ConfigInitArgs),

    /// Show the current configuration (passwords masked)
    Show,

    /// Print the config file path
    Path,

    /// List profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct ConfigInitArgs {
    /// Profile name
    #[arg(long, default_value = "default")]
    pub name: String,

    /// Read the password from this environment variable at connect time
    #[arg(long)]
    pub password_env: Option<String>,

    /// Skip reading the installation catalog after connecting
    #[arg(long)]
    pub no_discover: bool,

    /// Replace an existing profile of the same name
    #[arg(long)]
    pub force: bool,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}
