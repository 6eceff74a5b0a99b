//! `vitrea probe`: login, firmware version, hang up.

use owo_colors::OwoColorize;

use vitrea_core::{ControllerConfig, ControllerInfo};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_owned()
}

pub async fn handle(config: ControllerConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let address = config.address();
    let info = vitrea_core::probe(&config).await?;

    if !info.supported && !global.quiet {
        let warning = format!(
            "warning: firmware {} is older than this client supports",
            info.version()
        );
        if output::should_color(global.color) {
            eprintln!("{}", warning.yellow());
        } else {
            eprintln!("{warning}");
        }
    }

    let detail = |i: &ControllerInfo| {
        output::detail_lines(&[
            ("Controller", address.clone()),
            ("Firmware", i.version()),
            ("Supported", yes_no(i.supported)),
            ("LED commands", yes_no(i.led_commands)),
        ])
    };
    let out = output::render_single(global.output, &info, detail, ControllerInfo::version)?;
    output::print_output(&out, global.quiet);
    Ok(())
}
