use core::fmt::Result as FmtResult;
use std::io::{self, IsTerminal as _};

use anyhow::Result;
use chrono::{Local, SecondsFormat};
use logging::debug_with_slot;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::Writer, time::FormatTime},
    prelude::*,
    EnvFilter, Registry,
};

pub const LOG_ENV_VAR: &str = "BEACON_DISPLAY_LOG";

const WORKSPACE_CRATES: &[&str] = &[
    "beacon_api",
    "chain_state",
    "clock",
    "data_feeds",
    "event_stream",
    "supervisor",
];

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> FmtResult {
        write!(
            w,
            "[{}]",
            Local::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

/// Logs `info` and above from every crate of the workspace to stdout.
///
/// Directives in the `BEACON_DISPLAY_LOG` environment variable are added on top of the defaults.
pub fn initialize_tracing_logger(
    module_path: &str,
    always_write_style: bool,
) -> Result<()> {
    let mut filter = default_filter(module_path)?;

    if let Ok(env_filter) = EnvFilter::try_from_env(LOG_ENV_VAR) {
        filter = add_directives(filter, &env_filter.to_string())?;
    }

    let enable_ansi = always_write_style || io::stdout().is_terminal();

    let stdout_layer = fmt::layer::<Registry>()
        .compact()
        .with_thread_ids(false)
        .with_target(true)
        .with_file(false)
        .with_line_number(true)
        .with_timer(LocalTimer)
        .with_ansi(enable_ansi);

    tracing_subscriber::registry()
        .with(stdout_layer.with_filter(filter))
        .try_init()?;

    debug_with_slot!("tracing started!");

    Ok(())
}

fn default_filter(module_path: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::default().add_directive(LevelFilter::OFF.into());

    for target in WORKSPACE_CRATES
        .iter()
        .copied()
        .chain([module_path, module_path!()])
    {
        filter = filter.add_directive(format!("{target}=info").parse()?);
    }

    Ok(filter)
}

fn add_directives(mut filter: EnvFilter, directives: &str) -> Result<EnvFilter> {
    for directive in directives.split(',').filter(|directive| !directive.is_empty()) {
        filter = filter.add_directive(directive.parse()?);
    }

    Ok(filter)
}
