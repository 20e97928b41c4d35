//! Common logger configuration for the simulator binaries.

// Enforce disallowed methods clippy lint
#![deny(clippy::disallowed_methods)]

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    filter::Targets,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

/// The filter string was not valid `tracing` Targets syntax.
#[derive(Debug, thiserror::Error)]
#[error("Invalid log level / filter: '{0}'")]
pub struct InvalidLogFilter(String);

/// Use this to initialize the global logger in tests. Set `RUST_LOG` to
/// see a test's planner and probe logs.
pub fn init_for_testing() {
    // Quickly skip logger setup if no env var set.
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }

    // Don't panic if there's already a logger setup. Multiple tests might try
    // setting the global logger.
    let _ = try_init();
}

/// Try to initialize a global `tracing` logger.
///
/// + The logger will print enabled `tracing` events and spans to stdout.
/// + The default log level includes INFO, WARN, and ERROR events.
/// + You can change the log level or module filtering with an appropriate
///   `RUST_LOG` env var set. Read more about the syntax here:
///   <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html>
///
/// Will return an `Err` if there is another global logger already set.
pub fn try_init() -> Result<(), TryInitError> {
    // Defaults to INFO logs if no `RUST_LOG` env var is set or we can't parse
    // the targets filter.
    let rust_log_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|rust_log| Targets::from_str(&rust_log).ok())
        .unwrap_or_else(|| Targets::new().with_default(Level::INFO));

    try_init_with_targets(rust_log_filter)
}

/// Initialize a global logger with an explicit filter string, e.g. a
/// `--log-level` CLI option. Unlike [`try_init`], an unparseable filter is
/// a misconfiguration surfaced to the caller, not silently defaulted.
pub fn try_init_with_filter(filter: &str) -> anyhow::Result<()> {
    let targets = Targets::from_str(filter)
        .map_err(|_| InvalidLogFilter(filter.to_owned()))?;
    try_init_with_targets(targets)?;
    Ok(())
}

fn try_init_with_targets(targets: Targets) -> Result<(), TryInitError> {
    let stdout_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_target(true)
        // Enable colored outputs for stdout.
        .with_ansi(true)
        .with_filter(targets);

    tracing_subscriber::registry().with(stdout_log).try_init()
}
