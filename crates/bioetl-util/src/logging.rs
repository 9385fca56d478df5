//! Logging initialization for the bioetl CLI.
//!
//! Structured logging via `tracing`. Compact human-readable format by
//! default; verbose format adds targets and span close events with
//! `run_id`, `source`, and `stage` fields attached by callers.

use std::io::IsTerminal;

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Environment variable consulted for the log filter before `RUST_LOG`.
pub const LOG_ENV: &str = "BIOETL_LOG";

fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initialize the global tracing subscriber.
///
/// Filter precedence: `BIOETL_LOG`, then `RUST_LOG`, then a built-in default
/// (`bioetl=debug,info` when verbose, `bioetl=info,warn` otherwise).
/// Logs go to stderr; stdout is reserved for command output.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("bioetl=debug,info")
            } else {
                EnvFilter::try_new("bioetl=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(use_color())
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_ansi(use_color())
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}
