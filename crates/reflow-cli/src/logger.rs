//! Logging infrastructure for the reflow CLI.
//!
//! Structured logging via `tracing`. Output of the managed process is
//! forwarded through the same subscriber with `target = "app"`, so it shares
//! the filter and formatting of reflow's own events.
//!
//! # Example
//!
//! ```rust,no_run
//! use reflow_cli::logger::init_logger;
//!
//! init_logger(false, false, false);
//! tracing::info!(path = "src/main.rs", "reconciling");
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used with `--verbose`.
pub const VERBOSE_FILTER: &str = "reflow=debug,reflow_cli=debug,reflow_config=debug,app=info";

/// Filter used with `--quiet`.
pub const QUIET_FILTER: &str = "reflow=error,reflow_cli=error,reflow_config=error,app=error";

/// Filter used when neither flag nor `RUST_LOG` is given.
pub const DEFAULT_FILTER: &str = "reflow=info,reflow_cli=info,reflow_config=info,app=info";

/// Initialize the tracing subscriber with the specified options.
///
/// Should be called once at the start of the program, before any logging
/// occurs.
///
/// # Arguments
///
/// * `verbose` - Enable debug-level logging (overrides `quiet`)
/// * `quiet` - Only show error-level logs
/// * `no_color` - Disable colored output
///
/// # Verbosity Levels
///
/// 1. `--verbose` flag: DEBUG for reflow crates
/// 2. `--quiet` flag: ERROR only
/// 3. `RUST_LOG` environment variable: custom filter
/// 4. Default: INFO for reflow crates and the managed process
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    init_logger_with_filter(filter_for(verbose, quiet), no_color);
}

/// Initialize logger with custom environment filter.
pub fn init_logger_with_filter(filter: EnvFilter, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color && should_use_colors())
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Check if colored output should be enabled.
///
/// `NO_COLOR` disables colors, `FORCE_COLOR` forces them, otherwise the
/// terminal capabilities decide.
pub fn should_use_colors() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    console::Term::stderr().features().colors_supported()
}
