//! Terminal UI utilities for status lines.
//!
//! User-facing lines (startup banner, "watching...", restart notices) go
//! through these helpers; everything else is a `tracing` event.
//!
//! # Examples
//!
//! ```no_run
//! use reflow_cli::ui;
//!
//! ui::init_colors(false);
//! ui::info("Watching for changes...");
//! ui::success("Managed process healthy");
//! ```

mod format;
mod messages;

pub use format::format_duration;
pub use messages::{error, info, success, warning};

/// Check if color output should be enabled.
///
/// Respects NO_COLOR and FORCE_COLOR environment variables, falls back to
/// terminal capability detection.
pub fn should_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }

    console::user_attended_stderr()
}

/// Initialize color support based on environment.
///
/// `owo-colors` is told whether to emit escape codes; `--no-color` wins over
/// the environment.
pub fn init_colors(no_color: bool) {
    let enabled = !no_color && should_use_color();
    owo_colors::set_override(enabled);
}
