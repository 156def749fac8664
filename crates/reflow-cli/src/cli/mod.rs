//! Command-line interface definition for reflow.
//!
//! # Command Structure
//!
//! - `reflow dev` - Watch the project, rebuild and restart on change
//! - `reflow check` - Validate `reflow.toml` and print the resolved rules

mod commands;

use clap::Parser;

pub use commands::{CheckArgs, Command, DevArgs};

/// Reflow - file-change reconciliation for server-rendered apps
#[derive(Parser, Debug)]
#[command(
    name = "reflow",
    version,
    about = "Rebuild, restart and refresh on file changes",
    long_about = "Reflow watches a project tree, decides what each change implies\n\
                  (recompile the server, rerun the style pipeline, run a hook, or nothing)\n\
                  and tells connected browsers how to refresh."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    ///
    /// Shows classification verdicts, hook output and process lifecycle
    /// transitions.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    ///
    /// Outputs plain text without ANSI color codes. Useful for logging to
    /// files or systems that don't support colored terminal output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}
