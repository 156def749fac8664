use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Available reflow subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the development orchestrator
    ///
    /// Compiles and launches the managed process, watches the project and
    /// reconciles every change. Browsers connect to the SSE endpoint served
    /// on --port.
    Dev(DevArgs),

    /// Validate configuration
    ///
    /// Loads reflow.toml, checks it against the filesystem and prints the
    /// resolved settings and watch rules.
    Check(CheckArgs),
}

/// Arguments for the dev command
#[derive(Args, Debug, Clone)]
pub struct DevArgs {
    /// Path to reflow.toml
    ///
    /// Defaults to reflow.toml in the current directory.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Port for the SSE server
    ///
    /// Overrides dev.port. If the port is busy, the next free port (up to
    /// +10) is used.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Open the app in a browser once it is healthy
    #[arg(long)]
    pub open: bool,
}

/// Arguments for the check command
#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Path to reflow.toml
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
