//! Reflow CLI entry point.
//!
//! Parses arguments, initializes logging and colors and dispatches to the
//! command.

use clap::Parser;
use miette::Result;
use reflow_cli::{cli, commands, error, logger, ui};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.verbose, args.quiet, args.no_color);
    ui::init_colors(args.no_color);

    let result = match args.command {
        cli::Command::Dev(dev_args) => commands::dev_execute(dev_args).await,
        cli::Command::Check(check_args) => commands::check_execute(check_args).await,
    };

    // Convert CLI errors to miette diagnostics for readable error reporting
    result.map_err(error::cli_error_to_miette)
}
