//! Miette diagnostic conversion for CLI errors.

use crate::error::{BuildError, CliError, ConfigError};
use miette::Report;

/// Convert CliError to miette Report
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Build(e) => build_error_to_miette(e),
        CliError::Config(e) => config_error_to_miette(e),
        CliError::Process(e) => miette::miette!("Managed process error: {}", e),
        _ => miette::miette!("{}", err),
    }
}

fn config_error_to_miette(err: ConfigError) -> Report {
    match err {
        ConfigError::NotFound { looked_in } => miette::miette!(
            "No reflow.toml found in {}\n\nHint: Create one or pass --config <path>",
            looked_in.display()
        ),
        other => miette::miette!("Configuration error: {}", other),
    }
}

/// Convert BuildError to miette Report
pub fn build_error_to_miette(err: BuildError) -> Report {
    match err {
        BuildError::CompileFailed {
            command,
            code,
            stderr,
        } => {
            let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            miette::miette!("Compile failed ({}): {}\n\n{}", code, command, stderr.trim_end())
        }
        BuildError::StyleFailed { path, message } => {
            miette::miette!(
                "Style build failed in {}: {}\n\nHint: Check @import paths relative to the importing file",
                path.display(),
                message
            )
        }
        _ => miette::miette!("{}", err),
    }
}
