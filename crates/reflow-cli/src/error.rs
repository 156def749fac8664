//! Error handling for the reflow CLI.
//!
//! This module provides a hierarchical error type system using `thiserror`.
//! Each error variant is designed to be actionable and to carry enough
//! context (command, exit code, path) to be logged on its own.
//!
//! # Architecture
//!
//! - **Top-level errors** (`CliError`) represent broad categories of failures
//! - **Domain-specific errors** (`BuildError`, `HookError`, `ProcessError`) carry
//!   the details of one failed step of a reconciliation cycle
//! - **Error conversion** is automatic via `#[from]` attributes
//! - **Context helpers** allow attaching additional information to errors
//!
//! # Example
//!
//! ```rust,no_run
//! use reflow_cli::error::{Result, ResultExt};
//! use std::path::Path;
//!
//! fn read_stylesheet(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path)
//!         .with_path(path)
//!         .with_hint("Check the [styles] section of reflow.toml")
//! }
//! ```

mod report;

pub use report::cli_error_to_miette;
pub use reflow_config::ConfigError;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::dev::ProcessState;

/// Top-level CLI error type.
///
/// This is the primary error type returned by CLI commands. It automatically
/// converts from domain-specific errors via `From` implementations.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration-related errors (file not found, invalid syntax, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Compile, style or asset build failures
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// An on-change hook failed
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// Managed process lifecycle errors
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Invalid command-line arguments or options
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// File or directory not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// I/O errors from file system operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Development server errors
    #[error("Server error: {0}")]
    Server(String),

    /// File watching errors
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with custom messages
    #[error("{0}")]
    Custom(String),
}

/// Failures of the main build step of a verdict.
///
/// `Clone` so that one compile result can be shared by every verdict of a
/// batch.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// The toolchain exited with a non-zero status
    #[error("`{command}` failed{}\n{stderr}", exit_suffix(.code))]
    CompileFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The toolchain could not be started at all
    #[error("Failed to run `{command}`: {message}\n\nHint: Check app.build_command in reflow.toml")]
    ToolchainUnavailable { command: String, message: String },

    /// A style entry or one of its imports could not be bundled
    #[error("Style build failed for {}: {message}", .path.display())]
    StyleFailed { path: PathBuf, message: String },

    /// The declared asset build hook failed
    #[error("Asset build `{command}` failed{}\n{stderr}", exit_suffix(.code))]
    AssetBuildFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Failures of an on-change hook.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook ran and exited with a non-zero status
    #[error("hook `{command}` failed{}\n{stderr}", exit_suffix(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The hook could not be spawned
    #[error("failed to spawn hook `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The `build-hook` builtin was used without `dev.build_hook`
    #[error("the build-hook builtin needs dev.build_hook to be set")]
    MissingBuildHook,
}

/// Managed process lifecycle errors.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// `launch()` was called while a process is already starting or running
    #[error("managed process is already {state}; kill it before launching again")]
    AlreadyRunning { state: ProcessState },

    /// The launch command could not be spawned
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process survived the terminate signal and the forced kill
    #[error("managed process (pid {pid}) did not exit within {}ms of being killed", .waited.as_millis())]
    KillTimeout { pid: u32, waited: Duration },

    /// The health endpoint never answered with a 2xx or 3xx status
    #[error("{url} did not report healthy within {}ms", .waited.as_millis())]
    HealthTimeout { url: String, waited: Duration },

    /// The process is not running (never launched, or exited on its own)
    #[error("managed process is not running{}", exit_suffix(.code))]
    NotRunning { code: Option<i32> },
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {code})"),
        None => String::new(),
    }
}

/// Result type alias using `CliError` as the default error type.
pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Extension trait for adding context to `Result` types.
pub trait ResultExt<T> {
    /// Add a file path to the error context.
    ///
    /// A `NotFound` I/O error becomes [`CliError::FileNotFound`] for `path`.
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;

    /// Add a helpful hint to the error context.
    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T>;

    /// Prefix the error with a custom message.
    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: Into<CliError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            match err {
                CliError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                    CliError::FileNotFound(path.as_ref().to_path_buf())
                }
                other => other,
            }
        })
    }

    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}\n\nHint: {}", err, hint))
        })
    }

    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}: {}", msg, err))
        })
    }
}
