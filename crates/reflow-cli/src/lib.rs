//! Reflow CLI - file-change reconciliation and rebuild orchestrator.
//!
//! Watches a project tree, decides what each change implies, performs the
//! minimum rebuild work and tells connected browsers how to refresh, while a
//! single managed server process is kept running, restarted or killed.
//!
//! # Architecture
//!
//! - [`dev`] - The orchestrator core: classification, batching, hooks,
//!   process lifecycle, broadcasting, watching and the SSE server
//! - [`error`] - Error types with actionable messages
//! - [`logger`] - Structured logging with tracing
//! - [`ui`] - Terminal status lines
//! - `cli` / `commands` - Argument parsing and command implementations
//!
//! # Example
//!
//! ```rust
//! use reflow_cli::{error::Result, logger};
//!
//! fn main() -> Result<()> {
//!     logger::init_logger(false, false, false);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod dev;
pub mod error;
pub mod logger;
pub mod ui;

// Re-export commonly used types
pub use error::{BuildError, CliError, ConfigError, HookError, ProcessError, Result, ResultExt};
