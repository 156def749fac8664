//! Development orchestrator settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Watcher, server and pipeline settings (`[dev]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevSettings {
    #[serde(default = "default_watch_root")]
    pub watch_root: PathBuf,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Coalescing window for filesystem notifications.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Upper bound on verdicts reconciled concurrently within one batch.
    #[serde(default = "default_max_parallel_reconciles")]
    pub max_parallel_reconciles: usize,

    /// Asset build for changed files that are neither compiled source nor styles.
    /// Also what the `build-hook` builtin runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_hook: Option<String>,

    /// URL that answers 2xx while the external bundler is idle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundler_ready_url: Option<String>,

    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,

    /// Extensions (without the dot) that belong to the managed process' source.
    #[serde(default = "default_compiled_extensions")]
    pub compiled_extensions: Vec<String>,

    /// Globs (relative to the watch root) that are never reconciled.
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

impl Default for DevSettings {
    fn default() -> Self {
        Self {
            watch_root: default_watch_root(),
            port: default_port(),
            debounce_ms: default_debounce_ms(),
            max_parallel_reconciles: default_max_parallel_reconciles(),
            build_hook: None,
            bundler_ready_url: None,
            readiness_timeout_ms: default_readiness_timeout_ms(),
            compiled_extensions: default_compiled_extensions(),
            ignore: default_ignore(),
        }
    }
}

impl DevSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }
}

/// The managed backend process (`[app]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppSettings {
    /// Toolchain invocation that produces the binary, e.g. `cargo build --bin api`.
    #[serde(default)]
    pub build_command: String,

    /// Command that starts the already-built binary.
    #[serde(default)]
    pub launch_command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,

    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,

    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,

    /// Time between the terminate signal and a forced kill.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            build_command: String::new(),
            launch_command: String::new(),
            health_check_url: None,
            health_timeout_ms: default_health_timeout_ms(),
            health_interval_ms: default_health_interval_ms(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

impl AppSettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Style entries (`[styles]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StyleSettings {
    /// Inlined into pages; pushed to clients base64-encoded on hot swap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_entry: Option<PathBuf>,

    /// Served as a linked stylesheet under `public_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_critical_entry: Option<PathBuf>,

    #[serde(default = "default_style_public_path")]
    pub public_path: String,
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            critical_entry: None,
            non_critical_entry: None,
            public_path: default_style_public_path(),
        }
    }
}

impl StyleSettings {
    pub fn entries(&self) -> impl Iterator<Item = &PathBuf> {
        self.critical_entry
            .iter()
            .chain(self.non_critical_entry.iter())
    }
}

fn default_watch_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_port() -> u16 {
    3000
}

fn default_debounce_ms() -> u64 {
    30
}

fn default_max_parallel_reconciles() -> usize {
    4
}

fn default_readiness_timeout_ms() -> u64 {
    15_000
}

fn default_compiled_extensions() -> Vec<String> {
    vec!["rs".into()]
}

fn default_ignore() -> Vec<String> {
    vec![
        "**/.git/**".into(),
        "**/node_modules/**".into(),
        "**/target/**".into(),
    ]
}

fn default_health_timeout_ms() -> u64 {
    10_000
}

fn default_health_interval_ms() -> u64 {
    50
}

fn default_kill_grace_ms() -> u64 {
    3_000
}

fn default_style_public_path() -> String {
    "/__reflow/styles".into()
}
