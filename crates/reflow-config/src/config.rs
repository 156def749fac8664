//! Top-level configuration structure for reflow.
//!
//! This module provides [`ReflowConfig`] and its conversions from and to
//! `serde_json::Value`. For file discovery, see the `discovery` module.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dev::{AppSettings, DevSettings, StyleSettings};
use crate::error::{ConfigError, Result as ConfigResult};
use crate::watch::WatchedFileConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReflowConfig {
    #[serde(default)]
    pub dev: DevSettings,

    #[serde(default)]
    pub app: AppSettings,

    #[serde(default)]
    pub styles: StyleSettings,

    /// Declared watch rules, in declaration order. The first matching rule wins.
    #[serde(default)]
    pub watch: Vec<WatchedFileConfig>,

    /// File this configuration was loaded from, when it came from disk.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl ReflowConfig {
    /// Create from serde_json::Value (for programmatic config and tests)
    ///
    /// # Example
    ///
    /// ```
    /// use reflow_config::ReflowConfig;
    /// use serde_json::json;
    ///
    /// let value = json!({
    ///     "app": {
    ///         "build_command": "cargo build",
    ///         "launch_command": "target/debug/api"
    ///     },
    ///     "watch": [{ "pattern": "templates/**/*.html", "restart_process_only": true }]
    /// });
    ///
    /// let config = ReflowConfig::from_value(value).unwrap();
    /// assert_eq!(config.watch.len(), 1);
    /// assert!(config.watch[0].restart_process_only);
    /// ```
    pub fn from_value(value: Value) -> ConfigResult<Self> {
        serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue {
            field: "config".to_string(),
            hint: Some(e.to_string()),
        })
    }

    /// Convert to serde_json::Value
    pub fn to_value(&self) -> ConfigResult<Value> {
        serde_json::to_value(self).map_err(|e| ConfigError::InvalidValue {
            field: "config".to_string(),
            hint: Some(e.to_string()),
        })
    }

    /// Resolve the watch root against the directory the config was loaded from.
    pub fn watch_root(&self) -> PathBuf {
        let base = self
            .source
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if self.dev.watch_root.is_absolute() {
            self.dev.watch_root.clone()
        } else {
            base.join(&self.dev.watch_root)
        }
    }
}
