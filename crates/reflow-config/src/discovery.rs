//! File-based config discovery for CLI use
//!
//! Finds `reflow.toml` and layers it over the built-in defaults, with
//! `REFLOW_<SECTION>__<KEY>` environment variables on top.

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Toml},
};

use crate::config::ReflowConfig;
use crate::error::{ConfigError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "reflow.toml";

/// File-based configuration discovery
///
/// # Example
///
/// ```no_run
/// use reflow_config::ConfigDiscovery;
///
/// let discovery = ConfigDiscovery::new(".");
/// let config = discovery.load().unwrap();
/// ```
pub struct ConfigDiscovery {
    root: PathBuf,
}

impl ConfigDiscovery {
    /// Create a new config discovery with a root directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Find the config file in the root directory
    pub fn find(&self) -> Option<PathBuf> {
        let path = self.root.join(DEFAULT_CONFIG_FILE);
        path.is_file().then_some(path)
    }

    /// Load config from the discovered file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if no config file is found.
    pub fn load(&self) -> Result<ReflowConfig> {
        let path = self.find().ok_or_else(|| ConfigError::NotFound {
            looked_in: self.root.clone(),
        })?;
        Self::load_from(&path)
    }

    /// Load config from a specific file path
    pub fn load_from(path: &Path) -> Result<ReflowConfig> {
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                looked_in: path.to_path_buf(),
            });
        }

        let mut config: ReflowConfig = Figment::from(Serialized::defaults(ReflowConfig::default()))
            .merge(Toml::file(path))
            .merge(
                Env::prefixed("REFLOW_")
                    .split("__")
                    .filter(|key| matches!(key.as_str().split('.').next(), Some("dev" | "app" | "styles"))),
            )
            .extract()
            .map_err(|e| ConfigError::InvalidValue {
                field: "configuration".to_string(),
                hint: Some(format!("{} ({})", e, path.display())),
            })?;

        // Absolute so that the config-file short-circuit can compare cleaned paths.
        let source = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        tracing::debug!(path = %source.display(), rules = config.watch.len(), "loaded config");
        config.source = Some(source);
        Ok(config)
    }
}

/// Discover and load config from the current directory (convenience function)
pub fn discover() -> Result<ReflowConfig> {
    let root = std::env::current_dir()?;
    ConfigDiscovery::new(&root).load()
}
