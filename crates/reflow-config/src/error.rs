//! Error types for configuration validation and loading.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    // Filesystem validation errors (for CLI use)
    #[error("watch root not found: {}", path.display())]
    WatchRootNotFound { path: PathBuf },

    #[error("style entry not found: {}", path.display())]
    StyleEntryNotFound { path: PathBuf },

    // Config parsing/loading errors
    #[error("config not found (looked for {})", looked_in.display())]
    NotFound { looked_in: PathBuf },

    #[error("invalid config value for '{field}'{}", hint.as_ref().map(|h| format!(": {h}")).unwrap_or_default())]
    InvalidValue { field: String, hint: Option<String> },

    // Schema validation errors (no filesystem checks)
    #[error("{message}{}", hint.as_ref().map(|h| format!("\n\nHint: {h}")).unwrap_or_default())]
    SchemaValidation {
        message: String,
        hint: Option<String>,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn schema(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::SchemaValidation {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }
}
