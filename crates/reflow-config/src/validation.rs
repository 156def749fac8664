//! Pluggable config validation strategies
//!
//! Separates filesystem validation (for CLI use) from schema validation (for library use).

use std::path::{Path, PathBuf};

use globset::Glob;

use crate::config::ReflowConfig;
use crate::error::{ConfigError, Result};
use crate::watch::{HookCommand, HookStrategy};

/// Trait for pluggable config validation strategies
pub trait ConfigValidator {
    fn validate(&self, config: &ReflowConfig) -> Result<()>;
}

/// Schema-only validation (no filesystem checks)
///
/// # Example
///
/// ```
/// use reflow_config::{ReflowConfig, SchemaValidator, ConfigValidator};
///
/// let mut config = ReflowConfig::default();
/// config.app.build_command = "cargo build".into();
/// config.app.launch_command = "target/debug/api".into();
///
/// SchemaValidator.validate(&config).unwrap();
/// ```
pub struct SchemaValidator;

impl ConfigValidator for SchemaValidator {
    fn validate(&self, config: &ReflowConfig) -> Result<()> {
        if config.app.build_command.trim().is_empty() {
            return Err(ConfigError::schema(
                "app.build_command cannot be empty",
                "Set the command that compiles the managed process, e.g. `cargo build --bin api`",
            ));
        }
        if config.app.launch_command.trim().is_empty() {
            return Err(ConfigError::schema(
                "app.launch_command cannot be empty",
                "Set the command that starts the built binary, e.g. `target/debug/api`",
            ));
        }

        if config.dev.max_parallel_reconciles == 0 {
            return Err(ConfigError::schema(
                "dev.max_parallel_reconciles must be at least 1",
                "Use 1 to reconcile changed files one at a time",
            ));
        }
        if config.dev.debounce_ms > 5_000 {
            return Err(ConfigError::schema(
                format!("dev.debounce_ms {} is out of range (0 to 5000)", config.dev.debounce_ms),
                "Values between 20 and 200 work well for most editors",
            ));
        }

        for pattern in &config.dev.ignore {
            check_glob("dev.ignore", pattern)?;
        }

        for (index, rule) in config.watch.iter().enumerate() {
            let field = format!("watch[{index}]");
            check_glob(&field, &rule.pattern)?;

            if rule.recompile_main_process && rule.restart_process_only {
                return Err(ConfigError::schema(
                    format!("{field} ({}) sets both recompile_main_process and restart_process_only", rule.pattern),
                    "Recompiling already restarts the process; keep one of the two",
                ));
            }

            if rule.run_hooks_only {
                if rule.on_change.is_empty() {
                    return Err(ConfigError::schema(
                        format!("{field} ({}) sets run_hooks_only but declares no hooks", rule.pattern),
                        "Add at least one `pre` hook to on_change",
                    ));
                }
                if rule.on_change.iter().any(|h| h.strategy != HookStrategy::Pre) {
                    return Err(ConfigError::schema(
                        format!("{field} ({}) sets run_hooks_only with non-pre hooks", rule.pattern),
                        "Hooks of a run_hooks_only rule must use strategy = \"pre\"",
                    ));
                }
                if rule.only_run_client_revalidate {
                    return Err(ConfigError::schema(
                        format!(
                            "{field} ({}) sets both run_hooks_only and only_run_client_revalidate",
                            rule.pattern
                        ),
                        "run_hooks_only never notifies clients",
                    ));
                }
            }

            for hook in &rule.on_change {
                if hook.command == HookCommand::BuildHook && config.dev.build_hook.is_none() {
                    return Err(ConfigError::schema(
                        format!("{field} ({}) uses the build-hook builtin", rule.pattern),
                        "Declare dev.build_hook or replace the builtin with a command",
                    ));
                }
                for pattern in &hook.exclude {
                    check_glob(&format!("{field}.on_change.exclude"), pattern)?;
                }
            }
        }

        Ok(())
    }
}

fn check_glob(field: &str, pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(ConfigError::schema(
            format!("{field} contains an empty pattern"),
            "Remove empty strings from the pattern list",
        ));
    }
    Glob::new(pattern).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        hint: Some(format!("invalid glob '{pattern}': {e}")),
    })?;
    Ok(())
}

/// Filesystem validator (for CLI use)
///
/// Runs schema validation, then checks that the watch root and the declared
/// style entries exist.
pub struct FsValidator {
    root: PathBuf,
}

impl FsValidator {
    /// Create a new filesystem validator; `root` is the resolved watch root.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl ConfigValidator for FsValidator {
    fn validate(&self, config: &ReflowConfig) -> Result<()> {
        SchemaValidator.validate(config)?;

        if !self.root.is_dir() {
            return Err(ConfigError::WatchRootNotFound {
                path: self.root.clone(),
            });
        }

        for entry in config.styles.entries() {
            let path = self.root.join(entry);
            if !path.is_file() {
                return Err(ConfigError::StyleEntryNotFound { path });
            }
        }

        Ok(())
    }
}

/// Convenience function for schema-only validation
pub fn validate_schema(config: &ReflowConfig) -> Result<()> {
    SchemaValidator.validate(config)
}

/// Convenience function for filesystem validation
pub fn validate_fs(config: &ReflowConfig, root: impl AsRef<Path>) -> Result<()> {
    FsValidator::new(root).validate(config)
}
