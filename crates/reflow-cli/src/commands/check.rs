//! Check command implementation.
//!
//! Validates configuration without starting a session and prints what the
//! orchestrator would do with it.

use reflow_config::{ConfigDiscovery, ConfigError, ReflowConfig, WatchedFileConfig, validate_fs};
use std::path::Path;

use crate::cli::CheckArgs;
use crate::error::Result;
use crate::ui;

/// Execute the check command.
///
/// # Validation Steps
///
/// 1. Load reflow.toml (given or discovered)
/// 2. Validate schema rules and the filesystem (watch root, style entries)
/// 3. Print resolved settings and every watch rule with its hooks
///
/// # Errors
///
/// Returns errors for a missing or invalid configuration.
pub async fn execute(args: CheckArgs) -> Result<()> {
    ui::info("Checking configuration...");

    let config = match &args.config {
        Some(path) => ConfigDiscovery::load_from(path)?,
        None => {
            let cwd = std::env::current_dir()?;
            let path = ConfigDiscovery::new(&cwd)
                .find()
                .ok_or(ConfigError::NotFound { looked_in: cwd })?;
            ConfigDiscovery::load_from(&path)?
        }
    };

    let root = path_clean::clean(config.watch_root());
    validate_fs(&config, &root)?;
    ui::success("Configuration is valid!");

    for line in describe(&config, &root) {
        println!("{line}");
    }
    Ok(())
}

/// Human-readable summary of the resolved configuration.
fn describe(config: &ReflowConfig, root: &Path) -> Vec<String> {
    let mut lines = vec![
        format!("watch root:    {}", root.display()),
        format!("build:         {}", config.app.build_command),
        format!("launch:        {}", config.app.launch_command),
        format!(
            "health check:  {}",
            config.app.health_check_url.as_deref().unwrap_or("(none)")
        ),
        format!(
            "compiled:      {}",
            config
                .dev
                .compiled_extensions
                .iter()
                .map(|ext| format!(".{}", ext.trim_start_matches('.')))
                .collect::<Vec<_>>()
                .join(" ")
        ),
        format!("debounce:      {}ms", config.dev.debounce_ms),
        format!("workers:       {}", config.dev.max_parallel_reconciles),
    ];

    for entry in config.styles.entries() {
        lines.push(format!("style entry:   {}", entry.display()));
    }

    if config.watch.is_empty() {
        lines.push("rules:         (none, compiled sources only)".to_string());
    } else {
        lines.push("rules:".to_string());
        for (index, rule) in config.watch.iter().enumerate() {
            lines.push(format!("  [{index}] {}{}", rule.pattern, flags(rule)));
            for hook in &rule.on_change {
                let exclude = if hook.exclude.is_empty() {
                    String::new()
                } else {
                    format!(" (except {})", hook.exclude.join(", "))
                };
                lines.push(format!("      {:<18} {}{}", hook.strategy, hook.command, exclude));
            }
        }
    }
    lines
}

fn flags(rule: &WatchedFileConfig) -> String {
    let flags: Vec<&str> = [
        (rule.recompile_main_process, "recompile"),
        (rule.restart_process_only, "restart"),
        (rule.only_run_client_revalidate, "revalidate"),
        (rule.run_hooks_only, "hooks-only"),
        (rule.skip_client_notification, "quiet"),
        (rule.treat_source_as_non_compiled, "non-compiled"),
    ]
    .into_iter()
    .filter_map(|(set, name)| set.then_some(name))
    .collect();

    if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    }
}
