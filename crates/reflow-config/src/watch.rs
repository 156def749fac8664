//! Watched-file rules and their on-change hooks.
//!
//! A [`WatchedFileConfig`] pairs a glob pattern (relative to the watch root)
//! with behaviour flags and an ordered list of [`OnChangeHook`]s. Rules are
//! immutable once loaded; a change to the config file replaces the whole
//! table.

use serde::{Deserialize, Serialize};

/// When a hook runs relative to the main build step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookStrategy {
    /// Sequentially, before the build. A failure aborts the cycle.
    #[default]
    Pre,
    /// In parallel with the build; both must succeed.
    Concurrent,
    /// Detached. Nothing waits for it and its outcome is only logged.
    ConcurrentNoWait,
    /// Sequentially, after the build and all concurrent hooks.
    Post,
}

impl HookStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            HookStrategy::Pre => "pre",
            HookStrategy::Concurrent => "concurrent",
            HookStrategy::ConcurrentNoWait => "concurrent-no-wait",
            HookStrategy::Post => "post",
        }
    }
}

impl std::fmt::Display for HookStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reserved hook actions that are not shell commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Builtin {
    /// Run the declared `dev.build_hook` command.
    BuildHook,
    /// Tear everything down and restart the orchestrator.
    FullReset,
}

/// What a hook does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookCommand {
    Shell(String),
    BuildHook,
    FullReset,
}

impl HookCommand {
    pub fn is_full_reset(&self) -> bool {
        matches!(self, HookCommand::FullReset)
    }
}

impl std::fmt::Display for HookCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookCommand::Shell(cmd) => f.write_str(cmd),
            HookCommand::BuildHook => f.write_str("<build-hook>"),
            HookCommand::FullReset => f.write_str("<full-reset>"),
        }
    }
}

/// One entry of a rule's `on_change` list.
///
/// In TOML a hook names exactly one of `command` or `builtin`:
///
/// ```toml
/// on_change = [
///     { command = "sqlc generate", strategy = "pre" },
///     { builtin = "build-hook", strategy = "concurrent", exclude = ["**/*.gen.ts"] },
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHook", into = "RawHook")]
pub struct OnChangeHook {
    pub command: HookCommand,
    pub strategy: HookStrategy,
    /// Globs (relative to the watch root) for which this hook is skipped.
    pub exclude: Vec<String>,
}

impl OnChangeHook {
    pub fn shell(command: impl Into<String>, strategy: HookStrategy) -> Self {
        Self {
            command: HookCommand::Shell(command.into()),
            strategy,
            exclude: Vec::new(),
        }
    }

    pub fn builtin(builtin: Builtin, strategy: HookStrategy) -> Self {
        let command = match builtin {
            Builtin::BuildHook => HookCommand::BuildHook,
            Builtin::FullReset => HookCommand::FullReset,
        };
        Self {
            command,
            strategy,
            exclude: Vec::new(),
        }
    }

    pub fn with_exclude(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    builtin: Option<Builtin>,
    #[serde(default)]
    strategy: HookStrategy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    exclude: Vec<String>,
}

impl TryFrom<RawHook> for OnChangeHook {
    type Error = String;

    fn try_from(raw: RawHook) -> Result<Self, Self::Error> {
        let command = match (raw.command, raw.builtin) {
            (Some(cmd), None) if cmd.trim().is_empty() => {
                return Err("hook command cannot be empty".to_string());
            }
            (Some(cmd), None) => HookCommand::Shell(cmd),
            (None, Some(Builtin::BuildHook)) => HookCommand::BuildHook,
            (None, Some(Builtin::FullReset)) => HookCommand::FullReset,
            (Some(_), Some(_)) => {
                return Err("a hook takes either `command` or `builtin`, not both".to_string());
            }
            (None, None) => return Err("a hook needs a `command` or a `builtin`".to_string()),
        };

        Ok(Self {
            command,
            strategy: raw.strategy,
            exclude: raw.exclude,
        })
    }
}

impl From<OnChangeHook> for RawHook {
    fn from(hook: OnChangeHook) -> Self {
        let (command, builtin) = match hook.command {
            HookCommand::Shell(cmd) => (Some(cmd), None),
            HookCommand::BuildHook => (None, Some(Builtin::BuildHook)),
            HookCommand::FullReset => (None, Some(Builtin::FullReset)),
        };
        Self {
            command,
            builtin,
            strategy: hook.strategy,
            exclude: hook.exclude,
        }
    }
}

/// A declared watch rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchedFileConfig {
    /// Glob relative to the watch root, e.g. `templates/**/*.html`.
    pub pattern: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_change: Vec<OnChangeHook>,

    /// Rebuild the managed process binary even though the file is not compiled source.
    #[serde(default)]
    pub recompile_main_process: bool,

    /// Restart the managed process without recompiling it.
    #[serde(default)]
    pub restart_process_only: bool,

    /// Ask clients to run their revalidation callback instead of reloading.
    #[serde(default)]
    pub only_run_client_revalidate: bool,

    /// Run `pre` hooks and stop: no build, restart or refresh.
    #[serde(default)]
    pub run_hooks_only: bool,

    /// Suppress the "rebuilding" notice for this rule.
    #[serde(default)]
    pub skip_client_notification: bool,

    /// Treat matching files as plain assets even if their extension is compiled.
    #[serde(default)]
    pub treat_source_as_non_compiled: bool,
}

impl WatchedFileConfig {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    pub fn with_hook(mut self, hook: OnChangeHook) -> Self {
        self.on_change.push(hook);
        self
    }

    /// Whether a change under this rule ends with the managed process being restarted.
    pub fn needs_process_restart(&self) -> bool {
        self.recompile_main_process || self.restart_process_only
    }

    pub fn triggers_full_reset(&self) -> bool {
        self.on_change.iter().any(|h| h.command.is_full_reset())
    }

    /// Hooks declared with the given strategy, in declaration order.
    pub fn hooks(&self, strategy: HookStrategy) -> impl Iterator<Item = &OnChangeHook> {
        self.on_change.iter().filter(move |h| h.strategy == strategy)
    }
}
