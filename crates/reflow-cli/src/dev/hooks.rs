//! On-change hooks.
//!
//! [`HookExecutor`] runs a single hook; the functions below schedule a
//! verdict's hooks by strategy: detached no-wait hooks, sequential `pre` and
//! `post` hooks, and `concurrent` hooks that run alongside the main build.

use async_trait::async_trait;
use reflow_config::{HookCommand, HookStrategy, OnChangeHook};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::task::JoinSet;

use crate::error::HookError;

/// Environment variable holding the changed path, relative to the watch root.
pub const CHANGED_PATH_ENV: &str = "REFLOW_CHANGED_PATH";

/// Environment variable holding the hook's strategy.
pub const STRATEGY_ENV: &str = "REFLOW_STRATEGY";

/// Why a hook is being run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInvocation {
    /// Changed path relative to the watch root.
    pub changed_path: PathBuf,
    pub strategy: HookStrategy,
}

/// Runs one hook to completion.
#[async_trait]
pub trait HookExecutor: Send + Sync {
    async fn run(&self, command: &HookCommand, invocation: &HookInvocation) -> Result<(), HookError>;
}

/// Build a platform shell invocation of `command`.
pub(crate) fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Runs hooks through the platform shell in the watch root.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    root: PathBuf,
    build_hook: Option<String>,
}

impl ShellExecutor {
    /// # Arguments
    ///
    /// * `root` - Working directory of every hook
    /// * `build_hook` - Command run by the `build-hook` builtin
    pub fn new(root: impl Into<PathBuf>, build_hook: Option<String>) -> Self {
        Self {
            root: root.into(),
            build_hook,
        }
    }

    fn resolve<'a>(&'a self, command: &'a HookCommand) -> Result<Option<&'a str>, HookError> {
        match command {
            HookCommand::Shell(cmd) => Ok(Some(cmd)),
            HookCommand::BuildHook => self
                .build_hook
                .as_deref()
                .map(Some)
                .ok_or(HookError::MissingBuildHook),
            HookCommand::FullReset => Ok(None),
        }
    }
}

#[async_trait]
impl HookExecutor for ShellExecutor {
    async fn run(&self, command: &HookCommand, invocation: &HookInvocation) -> Result<(), HookError> {
        let Some(command) = self.resolve(command)? else {
            return Ok(());
        };

        tracing::debug!(command, path = %invocation.changed_path.display(), strategy = %invocation.strategy, "running hook");

        let output = shell_command(command)
            .current_dir(&self.root)
            .env(CHANGED_PATH_ENV, &invocation.changed_path)
            .env(STRATEGY_ENV, invocation.strategy.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| HookError::Spawn {
                command: command.to_string(),
                source,
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::debug!(command, "{line}");
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(HookError::Failed {
                command: command.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            })
        }
    }
}

fn invocation(relative: &Path, strategy: HookStrategy) -> HookInvocation {
    HookInvocation {
        changed_path: relative.to_path_buf(),
        strategy,
    }
}

/// Spawn `ConcurrentNoWait` hooks. Nothing waits for them; failures are logged.
pub fn spawn_detached(executor: &Arc<dyn HookExecutor>, hooks: &[OnChangeHook], relative: &Path) {
    for hook in hooks {
        let executor = Arc::clone(executor);
        let command = hook.command.clone();
        let invocation = invocation(relative, HookStrategy::ConcurrentNoWait);
        tokio::spawn(async move {
            if let Err(e) = executor.run(&command, &invocation).await {
                tracing::error!(
                    path = %invocation.changed_path.display(),
                    "detached hook failed: {e}"
                );
            }
        });
    }
}

/// Run hooks one after another; the first failure stops the rest.
pub async fn run_sequential(
    executor: &Arc<dyn HookExecutor>,
    hooks: &[OnChangeHook],
    relative: &Path,
    strategy: HookStrategy,
) -> Result<(), HookError> {
    let invocation = invocation(relative, strategy);
    for hook in hooks {
        executor.run(&hook.command, &invocation).await?;
    }
    Ok(())
}

/// Run hooks in parallel and wait for all of them.
///
/// Running hooks are not cancelled when one fails; the first failure is
/// returned once all have finished.
pub async fn run_concurrent(
    executor: &Arc<dyn HookExecutor>,
    hooks: &[OnChangeHook],
    relative: &Path,
) -> Result<(), HookError> {
    let mut set = JoinSet::new();
    for hook in hooks {
        let executor = Arc::clone(executor);
        let command = hook.command.clone();
        let invocation = invocation(relative, HookStrategy::Concurrent);
        set.spawn(async move { executor.run(&command, &invocation).await });
    }

    let mut first_error = None;
    while let Some(joined) = set.join_next().await {
        let result = joined.unwrap_or_else(|e| {
            Err(HookError::Failed {
                command: "<concurrent hook>".to_string(),
                code: None,
                stderr: e.to_string(),
            })
        });
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn invocation_for(path: &str) -> HookInvocation {
        HookInvocation {
            changed_path: PathBuf::from(path),
            strategy: HookStrategy::Pre,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_hook_sees_environment() {
        let dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new(dir.path(), None);
        let cmd = HookCommand::Shell(
            "printf '%s %s' \"$REFLOW_CHANGED_PATH\" \"$REFLOW_STRATEGY\" > out.txt".into(),
        );
        executor
            .run(&cmd, &invocation_for("schema/users.sql"))
            .await
            .unwrap();
        let out = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(out, "schema/users.sql pre");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_hook_failure_captures_code_and_stderr() {
        let dir = TempDir::new().unwrap();
        let executor = ShellExecutor::new(dir.path(), None);
        let cmd = HookCommand::Shell("echo boom >&2; exit 3".into());
        let err = executor.run(&cmd, &invocation_for("a")).await.unwrap_err();
        match err {
            HookError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_build_hook_requires_command() {
        let executor = ShellExecutor::new(".", None);
        let err = executor
            .run(&HookCommand::BuildHook, &invocation_for("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::MissingBuildHook));
    }

    #[tokio::test]
    async fn test_full_reset_is_a_no_op_for_the_executor() {
        let executor = ShellExecutor::new(".", None);
        executor
            .run(&HookCommand::FullReset, &invocation_for("a"))
            .await
            .unwrap();
    }
}
