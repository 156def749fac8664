//! Build coordinator.
//!
//! Owns the single managed child process. The lifecycle is a tagged state
//! machine, `Stopped → Launching → Healthy → (Stopped | Launching)`, published
//! through a `watch` channel so the broadcaster can wait for readiness
//! without touching the process handle.

use async_trait::async_trait;
use reflow_config::AppSettings;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{Mutex, watch};

use crate::dev::hooks::shell_command;
use crate::error::{BuildError, ProcessError};

/// Observable lifecycle state of the managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Launching,
    Healthy,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Launching => "launching",
            ProcessState::Healthy => "healthy",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces the managed process' binary.
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn compile(&self) -> Result<(), BuildError>;
}

/// Runs `app.build_command` through the platform shell.
#[derive(Debug, Clone)]
pub struct CommandToolchain {
    root: PathBuf,
    command: String,
}

impl CommandToolchain {
    pub fn new(root: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            command: command.into(),
        }
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    async fn compile(&self) -> Result<(), BuildError> {
        let started = Instant::now();
        let output = shell_command(&self.command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BuildError::ToolchainUnavailable {
                command: self.command.clone(),
                message: e.to_string(),
            })?;

        if output.status.success() {
            tracing::info!(
                command = %self.command,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "compiled"
            );
            Ok(())
        } else {
            Err(BuildError::CompileFailed {
                command: self.command.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            })
        }
    }
}

/// The managed process as seen by the orchestrator.
#[async_trait]
pub trait ManagedApp: Send + Sync {
    /// Stop the process. Idempotent: killing a stopped process succeeds.
    async fn kill(&self) -> Result<(), ProcessError>;

    /// Run the toolchain build.
    async fn recompile(&self) -> Result<(), BuildError>;

    /// Start the binary. Fails with `AlreadyRunning` outside `Stopped`.
    async fn launch(&self) -> Result<(), ProcessError>;

    /// Poll the health endpoint until it answers 2xx or 3xx.
    async fn wait_healthy(&self) -> Result<(), ProcessError>;

    /// Subscribe to lifecycle state changes.
    fn subscribe(&self) -> watch::Receiver<ProcessState>;

    fn is_running(&self) -> bool {
        *self.subscribe().borrow() != ProcessState::Stopped
    }

    /// Launch and wait until healthy.
    async fn relaunch(&self) -> Result<(), ProcessError> {
        self.launch().await?;
        self.wait_healthy().await
    }
}

#[derive(Debug)]
enum Lifecycle {
    Stopped,
    Running { child: Child, pid: u32 },
}

/// Owns the managed child process.
pub struct BuildCoordinator {
    root: PathBuf,
    settings: AppSettings,
    toolchain: Arc<dyn Toolchain>,
    lifecycle: Mutex<Lifecycle>,
    state: watch::Sender<ProcessState>,
    http: reqwest::Client,
}

impl BuildCoordinator {
    /// Create a coordinator that compiles with `app.build_command`.
    pub fn new(root: impl Into<PathBuf>, settings: AppSettings) -> Self {
        let root = root.into();
        let toolchain = Arc::new(CommandToolchain::new(&root, settings.build_command.clone()));
        Self::with_toolchain(root, settings, toolchain)
    }

    pub fn with_toolchain(
        root: impl Into<PathBuf>,
        settings: AppSettings,
        toolchain: Arc<dyn Toolchain>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_default();
        let (state, _) = watch::channel(ProcessState::Stopped);
        Self {
            root: root.into(),
            settings,
            toolchain,
            lifecycle: Mutex::new(Lifecycle::Stopped),
            state,
            http,
        }
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ProcessState) {
        self.state.send_replace(state);
    }

    /// `Some(code)` once the child has exited on its own.
    async fn reap_exited(&self) -> Option<Option<i32>> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Lifecycle::Running { child, pid } = &mut *lifecycle else {
            return None;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::warn!(pid = *pid, code = ?status.code(), "managed process exited");
                *lifecycle = Lifecycle::Stopped;
                self.set_state(ProcessState::Stopped);
                Some(status.code())
            }
            _ => None,
        }
    }

    async fn terminate(child: &mut Child, pid: u32, grace: Duration) -> Result<(), ProcessError> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Ok(raw) = i32::try_from(pid) {
                if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                    tracing::debug!(pid, "SIGTERM failed: {e}");
                }
            }
            if let Ok(result) = tokio::time::timeout(grace, child.wait()).await {
                if let Err(e) = result {
                    tracing::debug!(pid, "wait after SIGTERM failed: {e}");
                }
                return Ok(());
            }
            tracing::warn!(pid, grace_ms = grace.as_millis() as u64, "managed process ignored SIGTERM, killing");
        }

        if child.start_kill().is_err() {
            // Already exited between the signal and the kill.
            return Ok(());
        }
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(ProcessError::KillTimeout { pid, waited: grace }),
        }
    }
}

#[async_trait]
impl ManagedApp for BuildCoordinator {
    async fn kill(&self) -> Result<(), ProcessError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Lifecycle::Running { mut child, pid } =
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        else {
            self.set_state(ProcessState::Stopped);
            return Ok(());
        };

        let started = Instant::now();
        let result = Self::terminate(&mut child, pid, self.settings.kill_grace()).await;
        match &result {
            Ok(()) => {
                tracing::debug!(pid, elapsed_ms = started.elapsed().as_millis() as u64, "managed process stopped");
                self.set_state(ProcessState::Stopped);
            }
            Err(_) => {
                // Keep the handle so a later kill can retry.
                *lifecycle = Lifecycle::Running { child, pid };
            }
        }
        result
    }

    async fn recompile(&self) -> Result<(), BuildError> {
        self.toolchain.compile().await
    }

    async fn launch(&self) -> Result<(), ProcessError> {
        self.reap_exited().await;

        let mut lifecycle = self.lifecycle.lock().await;
        if let Lifecycle::Running { .. } = &*lifecycle {
            return Err(ProcessError::AlreadyRunning {
                state: self.state(),
            });
        }

        let command = &self.settings.launch_command;
        // `exec` so the terminate signal reaches the binary, not the shell.
        let shell_line = if cfg!(unix) {
            format!("exec {command}")
        } else {
            command.clone()
        };

        let mut child = shell_command(&shell_line)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;

        let pid = child.id().unwrap_or_default();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        tracing::info!(pid, command = %command, "launched managed process");
        *lifecycle = Lifecycle::Running { child, pid };
        self.set_state(ProcessState::Launching);
        Ok(())
    }

    async fn wait_healthy(&self) -> Result<(), ProcessError> {
        match self.state() {
            ProcessState::Stopped => return Err(ProcessError::NotRunning { code: None }),
            ProcessState::Healthy => return Ok(()),
            ProcessState::Launching => {}
        }

        let Some(url) = self.settings.health_check_url.clone() else {
            self.set_state(ProcessState::Healthy);
            return Ok(());
        };

        let timeout = self.settings.health_timeout();
        let interval = self.settings.health_interval();
        let started = Instant::now();

        loop {
            if let Some(code) = self.reap_exited().await {
                return Err(ProcessError::NotRunning { code });
            }

            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() || response.status().is_redirection() => {
                    tracing::debug!(
                        url = %url,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "managed process healthy"
                    );
                    self.set_state(ProcessState::Healthy);
                    return Ok(());
                }
                Ok(response) => {
                    tracing::trace!(url = %url, status = %response.status(), "not healthy yet");
                }
                Err(e) => {
                    tracing::trace!(url = %url, "health probe failed: {e}");
                }
            }

            if started.elapsed() >= timeout {
                return Err(ProcessError::HealthTimeout {
                    url,
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }
}

async fn forward_output<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(target: "app", stream, "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(target: "app", stream, "output closed: {e}");
                break;
            }
        }
    }
}
