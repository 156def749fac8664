//! Reconciliation cycle.
//!
//! One debounce tick of raw events goes in; hooks, builds, restarts and
//! refresh messages come out. A batch holding a single verdict is reconciled
//! on its own and sends its own refresh message. A batch holding several
//! verdicts announces `Rebuilding` once, kills the managed process while the
//! verdicts build (when any of them needs a restart), relaunches once and
//! finishes with a single `HardReload`.

use reflow_config::{HookCommand, HookStrategy, OnChangeHook, ReflowConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::dev::RefreshMessage;
use crate::dev::batch::EventBatch;
use crate::dev::broadcaster::{BroadcastOptions, Broadcaster, Delivery};
use crate::dev::classifier::{Classification, EventClassifier, Verdict};
use crate::dev::context::ReconciliationContext;
use crate::dev::coordinator::ManagedApp;
use crate::dev::event::RawEvent;
use crate::dev::hooks::{self, HookExecutor, HookInvocation};
use crate::dev::registry::WatchRegistry;
use crate::dev::style::{StylePayload, StyleSubsystem};
use crate::dev::watcher::WatchSet;
use crate::error::{BuildError, HookError, Result};

/// Everything a cycle talks to outside of classification.
#[derive(Clone)]
pub struct Collaborators {
    pub app: Arc<dyn ManagedApp>,
    pub hooks: Arc<dyn HookExecutor>,
    pub styles: Arc<dyn StyleSubsystem>,
    pub broadcaster: Arc<Broadcaster>,
}

/// Why the session has to be torn down and rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// The configuration file was written.
    ConfigChanged,
    /// A rule with the full-reset builtin matched `path`.
    FullReset { path: PathBuf },
}

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to do (empty or permission-only batch).
    Idle,
    Reconciled { verdicts: usize },
    /// Some verdicts (or the batch restart) failed; no success message was sent.
    Failed { verdicts: usize, failures: usize },
    /// The caller must perform a full restart. No verdict was reconciled.
    RestartRequested(RestartReason),
}

/// Runs reconciliation cycles for one configuration generation.
pub struct Orchestrator {
    classifier: EventClassifier,
    collaborators: Collaborators,
    build_hook: Option<String>,
    restart_gate: Arc<Mutex<()>>,
    max_parallel: usize,
}

impl Orchestrator {
    /// # Arguments
    ///
    /// * `config` - Loaded configuration; its `source` is the config path
    /// * `root` - Absolute watch root
    /// * `collaborators` - Process, hooks, styles and browser channel
    pub fn new(
        config: &ReflowConfig,
        root: impl Into<PathBuf>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let root = path_clean::clean(root.into());
        let registry = Arc::new(WatchRegistry::new(config, &root)?);
        let classifier = EventClassifier::new(
            registry,
            config.source.clone(),
            Arc::clone(&collaborators.styles),
        );

        Ok(Self {
            classifier,
            collaborators,
            build_hook: config.dev.build_hook.clone(),
            restart_gate: Arc::new(Mutex::new(())),
            max_parallel: config.dev.max_parallel_reconciles.max(1),
        })
    }

    pub fn registry(&self) -> &WatchRegistry {
        self.classifier.registry()
    }

    /// Classify and reconcile one tick of raw events.
    pub async fn handle_batch(
        self: &Arc<Self>,
        events: Vec<RawEvent>,
        watch_set: &dyn WatchSet,
    ) -> CycleOutcome {
        let mut verdicts = Vec::with_capacity(events.len());
        for event in &events {
            match self.classifier.classify(event) {
                Classification::ConfigChanged => {
                    tracing::info!(path = %event.path.display(), "configuration changed");
                    return CycleOutcome::RestartRequested(RestartReason::ConfigChanged);
                }
                Classification::AddDirectory(dir) => {
                    tracing::debug!(path = %dir.display(), "watching new directory");
                    if let Err(e) = watch_set.add_directory(&dir) {
                        tracing::warn!(path = %dir.display(), "failed to watch directory: {e}");
                    }
                }
                Classification::Verdict(verdict) => verdicts.push(verdict),
            }
        }

        let batch = EventBatch::from_verdicts(verdicts);
        if batch.is_noop() {
            if !batch.is_empty() {
                tracing::trace!(events = batch.len(), "permission-only changes, skipping");
            }
            return CycleOutcome::Idle;
        }

        if let Some(trigger) = batch.full_reset_trigger() {
            tracing::info!(path = %self.display_path(&trigger.path), "full reset requested");
            return CycleOutcome::RestartRequested(RestartReason::FullReset {
                path: trigger.path.clone(),
            });
        }

        if batch.has_multiple_events() {
            return self.reconcile_batch(batch).await;
        }

        let Some(verdict) = batch.into_verdicts().pop() else {
            return CycleOutcome::Idle;
        };
        if self
            .run_verdict(&verdict, ReconciliationContext::standalone())
            .await
        {
            CycleOutcome::Reconciled { verdicts: 1 }
        } else {
            CycleOutcome::Failed {
                verdicts: 1,
                failures: 1,
            }
        }
    }

    async fn reconcile_batch(self: &Arc<Self>, batch: EventBatch) -> CycleOutcome {
        let started = Instant::now();
        let verdicts = batch.len();
        let restart = batch.needs_hard_reload_regardless_of_kind();

        self.notify(&RefreshMessage::Rebuilding, BroadcastOptions::NOW)
            .await;

        // The gate is held from the kill until the relaunch has finished.
        let kill = if restart {
            let gate = Arc::clone(&self.restart_gate).lock_owned().await;
            let app = Arc::clone(&self.collaborators.app);
            Some(tokio::spawn(async move {
                let result = app.kill().await;
                (gate, result)
            }))
        } else {
            None
        };

        let ctx = ReconciliationContext::batch();
        let permits = Arc::new(Semaphore::new(self.max_parallel));
        let mut workers = JoinSet::new();
        for verdict in batch.into_verdicts() {
            let this = Arc::clone(self);
            let ctx = ctx.clone();
            let permits = Arc::clone(&permits);
            workers.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                this.run_verdict(&verdict, ctx).await
            });
        }

        let mut failures = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => failures += 1,
                Err(e) => {
                    tracing::error!("reconcile worker failed: {e}");
                    failures += 1;
                }
            }
        }

        if let Some(kill) = kill {
            match kill.await {
                Ok((_gate, Ok(()))) => {
                    if let Err(e) = self.collaborators.app.relaunch().await {
                        tracing::error!("relaunch failed: {e}");
                        failures += 1;
                    }
                }
                Ok((_gate, Err(e))) => {
                    tracing::error!("kill failed: {e}");
                    failures += 1;
                }
                Err(e) => {
                    tracing::error!("kill task failed: {e}");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            tracing::warn!(verdicts, failures, "batch finished with failures");
            return CycleOutcome::Failed { verdicts, failures };
        }

        self.notify(&RefreshMessage::HardReload, BroadcastOptions::WHEN_READY)
            .await;
        tracing::info!(
            verdicts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch reconciled"
        );
        CycleOutcome::Reconciled { verdicts }
    }

    /// Reconcile one verdict, logging its failure. Returns whether it succeeded.
    async fn run_verdict(&self, verdict: &Verdict, ctx: ReconciliationContext) -> bool {
        let started = Instant::now();
        match self.reconcile_verdict(verdict, &ctx).await {
            Ok(()) => {
                tracing::debug!(
                    path = %self.display_path(&verdict.path),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "reconciled"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    path = %self.display_path(&verdict.path),
                    operation = ?verdict.op,
                    "{e}"
                );
                false
            }
        }
    }

    async fn reconcile_verdict(&self, verdict: &Verdict, ctx: &ReconciliationContext) -> Result<()> {
        let relative = self.relative(&verdict.path);
        let changed = self.changed_paths(verdict);
        let config = verdict.matched.as_ref().map(|rule| rule.config.as_ref());
        let run_hooks_only = config.is_some_and(|c| c.run_hooks_only);
        let skip_notice = config.is_some_and(|c| c.skip_client_notification);
        let executor = &self.collaborators.hooks;

        if !ctx.is_part_of_batch && !skip_notice && !run_hooks_only && !verdict.is_style_only() {
            self.notify(&RefreshMessage::Rebuilding, BroadcastOptions::NOW)
                .await;
        }

        hooks::spawn_detached(
            executor,
            &hooks_of(verdict, HookStrategy::ConcurrentNoWait, &changed),
            &relative,
        );

        hooks::run_sequential(
            executor,
            &hooks_of(verdict, HookStrategy::Pre, &changed),
            &relative,
            HookStrategy::Pre,
        )
        .await?;

        if run_hooks_only {
            return Ok(());
        }

        let concurrent = hooks_of(verdict, HookStrategy::Concurrent, &changed);
        let (built, concurrent_done) = tokio::join!(
            self.main_build(verdict, ctx, &relative),
            hooks::run_concurrent(executor, &concurrent, &relative)
        );
        let payload = built?;
        concurrent_done?;

        hooks::run_sequential(
            executor,
            &hooks_of(verdict, HookStrategy::Post, &changed),
            &relative,
            HookStrategy::Post,
        )
        .await?;

        if ctx.is_part_of_batch {
            return Ok(());
        }

        let restart = verdict.needs_process_restart();
        if restart {
            self.restart_app().await?;
        }

        if config.is_some_and(|c| c.only_run_client_revalidate) {
            self.notify(&RefreshMessage::ClientRevalidate, BroadcastOptions::WHEN_READY)
                .await;
        } else if verdict.is_style_only() && !restart {
            let message = RefreshMessage::style_hot_swap(payload.unwrap_or_default());
            self.notify(&message, BroadcastOptions::NOW).await;
        } else {
            self.notify(&RefreshMessage::HardReload, BroadcastOptions::WHEN_READY)
                .await;
        }
        Ok(())
    }

    /// Compile for compiled source, rebuild styles for style files, otherwise
    /// run the declared asset build (if any).
    async fn main_build(
        &self,
        verdict: &Verdict,
        ctx: &ReconciliationContext,
        relative: &Path,
    ) -> Result<Option<StylePayload>> {
        if verdict.needs_compile() {
            ctx.compile_once(self.collaborators.app.recompile()).await?;
            return Ok(None);
        }

        if verdict.is_style_entry_or_import {
            let payload = ctx.styles_once(self.collaborators.styles.rebuild()).await?;
            return Ok(Some(payload));
        }

        if let Some(command) = &self.build_hook {
            let executor = Arc::clone(&self.collaborators.hooks);
            let invocation = HookInvocation {
                changed_path: relative.to_path_buf(),
                strategy: HookStrategy::Concurrent,
            };
            ctx.asset_build_once(async move {
                executor
                    .run(&HookCommand::BuildHook, &invocation)
                    .await
                    .map_err(|e| asset_build_failed(command, e))
            })
            .await?;
        }
        Ok(None)
    }

    async fn restart_app(&self) -> Result<()> {
        let _gate = self.restart_gate.lock().await;
        self.collaborators.app.kill().await?;
        self.collaborators.app.relaunch().await?;
        Ok(())
    }

    async fn notify(&self, message: &RefreshMessage, options: BroadcastOptions) -> Delivery {
        self.collaborators.broadcaster.broadcast(message, options).await
    }

    fn relative(&self, path: &Path) -> PathBuf {
        self.registry()
            .relative(path)
            .unwrap_or(path)
            .to_path_buf()
    }

    /// Root-relative paths this verdict stands for, itself first.
    fn changed_paths(&self, verdict: &Verdict) -> Vec<PathBuf> {
        std::iter::once(&verdict.path)
            .chain(&verdict.coalesced)
            .map(|path| self.relative(path))
            .collect()
    }

    fn display_path(&self, path: &Path) -> String {
        self.relative(path).display().to_string()
    }
}

fn hooks_of(verdict: &Verdict, strategy: HookStrategy, changed: &[PathBuf]) -> Vec<OnChangeHook> {
    verdict
        .matched
        .as_ref()
        .map(|rule| rule.hooks_for(strategy, changed).cloned().collect())
        .unwrap_or_default()
}

fn asset_build_failed(command: &str, error: HookError) -> BuildError {
    match error {
        HookError::Failed { code, stderr, .. } => BuildError::AssetBuildFailed {
            command: command.to_string(),
            code,
            stderr,
        },
        other => BuildError::AssetBuildFailed {
            command: command.to_string(),
            code: None,
            stderr: other.to_string(),
        },
    }
}
