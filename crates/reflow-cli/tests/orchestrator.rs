//! End-to-end reconciliation cycles against in-test collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use reflow_cli::dev::{
    Broadcaster, Collaborators, CycleOutcome, HookExecutor, HookInvocation, ManagedApp, NoBundler,
    OpFlags, Orchestrator, ProcessState, RawEvent, RefreshMessage, RestartReason, StyleKind,
    StylePayload, StyleSubsystem, WatchSet,
};
use reflow_cli::error::{BuildError, HookError, ProcessError};
use reflow_config::{Builtin, HookCommand, HookStrategy, OnChangeHook, ReflowConfig, WatchedFileConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

/// Shared, ordered record of what the collaborators were asked to do.
#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }

    fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

struct FakeApp {
    journal: Arc<Journal>,
    state: watch::Sender<ProcessState>,
    compile_fails: AtomicBool,
}

#[async_trait]
impl ManagedApp for FakeApp {
    async fn kill(&self) -> Result<(), ProcessError> {
        self.journal.push("kill");
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.state.send_replace(ProcessState::Stopped);
        Ok(())
    }

    async fn recompile(&self) -> Result<(), BuildError> {
        self.journal.push("compile");
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.compile_fails.load(Ordering::SeqCst) {
            return Err(BuildError::CompileFailed {
                command: "cargo build".into(),
                code: Some(101),
                stderr: "error[E0308]: mismatched types".into(),
            });
        }
        Ok(())
    }

    async fn launch(&self) -> Result<(), ProcessError> {
        let state = *self.state.borrow();
        if state != ProcessState::Stopped {
            return Err(ProcessError::AlreadyRunning { state });
        }
        self.journal.push("launch");
        self.state.send_replace(ProcessState::Launching);
        Ok(())
    }

    async fn wait_healthy(&self) -> Result<(), ProcessError> {
        self.journal.push("healthy");
        self.state.send_replace(ProcessState::Healthy);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }
}

/// Shell hooks are fake: a command starting with `slow` sleeps, one starting
/// with `fail` fails.
struct FakeHooks {
    journal: Arc<Journal>,
}

#[async_trait]
impl HookExecutor for FakeHooks {
    async fn run(&self, command: &HookCommand, _invocation: &HookInvocation) -> Result<(), HookError> {
        let name = command.to_string();
        self.journal.push(format!("hook-start:{name}"));
        if name.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        if name.starts_with("fail") {
            return Err(HookError::Failed {
                command: name,
                code: Some(1),
                stderr: "lint errors".into(),
            });
        }
        self.journal.push(format!("hook-done:{name}"));
        Ok(())
    }
}

/// Every `.css` file is a style dependency.
struct FakeStyles {
    journal: Arc<Journal>,
}

#[async_trait]
impl StyleSubsystem for FakeStyles {
    fn is_style_dependency(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "css")
    }

    async fn rebuild(&self) -> Result<StylePayload, BuildError> {
        self.journal.push("styles");
        Ok(StylePayload {
            critical_css_base64: None,
            non_critical_css_url: Some("/__reflow/styles/non-critical.css?v=1a2b3c4d".into()),
        })
    }

    fn bundle(&self, _kind: StyleKind) -> Option<String> {
        None
    }
}

#[derive(Default)]
struct RecordingWatchSet(Mutex<Vec<PathBuf>>);

impl WatchSet for RecordingWatchSet {
    fn add_directory(&self, dir: &Path) -> reflow_cli::Result<()> {
        self.0.lock().push(dir.to_path_buf());
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    journal: Arc<Journal>,
    app: Arc<FakeApp>,
    orchestrator: Arc<Orchestrator>,
    client: mpsc::Receiver<String>,
    watch_set: RecordingWatchSet,
}

impl Harness {
    fn new(rules: Vec<WatchedFileConfig>) -> Self {
        let dir = TempDir::new().unwrap();
        let root = path_clean::clean(dir.path());

        let mut config = ReflowConfig::default();
        config.app.build_command = "cargo build".into();
        config.app.launch_command = "target/debug/app".into();
        config.watch = rules;
        config.source = Some(root.join("reflow.toml"));
        fs::write(root.join("reflow.toml"), "[app]\n").unwrap();

        let journal = Arc::new(Journal::default());
        let (state, _) = watch::channel(ProcessState::Healthy);
        let app = Arc::new(FakeApp {
            journal: Arc::clone(&journal),
            state,
            compile_fails: AtomicBool::new(false),
        });

        let broadcaster = Arc::new(Broadcaster::new(Arc::new(NoBundler), Duration::from_secs(2)));
        broadcaster.attach_app(app.subscribe());
        let (_id, client) = broadcaster.register_client();

        let collaborators = Collaborators {
            app: Arc::clone(&app) as Arc<dyn ManagedApp>,
            hooks: Arc::new(FakeHooks {
                journal: Arc::clone(&journal),
            }),
            styles: Arc::new(FakeStyles {
                journal: Arc::clone(&journal),
            }),
            broadcaster,
        };
        let orchestrator = Arc::new(Orchestrator::new(&config, &root, collaborators).unwrap());

        Self {
            _dir: dir,
            root,
            journal,
            app,
            orchestrator,
            client,
            watch_set: RecordingWatchSet::default(),
        }
    }

    fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    fn saved(&self, relative: &str) -> RawEvent {
        let path = self.write(relative, "changed");
        RawEvent::new(path, OpFlags::WRITE)
    }

    async fn cycle(&self, events: Vec<RawEvent>) -> CycleOutcome {
        self.orchestrator.handle_batch(events, &self.watch_set).await
    }

    /// Kinds of the messages received so far, in order.
    fn messages(&mut self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Ok(json) = self.client.try_recv() {
            let message: RefreshMessage = serde_json::from_str(&json).unwrap();
            kinds.push(message.kind());
        }
        kinds
    }

    fn state(&self) -> ProcessState {
        *self.app.subscribe().borrow()
    }
}

fn rule(pattern: &str) -> WatchedFileConfig {
    WatchedFileConfig::new(pattern)
}

#[tokio::test]
async fn test_compiled_source_restarts_and_reloads() {
    let mut h = Harness::new(vec![]);
    let event = h.saved("app/main.rs");

    let outcome = h.cycle(vec![event]).await;

    assert_eq!(outcome, CycleOutcome::Reconciled { verdicts: 1 });
    assert_eq!(h.journal.entries(), ["compile", "kill", "launch", "healthy"]);
    assert_eq!(h.messages(), ["rebuilding", "hard_reload"]);
    assert_eq!(h.state(), ProcessState::Healthy);
}

#[tokio::test]
async fn test_style_change_hot_swaps_without_restart() {
    let mut h = Harness::new(vec![]);
    let event = h.saved("styles/main.css");

    let outcome = h.cycle(vec![event]).await;

    assert_eq!(outcome, CycleOutcome::Reconciled { verdicts: 1 });
    assert_eq!(h.journal.entries(), ["styles"]);
    assert_eq!(h.messages(), ["style_hot_swap"]);
}

#[tokio::test]
async fn test_style_hot_swap_carries_payload() {
    let mut h = Harness::new(vec![]);
    let event = h.saved("styles/main.css");
    h.cycle(vec![event]).await;

    let json = h.client.try_recv().unwrap();
    let message: RefreshMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(
        message,
        RefreshMessage::StyleHotSwap {
            critical_css_base64: None,
            non_critical_css_url: Some("/__reflow/styles/non-critical.css?v=1a2b3c4d".into()),
        }
    );
}

#[tokio::test]
async fn test_hooks_only_rule_and_compiled_source_share_one_restart() {
    let mut schema = rule("schema/**/*.sql")
        .with_hook(OnChangeHook::shell("slow-sqlc-generate", HookStrategy::Pre));
    schema.run_hooks_only = true;
    let mut h = Harness::new(vec![schema]);

    let events = vec![h.saved("schema/users.sql"), h.saved("app/main.rs")];
    let outcome = h.cycle(events).await;

    assert_eq!(outcome, CycleOutcome::Reconciled { verdicts: 2 });
    assert_eq!(h.messages(), ["rebuilding", "hard_reload"]);
    assert_eq!(h.journal.count("kill"), 1);
    assert_eq!(h.journal.count("launch"), 1);
    assert_eq!(h.journal.count("compile"), 1);

    // The kill overlaps the slow pre hook; the relaunch waits for it.
    let kill = h.journal.position("kill").unwrap();
    let hook_done = h.journal.position("hook-done:slow-sqlc-generate").unwrap();
    let launch = h.journal.position("launch").unwrap();
    assert!(kill < hook_done);
    assert!(hook_done < launch);
    assert_eq!(h.state(), ProcessState::Healthy);
}

#[tokio::test]
async fn test_config_chmod_is_not_a_reload() {
    let h = Harness::new(vec![]);
    let config = h.root.join("reflow.toml");

    let chmod = h.cycle(vec![RawEvent::new(&config, OpFlags::CHMOD)]).await;
    assert_eq!(chmod, CycleOutcome::Idle);

    let write = h.cycle(vec![RawEvent::new(&config, OpFlags::WRITE)]).await;
    assert_eq!(write, CycleOutcome::RestartRequested(RestartReason::ConfigChanged));
    assert!(h.journal.entries().is_empty());
}

#[tokio::test]
async fn test_chmod_only_change_is_a_no_op() {
    let mut h = Harness::new(vec![]);
    let path = h.write("app/main.rs", "fn main() {}");

    let outcome = h.cycle(vec![RawEvent::new(path, OpFlags::CHMOD)]).await;

    assert_eq!(outcome, CycleOutcome::Idle);
    assert!(h.journal.entries().is_empty());
    assert!(h.messages().is_empty());
}

#[tokio::test]
async fn test_chmod_on_empty_file_is_surfaced() {
    let mut h = Harness::new(vec![]);
    let path = h.write("app/empty.rs", "");

    let outcome = h.cycle(vec![RawEvent::new(path, OpFlags::CHMOD)]).await;

    assert_eq!(outcome, CycleOutcome::Reconciled { verdicts: 1 });
    assert_eq!(h.messages(), ["rebuilding", "hard_reload"]);
}

#[tokio::test]
async fn test_all_chmod_batch_is_a_no_op() {
    let mut h = Harness::new(vec![]);
    let a = h.write("app/a.rs", "fn a() {}");
    let b = h.write("styles/b.css", "b{}");

    let outcome = h
        .cycle(vec![RawEvent::new(a, OpFlags::CHMOD), RawEvent::new(b, OpFlags::CHMOD)])
        .await;

    assert_eq!(outcome, CycleOutcome::Idle);
    assert!(h.journal.entries().is_empty());
    assert!(h.messages().is_empty());
}

#[tokio::test]
async fn test_many_saves_under_one_pattern_run_hooks_once() {
    let templates = rule("templates/**/*.html")
        .with_hook(OnChangeHook::shell("render-index", HookStrategy::Pre));
    let mut h = Harness::new(vec![templates]);

    let events = vec![
        h.saved("templates/a.html"),
        h.saved("templates/b.html"),
        h.saved("templates/nested/c.html"),
    ];
    let outcome = h.cycle(events).await;

    assert_eq!(outcome, CycleOutcome::Reconciled { verdicts: 1 });
    assert_eq!(h.journal.count("hook-done:render-index"), 1);
    assert_eq!(h.messages(), ["rebuilding", "hard_reload"]);
}

#[tokio::test]
async fn test_no_wait_hook_does_not_delay_health() {
    let mut assets = rule("assets/**")
        .with_hook(OnChangeHook::shell("slow-index-assets", HookStrategy::ConcurrentNoWait));
    assets.restart_process_only = true;
    let h = Harness::new(vec![assets]);

    let outcome = h.cycle(vec![h.saved("assets/logo.svg")]).await;

    assert_eq!(outcome, CycleOutcome::Reconciled { verdicts: 1 });
    assert_eq!(h.state(), ProcessState::Healthy);
    assert_eq!(h.journal.count("hook-done:slow-index-assets"), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.journal.count("hook-done:slow-index-assets"), 1);
}

#[tokio::test]
async fn test_pre_failure_stops_everything_after_it() {
    let app_rule = rule("app/**/*.rs")
        .with_hook(OnChangeHook::shell("fail-lint", HookStrategy::Pre))
        .with_hook(OnChangeHook::shell("generate-docs", HookStrategy::Concurrent))
        .with_hook(OnChangeHook::shell("notify-team", HookStrategy::Post));
    let mut h = Harness::new(vec![app_rule]);

    let outcome = h.cycle(vec![h.saved("app/main.rs")]).await;

    assert_eq!(
        outcome,
        CycleOutcome::Failed {
            verdicts: 1,
            failures: 1
        }
    );
    assert_eq!(h.journal.entries(), ["hook-start:fail-lint"]);
    assert_eq!(h.messages(), ["rebuilding"]);
    assert_eq!(h.state(), ProcessState::Healthy);
}

#[tokio::test]
async fn test_hook_order_around_build() {
    let app_rule = rule("app/**/*.rs")
        .with_hook(OnChangeHook::shell("post-notify", HookStrategy::Post))
        .with_hook(OnChangeHook::shell("pre-format", HookStrategy::Pre))
        .with_hook(OnChangeHook::shell("slow-docs", HookStrategy::Concurrent));
    let h = Harness::new(vec![app_rule]);

    h.cycle(vec![h.saved("app/main.rs")]).await;

    let pre = h.journal.position("hook-done:pre-format").unwrap();
    let compile = h.journal.position("compile").unwrap();
    let docs_start = h.journal.position("hook-start:slow-docs").unwrap();
    let docs_done = h.journal.position("hook-done:slow-docs").unwrap();
    let post = h.journal.position("hook-start:post-notify").unwrap();
    let kill = h.journal.position("kill").unwrap();

    assert!(pre < compile && pre < docs_start);
    assert!(docs_done < post);
    assert!(post < kill);
}

#[tokio::test]
async fn test_failed_compile_keeps_previous_process() {
    let mut h = Harness::new(vec![]);
    h.app.compile_fails.store(true, Ordering::SeqCst);

    let outcome = h.cycle(vec![h.saved("app/main.rs")]).await;

    assert!(matches!(outcome, CycleOutcome::Failed { .. }));
    assert_eq!(h.journal.entries(), ["compile"]);
    assert_eq!(h.messages(), ["rebuilding"]);
    assert_eq!(h.state(), ProcessState::Healthy);
}

#[tokio::test]
async fn test_batch_compiles_once() {
    let mut cmd = rule("cmd/**/*.rs");
    cmd.recompile_main_process = true;
    let mut h = Harness::new(vec![cmd]);

    let events = vec![h.saved("cmd/server.rs"), h.saved("app/main.rs")];
    let outcome = h.cycle(events).await;

    assert_eq!(outcome, CycleOutcome::Reconciled { verdicts: 2 });
    assert_eq!(h.journal.count("compile"), 1);
    assert_eq!(h.journal.count("kill"), 1);
    assert_eq!(h.messages(), ["rebuilding", "hard_reload"]);
}

#[tokio::test]
async fn test_failed_batch_relaunches_but_withholds_reload() {
    let templates = rule("templates/**/*.html");
    let mut h = Harness::new(vec![templates]);
    h.app.compile_fails.store(true, Ordering::SeqCst);

    let events = vec![h.saved("templates/home.html"), h.saved("app/main.rs")];
    let outcome = h.cycle(events).await;

    assert_eq!(
        outcome,
        CycleOutcome::Failed {
            verdicts: 2,
            failures: 1
        }
    );
    assert_eq!(h.journal.count("kill"), 1);
    assert_eq!(h.journal.count("launch"), 1);
    assert_eq!(h.messages(), ["rebuilding"]);
}

#[tokio::test]
async fn test_revalidate_rule_sends_client_revalidate() {
    let mut content = rule("content/**/*.md");
    content.only_run_client_revalidate = true;
    let mut h = Harness::new(vec![content]);

    let outcome = h.cycle(vec![h.saved("content/posts/hello.md")]).await;

    assert_eq!(outcome, CycleOutcome::Reconciled { verdicts: 1 });
    assert_eq!(h.messages(), ["rebuilding", "client_revalidate"]);
    assert_eq!(h.journal.count("kill"), 0);
}

#[tokio::test]
async fn test_skip_client_notification_only_drops_rebuilding() {
    let mut quiet = rule("templates/**/*.html");
    quiet.skip_client_notification = true;
    let mut h = Harness::new(vec![quiet]);

    h.cycle(vec![h.saved("templates/home.html")]).await;

    assert_eq!(h.messages(), ["hard_reload"]);
}

#[tokio::test]
async fn test_full_reset_rule_requests_restart_before_any_work() {
    let reset = rule("reflow.d/**")
        .with_hook(OnChangeHook::shell("never-runs", HookStrategy::Pre))
        .with_hook(OnChangeHook::builtin(Builtin::FullReset, HookStrategy::Pre));
    let mut h = Harness::new(vec![reset]);

    let path = h.write("reflow.d/extra.toml", "x = 1");
    let events = vec![h.saved("app/main.rs"), RawEvent::new(&path, OpFlags::WRITE)];
    let outcome = h.cycle(events).await;

    assert_eq!(
        outcome,
        CycleOutcome::RestartRequested(RestartReason::FullReset { path })
    );
    assert!(h.journal.entries().is_empty());
    assert!(h.messages().is_empty());
}

#[tokio::test]
async fn test_new_directory_is_added_to_watch_set() {
    let h = Harness::new(vec![]);
    let dir = h.root.join("app/handlers");
    fs::create_dir_all(&dir).unwrap();

    let outcome = h.cycle(vec![RawEvent::new(&dir, OpFlags::CREATE)]).await;

    assert_eq!(outcome, CycleOutcome::Idle);
    assert_eq!(*h.watch_set.0.lock(), vec![dir]);
}

#[tokio::test]
async fn test_ignored_paths_do_nothing() {
    let mut h = Harness::new(vec![]);
    let outcome = h
        .cycle(vec![h.saved("target/debug/build.rs"), h.saved("README.md")])
        .await;

    assert_eq!(outcome, CycleOutcome::Idle);
    assert!(h.journal.entries().is_empty());
    assert!(h.messages().is_empty());
}

#[tokio::test]
async fn test_chmod_under_a_rule_does_not_hide_a_save() {
    let mut h = Harness::new(vec![]);
    let touched = h.write("app/a.rs", "fn a() {}");

    let events = vec![RawEvent::new(touched, OpFlags::CHMOD), h.saved("app/b.rs")];
    let outcome = h.cycle(events).await;

    assert_eq!(outcome, CycleOutcome::Reconciled { verdicts: 1 });
    assert_eq!(h.journal.entries(), ["compile", "kill", "launch", "healthy"]);
    assert_eq!(h.messages(), ["rebuilding", "hard_reload"]);
}

#[tokio::test]
async fn test_saving_many_stylesheets_rebuilds_once() {
    let mut h = Harness::new(vec![]);

    let events = vec![
        h.saved("styles/main.css"),
        h.saved("styles/buttons.css"),
        h.saved("styles/forms.css"),
    ];
    let outcome = h.cycle(events).await;

    assert_eq!(outcome, CycleOutcome::Reconciled { verdicts: 3 });
    assert_eq!(h.journal.count("styles"), 1);
    assert_eq!(h.journal.count("kill"), 0);
    assert_eq!(h.messages(), ["rebuilding", "hard_reload"]);
}

#[tokio::test]
async fn test_excluded_first_save_does_not_skip_hook_for_the_rest() {
    let templates = rule("templates/**/*.html").with_hook(
        OnChangeHook::shell("render-index", HookStrategy::Pre).with_exclude(["templates/drafts/**"]),
    );
    let h = Harness::new(vec![templates]);

    let events = vec![h.saved("templates/drafts/wip.html"), h.saved("templates/home.html")];
    h.cycle(events).await;

    assert_eq!(h.journal.count("hook-done:render-index"), 1);
}

#[tokio::test]
async fn test_excluded_save_alone_skips_hook() {
    let templates = rule("templates/**/*.html").with_hook(
        OnChangeHook::shell("render-index", HookStrategy::Pre).with_exclude(["templates/drafts/**"]),
    );
    let h = Harness::new(vec![templates]);

    h.cycle(vec![h.saved("templates/drafts/wip.html")]).await;

    assert_eq!(h.journal.count("hook-start:render-index"), 0);
}
