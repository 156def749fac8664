//! Dev command implementation.
//!
//! Orchestrates the session lifecycle:
//! - Initial style build, compile, launch and health wait
//! - File watching with per-tick batching
//! - SSE server for browser refreshes
//! - Full restarts on configuration changes and full-reset hooks
//! - Graceful shutdown on Ctrl+C

use reflow_config::ReflowConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

use crate::cli::DevArgs;
use crate::dev::{
    BroadcastOptions, Broadcaster, BuildCoordinator, BundlerProbe, Collaborators, CycleOutcome,
    DevConfig, DevServer, FileWatcher, HttpBundlerProbe, ManagedApp, NoBundler, Orchestrator,
    RawEvent, RefreshMessage, RestartReason, ServerState, ShellExecutor, StyleGraph,
    StyleSubsystem,
};
use crate::error::Result;
use crate::ui;

/// Delay between attempts to bring a session back after a failed restart.
const RESTART_RETRY: Duration = Duration::from_secs(2);

/// Everything that is rebuilt on a full restart. The server and the
/// broadcaster (and so the connected clients) outlive it.
struct Session {
    dev: DevConfig,
    app: Arc<BuildCoordinator>,
    styles: Arc<StyleGraph>,
    orchestrator: Arc<Orchestrator>,
    watcher: FileWatcher,
    ticks: mpsc::Receiver<Vec<RawEvent>>,
}

impl Session {
    async fn start(dev: DevConfig, broadcaster: &Arc<Broadcaster>) -> Result<Self> {
        let config = &dev.config;
        let root = dev.root.clone();

        let styles = Arc::new(StyleGraph::new(&config.styles, &root));
        if styles.has_entries() {
            match styles.rebuild().await {
                Ok(_) => ui::success("Styles built"),
                Err(e) => ui::error(&format!("Style build failed: {}", e)),
            }
        }

        let app = Arc::new(BuildCoordinator::new(&root, config.app.clone()));
        broadcaster.attach_app(app.subscribe());
        boot(&app, config).await;

        let collaborators = Collaborators {
            app: Arc::clone(&app) as Arc<dyn ManagedApp>,
            hooks: Arc::new(ShellExecutor::new(&root, config.dev.build_hook.clone())),
            styles: Arc::clone(&styles) as Arc<dyn StyleSubsystem>,
            broadcaster: Arc::clone(broadcaster),
        };
        let orchestrator = Arc::new(Orchestrator::new(config, &root, collaborators)?);

        let (watcher, ticks) = FileWatcher::new(
            root,
            orchestrator.registry().ignore_set(),
            config.dev.debounce_ms,
        )?;

        Ok(Self {
            dev,
            app,
            styles,
            orchestrator,
            watcher,
            ticks,
        })
    }
}

/// Compile, launch and wait for health. Failures leave the session running
/// so that the next change can fix them.
async fn boot(app: &BuildCoordinator, config: &ReflowConfig) {
    ui::info(&format!("Compiling: {}", config.app.build_command));
    if let Err(e) = app.recompile().await {
        ui::error(&format!("Initial build failed: {}", e));
        return;
    }

    let started = std::time::Instant::now();
    if let Err(e) = app.relaunch().await {
        ui::error(&format!("Managed process did not start: {}", e));
        return;
    }
    ui::success(&format!(
        "Managed process healthy in {}",
        ui::format_duration(started.elapsed())
    ));
}

fn bundler_probe(config: &ReflowConfig) -> Arc<dyn BundlerProbe> {
    match &config.dev.bundler_ready_url {
        Some(url) => Arc::new(HttpBundlerProbe::new(url.clone())),
        None => Arc::new(NoBundler),
    }
}

enum Next {
    Tick(Option<Vec<RawEvent>>),
    Shutdown,
    ServerStopped,
}

/// Execute the dev command.
///
/// # Process Flow
///
/// 1. Load and validate configuration
/// 2. Build styles, compile, launch and wait for health
/// 3. Start the file watcher and the SSE server
/// 4. Main event loop:
///    - Reconcile each tick of file changes
///    - Perform full restarts when requested
///    - Handle Ctrl+C for graceful shutdown
///
/// # Errors
///
/// Returns errors for invalid configuration, a missing watch root or a
/// failing server bind. Build and hook failures are reported and the loop
/// keeps watching.
pub async fn execute(args: DevArgs) -> Result<()> {
    ui::info("Starting reflow...");

    let dev = DevConfig::from_args(&args)?;
    ui::info(&format!("Config: {}", dev.config_path.display()));
    ui::info(&format!("Watch root: {}", dev.root.display()));

    // Bundler probe and readiness timeout are fixed for the whole run.
    let broadcaster = Arc::new(Broadcaster::new(
        bundler_probe(&dev.config),
        dev.config.dev.readiness_timeout(),
    ));

    let mut session = Session::start(dev, &broadcaster).await?;

    let server_state = Arc::new(ServerState::new(
        Arc::clone(&broadcaster),
        Arc::clone(&session.styles) as Arc<dyn StyleSubsystem>,
    ));
    let server = DevServer::new(
        session.dev.addr,
        &session.dev.config.styles.public_path,
        Arc::clone(&server_state),
    );
    ui::success(&format!("Refresh server running at {}", server.url()));
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            ui::error(&format!("Server error: {}", e));
        }
    });

    if session.dev.open {
        match app_url(&session.dev.config) {
            Some(url) => open_browser(&url),
            None => ui::warning("--open needs app.health_check_url to know where the app lives"),
        }
    }

    ui::info("Watching for changes. Press Ctrl+C to stop");

    loop {
        let next = tokio::select! {
            tick = session.ticks.recv() => Next::Tick(tick),
            _ = signal::ctrl_c() => Next::Shutdown,
            _ = &mut server_handle => Next::ServerStopped,
        };

        match next {
            Next::Tick(Some(events)) => {
                let outcome = session
                    .orchestrator
                    .handle_batch(events, &session.watcher)
                    .await;
                if let CycleOutcome::RestartRequested(reason) = outcome {
                    match restart(session, reason, &broadcaster, &server_state).await {
                        Some(next) => session = next,
                        None => {
                            ui::info("Shutting down...");
                            ui::success("Reflow stopped");
                            return Ok(());
                        }
                    }
                }
            }
            Next::Tick(None) => {
                ui::warning("File watcher stopped");
                break;
            }
            Next::Shutdown => {
                ui::info("Shutting down...");
                break;
            }
            Next::ServerStopped => {
                ui::warning("Server task completed unexpectedly");
                break;
            }
        }
    }

    if let Err(e) = session.app.kill().await {
        ui::error(&format!("Failed to stop managed process: {}", e));
    }
    ui::success("Reflow stopped");
    Ok(())
}

/// Tear the session down and build a new one from the (re)loaded
/// configuration. A configuration that no longer loads, or a session that
/// fails to start from it, falls back to the previous configuration.
///
/// Returns `None` when Ctrl+C arrives while waiting to retry.
async fn restart(
    session: Session,
    reason: RestartReason,
    broadcaster: &Arc<Broadcaster>,
    server_state: &ServerState,
) -> Option<Session> {
    match &reason {
        RestartReason::ConfigChanged => ui::info("Configuration changed, restarting..."),
        RestartReason::FullReset { path } => ui::info(&format!(
            "{} requested a full reset, restarting...",
            session
                .orchestrator
                .registry()
                .relative(path)
                .unwrap_or(path)
                .display()
        )),
    }

    if let Err(e) = session.app.kill().await {
        ui::error(&format!("Failed to stop managed process: {}", e));
    }

    let previous = session.dev.clone();
    let next = match previous.reload() {
        Ok(dev) => dev,
        Err(e) => {
            ui::error(&format!("Keeping previous configuration: {}", e));
            previous.clone()
        }
    };
    drop(session);

    let session = tokio::select! {
        session = start_with_fallback(next, previous, broadcaster) => session,
        _ = signal::ctrl_c() => return None,
    };
    server_state.set_styles(Arc::clone(&session.styles) as Arc<dyn StyleSubsystem>);

    broadcaster
        .broadcast(&RefreshMessage::HardReload, BroadcastOptions::WHEN_READY)
        .await;
    Some(session)
}

/// Start a session from `next`; if that fails, keep starting from `previous`
/// until one comes up.
async fn start_with_fallback(
    next: DevConfig,
    previous: DevConfig,
    broadcaster: &Arc<Broadcaster>,
) -> Session {
    match Session::start(next, broadcaster).await {
        Ok(session) => return session,
        Err(e) => ui::error(&format!("Restart failed, using previous configuration: {}", e)),
    }

    loop {
        match Session::start(previous.clone(), broadcaster).await {
            Ok(session) => return session,
            Err(e) => {
                ui::error(&format!(
                    "Restart failed, retrying in {}: {}",
                    ui::format_duration(RESTART_RETRY),
                    e
                ));
                tokio::time::sleep(RESTART_RETRY).await;
            }
        }
    }
}

/// Origin of the health check URL, where the app's pages are served.
fn app_url(config: &ReflowConfig) -> Option<String> {
    let health = config.app.health_check_url.as_deref()?;
    let url = reqwest::Url::parse(health).ok()?;
    Some(url.origin().ascii_serialization())
}

/// Open `url` in the default browser.
///
/// Uses platform-specific commands:
/// - macOS: `open`
/// - Windows: `start`
/// - Linux: `xdg-open`
fn open_browser(url: &str) {
    use std::process::Command;

    let result = if cfg!(target_os = "macos") {
        Command::new("open").arg(url).spawn()
    } else if cfg!(target_os = "windows") {
        Command::new("cmd").args(["/C", "start", url]).spawn()
    } else {
        Command::new("xdg-open").arg(url).spawn()
    };

    match result {
        Ok(_) => ui::info(&format!("Opened browser at {}", url)),
        Err(e) => ui::warning(&format!("Failed to open browser: {}", e)),
    }
}
