//! File system watcher for development mode.
//!
//! Every directory under the watch root (minus `dev.ignore`) is watched
//! non-recursively, so a directory created later has to be added explicitly
//! through [`WatchSet::add_directory`]. Raw notifications are coalesced into
//! ticks of `debounce_ms` and delivered as `Vec<RawEvent>`.

use globset::GlobSet;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::dev::event::{OpFlags, RawEvent};
use crate::error::{CliError, Result};

/// Ticks buffered before the watcher waits for the orchestrator.
const TICK_BUFFER: usize = 16;

/// Callback for directories that appear while watching.
pub trait WatchSet: Send + Sync {
    /// Watch `dir` and everything below it.
    fn add_directory(&self, dir: &Path) -> Result<()>;
}

/// Watches the project tree and emits coalesced ticks.
pub struct FileWatcher {
    watcher: Mutex<RecommendedWatcher>,
    root: PathBuf,
    ignore: GlobSet,
    raw: mpsc::UnboundedSender<RawEvent>,
}

impl FileWatcher {
    /// Create a new file watcher.
    ///
    /// # Arguments
    ///
    /// * `root` - Watch root
    /// * `ignore` - Compiled `dev.ignore` globs, matched against root-relative paths
    /// * `debounce_ms` - Tick coalescing window
    ///
    /// # Returns
    ///
    /// Tuple of (FileWatcher, receiver for ticks)
    ///
    /// # Errors
    ///
    /// Returns error if the root doesn't exist or the OS watcher can't be created
    pub fn new(
        root: PathBuf,
        ignore: GlobSet,
        debounce_ms: u64,
    ) -> Result<(Self, mpsc::Receiver<Vec<RawEvent>>)> {
        if !root.is_dir() {
            return Err(CliError::FileNotFound(root));
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::channel(TICK_BUFFER);

        let callback_tx = raw_tx.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for raw in RawEvent::from_notify(&event) {
                    // Receiver gone: the session is shutting down.
                    let _ = callback_tx.send(raw);
                }
            }
            Err(e) => tracing::warn!("watch error: {e}"),
        })?;

        let this = Self {
            watcher: Mutex::new(watcher),
            root: path_clean::clean(&root),
            ignore,
            raw: raw_tx,
        };
        let watched = this.watch_tree(&this.root, false)?;
        tracing::debug!(root = %this.root.display(), directories = watched, "watching");

        tokio::spawn(coalesce(raw_rx, tick_tx, Duration::from_millis(debounce_ms)));

        Ok((this, tick_rx))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `dir/**` style globs only match entries below `dir`, so directories
    /// are also probed with a child name.
    fn is_ignored_dir(&self, dir: &Path) -> bool {
        match dir.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => false,
            Ok(relative) => {
                self.ignore.is_match(relative) || self.ignore.is_match(relative.join("_"))
            }
            Err(_) => true,
        }
    }

    fn is_ignored_file(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(relative) => self.ignore.is_match(relative),
            Err(_) => true,
        }
    }

    /// Watch every non-ignored directory under `dir`. With `announce_files`,
    /// files already inside are reported as created, since their own events
    /// happened before the watch existed.
    fn watch_tree(&self, dir: &Path, announce_files: bool) -> Result<usize> {
        let mut watched = 0;
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !entry.file_type().is_dir() || !self.is_ignored_dir(entry.path()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("skipping unreadable entry: {e}");
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                self.watcher
                    .lock()
                    .watch(entry.path(), RecursiveMode::NonRecursive)?;
                watched += 1;
            } else if announce_files && !self.is_ignored_file(entry.path()) {
                let _ = self
                    .raw
                    .send(RawEvent::new(entry.path(), OpFlags::CREATE));
            }
        }
        Ok(watched)
    }
}

impl WatchSet for FileWatcher {
    fn add_directory(&self, dir: &Path) -> Result<()> {
        if self.is_ignored_dir(dir) {
            return Ok(());
        }
        self.watch_tree(dir, true).map(|_| ())
    }
}

/// Group raw events into ticks: a tick opens with the first event and closes
/// `window` later.
async fn coalesce(
    mut raw: mpsc::UnboundedReceiver<RawEvent>,
    ticks: mpsc::Sender<Vec<RawEvent>>,
    window: Duration,
) {
    while let Some(first) = raw.recv().await {
        let mut tick = vec![first];
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                next = raw.recv() => match next {
                    Some(event) => tick.push(event),
                    None => break,
                },
            }
        }

        if ticks.send(tick).await.is_err() {
            break;
        }
    }
}
