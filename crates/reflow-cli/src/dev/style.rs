//! Style pipeline.
//!
//! [`StyleGraph`] owns the import graph of the configured style entries. A
//! rebuild reads each entry, inlines its `@import`s transitively and records
//! every file that took part, so the classifier can ask whether a changed
//! path belongs to a style entry.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::RwLock;
use regex::Regex;
use reflow_config::StyleSettings;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use crate::error::BuildError;

/// `@import "x.css";`, `@import 'x.css' screen;` and `@import url(x.css);`
static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?[^;]*;"#)
        .expect("import pattern is valid")
});

/// What clients need to hot swap styles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StylePayload {
    pub critical_css_base64: Option<String>,
    pub non_critical_css_url: Option<String>,
}

/// Which bundle to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleKind {
    Critical,
    NonCritical,
}

/// The style subsystem as seen by the classifier, the orchestrator and the server.
#[async_trait]
pub trait StyleSubsystem: Send + Sync {
    /// Whether `path` is a style entry or part of an entry's import set.
    fn is_style_dependency(&self, path: &Path) -> bool;

    /// Recompute the bundles and return what clients need.
    async fn rebuild(&self) -> Result<StylePayload, BuildError>;

    /// Latest bundle of `kind`, if one was built.
    fn bundle(&self, kind: StyleKind) -> Option<String>;
}

#[derive(Debug, Default)]
struct StyleState {
    members: HashSet<PathBuf>,
    critical: Option<String>,
    non_critical: Option<String>,
}

/// Import-graph backed style subsystem.
#[derive(Debug)]
pub struct StyleGraph {
    critical_entry: Option<PathBuf>,
    non_critical_entry: Option<PathBuf>,
    public_path: String,
    state: Arc<RwLock<StyleState>>,
}

impl StyleGraph {
    /// Create a graph for the entries in `settings`, resolved against `root`.
    ///
    /// Until the first rebuild only the entries themselves are members.
    pub fn new(settings: &StyleSettings, root: &Path) -> Self {
        let resolve = |entry: &PathBuf| path_clean::clean(root.join(entry));
        let critical_entry = settings.critical_entry.as_ref().map(resolve);
        let non_critical_entry = settings.non_critical_entry.as_ref().map(resolve);

        let members = critical_entry
            .iter()
            .chain(non_critical_entry.iter())
            .cloned()
            .collect();

        Self {
            critical_entry,
            non_critical_entry,
            public_path: settings.public_path.trim_end_matches('/').to_string(),
            state: Arc::new(RwLock::new(StyleState {
                members,
                ..StyleState::default()
            })),
        }
    }

    pub fn has_entries(&self) -> bool {
        self.critical_entry.is_some() || self.non_critical_entry.is_some()
    }

    fn non_critical_url(&self, css: &str) -> String {
        let hash = blake3::hash(css.as_bytes()).to_hex();
        format!("{}/non-critical.css?v={}", self.public_path, &hash[..8])
    }
}

#[async_trait]
impl StyleSubsystem for StyleGraph {
    fn is_style_dependency(&self, path: &Path) -> bool {
        self.state.read().members.contains(path)
    }

    async fn rebuild(&self) -> Result<StylePayload, BuildError> {
        let critical_entry = self.critical_entry.clone();
        let non_critical_entry = self.non_critical_entry.clone();

        let (critical, non_critical, members) = tokio::task::spawn_blocking(move || {
            let mut members = HashSet::new();
            let critical = critical_entry
                .map(|entry| bundle_entry(&entry, &mut members))
                .transpose()?;
            let non_critical = non_critical_entry
                .map(|entry| bundle_entry(&entry, &mut members))
                .transpose()?;
            Ok::<_, BuildError>((critical, non_critical, members))
        })
        .await
        .map_err(|e| BuildError::StyleFailed {
            path: PathBuf::new(),
            message: format!("style task failed: {e}"),
        })??;

        let payload = StylePayload {
            critical_css_base64: critical.as_deref().map(|css| BASE64.encode(css)),
            non_critical_css_url: non_critical.as_deref().map(|css| self.non_critical_url(css)),
        };

        tracing::debug!(
            members = members.len(),
            url = payload.non_critical_css_url.as_deref().unwrap_or("-"),
            "rebuilt styles"
        );

        let mut state = self.state.write();
        state.members = members;
        state.critical = critical;
        state.non_critical = non_critical;

        Ok(payload)
    }

    fn bundle(&self, kind: StyleKind) -> Option<String> {
        let state = self.state.read();
        match kind {
            StyleKind::Critical => state.critical.clone(),
            StyleKind::NonCritical => state.non_critical.clone(),
        }
    }
}

/// Read `entry` and inline its imports, recording every visited file.
fn bundle_entry(entry: &Path, members: &mut HashSet<PathBuf>) -> Result<String, BuildError> {
    let mut stack = Vec::new();
    inline_imports(entry, members, &mut stack)
}

fn inline_imports(
    path: &Path,
    members: &mut HashSet<PathBuf>,
    stack: &mut Vec<PathBuf>,
) -> Result<String, BuildError> {
    let path = path_clean::clean(path);
    if stack.contains(&path) {
        return Err(BuildError::StyleFailed {
            path,
            message: "circular @import".to_string(),
        });
    }

    let source = std::fs::read_to_string(&path).map_err(|e| BuildError::StyleFailed {
        path: path.clone(),
        message: e.to_string(),
    })?;
    members.insert(path.clone());

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    stack.push(path.clone());

    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for caps in IMPORT_RE.captures_iter(&source) {
        let (Some(whole), Some(target)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let target = target.as_str();
        if is_remote(target) {
            continue;
        }
        out.push_str(&source[last..whole.start()]);
        out.push_str(&inline_imports(&dir.join(target), members, stack)?);
        last = whole.end();
    }
    out.push_str(&source[last..]);

    stack.pop();
    Ok(out)
}

fn is_remote(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://") || target.starts_with("//")
}
