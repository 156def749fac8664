//! Event classification.
//!
//! Turns one [`RawEvent`] into what it means for the project: a configuration
//! change, a new directory to watch, or a [`Verdict`] for the batch
//! aggregator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::dev::event::{OpFlags, RawEvent};
use crate::dev::registry::{MatchedRule, WatchRegistry};
use crate::dev::style::StyleSubsystem;

/// Semantic meaning of one changed path.
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Cleaned absolute path.
    pub path: PathBuf,
    pub op: OpFlags,
    pub is_ignored: bool,
    pub is_config_file: bool,
    pub is_compiled_source: bool,
    pub is_style_entry_or_import: bool,
    pub matched: Option<MatchedRule>,
    pub is_chmod_only_no_content_change: bool,
    pub triggers_full_reset: bool,
    /// Other paths of the same tick folded into this verdict because they
    /// matched the same rule.
    pub coalesced: Vec<PathBuf>,
}

impl Verdict {
    fn ignored(path: PathBuf, op: OpFlags) -> Self {
        Self {
            path,
            op,
            is_ignored: true,
            is_config_file: false,
            is_compiled_source: false,
            is_style_entry_or_import: false,
            matched: None,
            is_chmod_only_no_content_change: false,
            triggers_full_reset: false,
            coalesced: Vec::new(),
        }
    }

    /// A style change that is not also compiled source.
    pub fn is_style_only(&self) -> bool {
        self.is_style_entry_or_import && !self.is_compiled_source
    }

    /// Whether the managed process has to be killed and relaunched.
    pub fn needs_process_restart(&self) -> bool {
        self.is_compiled_source
            || self
                .matched
                .as_ref()
                .is_some_and(|rule| rule.config.needs_process_restart())
    }

    /// Whether the toolchain compile is part of this verdict's build step.
    pub fn needs_compile(&self) -> bool {
        self.is_compiled_source
            || self
                .matched
                .as_ref()
                .is_some_and(|rule| rule.config.recompile_main_process)
    }
}

/// Outcome of classifying one raw event.
#[derive(Debug, Clone)]
pub enum Classification {
    /// The configuration file was written: reload everything.
    ConfigChanged,
    /// A directory appeared and must be added to the watch set.
    AddDirectory(PathBuf),
    Verdict(Verdict),
}

/// Classifies raw events against one configuration generation.
pub struct EventClassifier {
    registry: Arc<WatchRegistry>,
    config_path: Option<PathBuf>,
    styles: Arc<dyn StyleSubsystem>,
}

impl EventClassifier {
    pub fn new(
        registry: Arc<WatchRegistry>,
        config_path: Option<PathBuf>,
        styles: Arc<dyn StyleSubsystem>,
    ) -> Self {
        Self {
            registry,
            config_path: config_path.map(path_clean::clean),
            styles,
        }
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub fn classify(&self, event: &RawEvent) -> Classification {
        let path = path_clean::clean(&event.path);
        let op = event.op;

        if self.is_config_path(&path) && op.intersects(OpFlags::WRITE | OpFlags::CREATE) {
            return Classification::ConfigChanged;
        }

        // A failed stat (removed file, permission error) is not fatal: the
        // path is classified from its name alone.
        let metadata = std::fs::metadata(&path).ok();

        if metadata.as_ref().is_some_and(|meta| meta.is_dir()) {
            if op.intersects(OpFlags::CREATE | OpFlags::RENAME) && !self.registry.is_ignored(&path) {
                return Classification::AddDirectory(path);
            }
            return Classification::Verdict(Verdict::ignored(path, op));
        }

        if self.registry.is_ignored(&path) {
            return Classification::Verdict(Verdict::ignored(path, op));
        }

        let declared = self.registry.first_declared(&path).cloned();
        let is_compiled_source = self.registry.is_compiled_extension(&path)
            && !declared
                .as_ref()
                .is_some_and(|rule| rule.config.treat_source_as_non_compiled);
        let is_style_entry_or_import = self.styles.is_style_dependency(&path);

        let matched = declared.or_else(|| {
            is_compiled_source.then(|| self.registry.default_rule().clone())
        });

        let is_ignored = matched.is_none() && !is_compiled_source && !is_style_entry_or_import;

        let is_chmod_only_no_content_change = !op.intersects(OpFlags::CONTENT)
            && metadata.as_ref().is_some_and(|meta| meta.len() > 0);

        let triggers_full_reset = matched
            .as_ref()
            .is_some_and(|rule| rule.config.triggers_full_reset());

        Classification::Verdict(Verdict {
            path,
            op,
            is_ignored,
            is_config_file: false,
            is_compiled_source,
            is_style_entry_or_import,
            matched,
            is_chmod_only_no_content_change,
            triggers_full_reset,
            coalesced: Vec::new(),
        })
    }

    fn is_config_path(&self, path: &Path) -> bool {
        self.config_path.as_deref() == Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::registry::RuleId;
    use crate::dev::style::{StyleKind, StylePayload};
    use crate::error::BuildError;
    use async_trait::async_trait;
    use reflow_config::{Builtin, HookStrategy, OnChangeHook, ReflowConfig, WatchedFileConfig};
    use std::fs;
    use tempfile::TempDir;

    struct Styles(Vec<PathBuf>);

    #[async_trait]
    impl StyleSubsystem for Styles {
        fn is_style_dependency(&self, path: &Path) -> bool {
            self.0.iter().any(|p| p == path)
        }

        async fn rebuild(&self) -> Result<StylePayload, BuildError> {
            Ok(StylePayload::default())
        }

        fn bundle(&self, _kind: StyleKind) -> Option<String> {
            None
        }
    }

    struct Fixture {
        dir: TempDir,
        classifier: EventClassifier,
    }

    impl Fixture {
        fn new(rules: Vec<WatchedFileConfig>, styles: &[&str]) -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = ReflowConfig::default();
            config.watch = rules;
            let registry = Arc::new(WatchRegistry::new(&config, dir.path()).unwrap());
            let styles = Styles(styles.iter().map(|s| dir.path().join(s)).collect());
            let classifier = EventClassifier::new(
                registry,
                Some(dir.path().join("reflow.toml")),
                Arc::new(styles),
            );
            Self { dir, classifier }
        }

        fn write(&self, rel: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, content).unwrap();
            path
        }

        fn verdict(&self, rel: &str, op: OpFlags) -> Verdict {
            match self
                .classifier
                .classify(&RawEvent::new(self.dir.path().join(rel), op))
            {
                Classification::Verdict(v) => v,
                other => panic!("expected verdict, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_config_write_short_circuits() {
        let fx = Fixture::new(vec![], &[]);
        fx.write("reflow.toml", "[dev]\n");
        let event = RawEvent::new(fx.dir.path().join("reflow.toml"), OpFlags::WRITE);
        assert!(matches!(
            fx.classifier.classify(&event),
            Classification::ConfigChanged
        ));
    }

    #[test]
    fn test_config_chmod_is_not_a_short_circuit() {
        let fx = Fixture::new(vec![], &[]);
        fx.write("reflow.toml", "[dev]\n");
        let verdict = fx.verdict("reflow.toml", OpFlags::CHMOD);
        assert!(verdict.is_ignored);
    }

    #[test]
    fn test_new_directory_is_added() {
        let fx = Fixture::new(vec![], &[]);
        fs::create_dir_all(fx.dir.path().join("src/handlers")).unwrap();
        let event = RawEvent::new(fx.dir.path().join("src/handlers"), OpFlags::CREATE);
        assert!(matches!(
            fx.classifier.classify(&event),
            Classification::AddDirectory(_)
        ));
    }

    #[test]
    fn test_compiled_source_uses_default_rule() {
        let fx = Fixture::new(vec![], &[]);
        fx.write("app/main.rs", "fn main() {}");
        let verdict = fx.verdict("app/main.rs", OpFlags::WRITE);
        assert!(verdict.is_compiled_source);
        assert!(!verdict.is_ignored);
        assert_eq!(verdict.matched.unwrap().id, RuleId::Default);
    }

    #[test]
    fn test_treat_source_as_non_compiled() {
        let fx = Fixture::new(
            vec![WatchedFileConfig {
                treat_source_as_non_compiled: true,
                ..WatchedFileConfig::new("build.rs")
            }],
            &[],
        );
        fx.write("build.rs", "fn main() {}");
        let verdict = fx.verdict("build.rs", OpFlags::WRITE);
        assert!(!verdict.is_compiled_source);
        assert_eq!(verdict.matched.unwrap().id, RuleId::Declared(0));
    }

    #[test]
    fn test_unmatched_non_compiled_is_ignored() {
        let fx = Fixture::new(vec![], &[]);
        fx.write("README.md", "# hi");
        assert!(fx.verdict("README.md", OpFlags::WRITE).is_ignored);
    }

    #[test]
    fn test_style_member_is_not_ignored() {
        let fx = Fixture::new(vec![], &["styles/main.css"]);
        fx.write("styles/main.css", "body{}");
        let verdict = fx.verdict("styles/main.css", OpFlags::WRITE);
        assert!(!verdict.is_ignored);
        assert!(verdict.is_style_only());
        assert!(verdict.matched.is_none());
    }

    #[test]
    fn test_chmod_only_requires_non_empty_file() {
        let fx = Fixture::new(vec![], &[]);
        fx.write("src/lib.rs", "pub fn f() {}");
        fx.write("src/empty.rs", "");

        assert!(fx.verdict("src/lib.rs", OpFlags::CHMOD).is_chmod_only_no_content_change);
        assert!(!fx.verdict("src/empty.rs", OpFlags::CHMOD).is_chmod_only_no_content_change);
        assert!(
            !fx.verdict("src/lib.rs", OpFlags::CHMOD | OpFlags::WRITE)
                .is_chmod_only_no_content_change
        );
    }

    #[test]
    fn test_stat_failure_is_not_chmod_only() {
        let fx = Fixture::new(vec![], &[]);
        let verdict = fx.verdict("src/gone.rs", OpFlags::CHMOD);
        assert!(!verdict.is_chmod_only_no_content_change);
        assert!(verdict.is_compiled_source);
    }

    #[test]
    fn test_full_reset_trigger() {
        let fx = Fixture::new(
            vec![WatchedFileConfig::new("reflow.d/**")
                .with_hook(OnChangeHook::builtin(Builtin::FullReset, HookStrategy::Pre))],
            &[],
        );
        fx.write("reflow.d/extra.toml", "x = 1");
        assert!(fx.verdict("reflow.d/extra.toml", OpFlags::WRITE).triggers_full_reset);
    }
}
