//! Watched-file registry.
//!
//! Compiles the declared `[[watch]]` rules and the built-in default rule
//! (compiled source anywhere under the root) into glob matchers. Lookups take
//! absolute paths and match on the path relative to the watch root.

use globset::{Glob, GlobMatcher, GlobSet, GlobSetBuilder};
use reflow_config::{ConfigError, HookStrategy, OnChangeHook, ReflowConfig, WatchedFileConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// Identity of a rule, used to dedupe verdicts within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleId {
    /// Index into the declared rules, in declaration order.
    Declared(usize),
    /// The built-in compiled-source rule.
    Default,
}

/// A rule that matched a path, together with its compiled hook excludes.
#[derive(Debug, Clone)]
pub struct MatchedRule {
    pub id: RuleId,
    pub config: Arc<WatchedFileConfig>,
    excludes: Arc<[GlobSet]>,
}

impl MatchedRule {
    /// Hooks of `strategy` that apply to at least one of the changed
    /// root-relative paths, in declaration order.
    ///
    /// The full-reset sentinel is never returned; it is acted on before any
    /// hook runs.
    pub fn hooks_for<'a>(
        &'a self,
        strategy: HookStrategy,
        changed: &'a [PathBuf],
    ) -> impl Iterator<Item = &'a OnChangeHook> + 'a {
        self.config
            .on_change
            .iter()
            .zip(self.excludes.iter())
            .filter(move |(hook, exclude)| {
                hook.strategy == strategy
                    && !hook.command.is_full_reset()
                    && changed.iter().any(|path| !exclude.is_match(path))
            })
            .map(|(hook, _)| hook)
    }
}

#[derive(Debug)]
struct CompiledRule {
    matched: MatchedRule,
    matcher: GlobMatcher,
}

/// Compiled watch rules for one configuration generation.
#[derive(Debug)]
pub struct WatchRegistry {
    root: PathBuf,
    rules: Vec<CompiledRule>,
    default_rule: MatchedRule,
    compiled_extensions: Vec<String>,
    ignore: GlobSet,
}

impl WatchRegistry {
    /// Build the registry for `config`, resolving globs against `root`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a pattern does not compile.
    pub fn new(config: &ReflowConfig, root: impl Into<PathBuf>) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.watch.len());
        for (index, rule) in config.watch.iter().enumerate() {
            let field = format!("watch[{index}]");
            let matcher = compile_glob(&field, &rule.pattern)?.compile_matcher();
            let excludes = rule
                .on_change
                .iter()
                .map(|hook| glob_set(&format!("{field}.on_change.exclude"), &hook.exclude))
                .collect::<Result<Vec<_>>>()?;
            rules.push(CompiledRule {
                matched: MatchedRule {
                    id: RuleId::Declared(index),
                    config: Arc::new(rule.clone()),
                    excludes: excludes.into(),
                },
                matcher,
            });
        }

        let default_config = WatchedFileConfig::new(default_pattern(&config.dev.compiled_extensions));
        let default_rule = MatchedRule {
            id: RuleId::Default,
            config: Arc::new(default_config),
            excludes: Arc::from(Vec::new()),
        };

        Ok(Self {
            root: root.into(),
            rules,
            default_rule,
            compiled_extensions: config
                .dev
                .compiled_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignore: glob_set("dev.ignore", &config.dev.ignore)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compiled ignore globs, for the watcher.
    pub fn ignore_set(&self) -> GlobSet {
        self.ignore.clone()
    }

    /// Path relative to the watch root, or `None` outside of it.
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }

    /// Outside the root, or matched by `dev.ignore`.
    pub fn is_ignored(&self, path: &Path) -> bool {
        match self.relative(path) {
            Some(relative) => self.ignore.is_match(relative),
            None => true,
        }
    }

    pub fn is_compiled_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.compiled_extensions
                    .iter()
                    .any(|compiled| compiled.eq_ignore_ascii_case(ext))
            })
    }

    /// First declared rule matching `path`, in declaration order.
    pub fn first_declared(&self, path: &Path) -> Option<&MatchedRule> {
        let relative = self.relative(path)?;
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(relative))
            .map(|rule| &rule.matched)
    }

    /// The built-in rule for compiled source anywhere under the root.
    pub fn default_rule(&self) -> &MatchedRule {
        &self.default_rule
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn default_pattern(extensions: &[String]) -> String {
    match extensions {
        [] => "**/*".to_string(),
        [single] => format!("**/*.{}", single.trim_start_matches('.')),
        many => {
            let joined: Vec<&str> = many.iter().map(|e| e.trim_start_matches('.')).collect();
            format!("**/*.{{{}}}", joined.join(","))
        }
    }
}

fn compile_glob(field: &str, pattern: &str) -> Result<Glob> {
    Glob::new(pattern).map_err(|e| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            hint: Some(format!("invalid glob '{pattern}': {e}")),
        }
        .into()
    })
}

fn glob_set(field: &str, patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_glob(field, pattern)?);
    }
    builder.build().map_err(|e| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            hint: Some(e.to_string()),
        }
        .into()
    })
}
