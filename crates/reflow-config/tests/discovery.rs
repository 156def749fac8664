//! Tests for config file discovery and loading

use reflow_config::{
    ConfigDiscovery, ConfigError, DEFAULT_CONFIG_FILE, HookCommand, HookStrategy, ReflowConfig,
    WatchedFileConfig,
};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn discovers_reflow_toml() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(DEFAULT_CONFIG_FILE),
        r#"
[dev]
port = 4100
compiled_extensions = ["go"]

[app]
build_command = "go build -o dist/app ./cmd/app"
launch_command = "./dist/app"
health_check_url = "http://127.0.0.1:8080/healthz"

[styles]
non_critical_entry = "styles/main.css"

[[watch]]
pattern = "templates/**/*.html"
restart_process_only = true

[[watch]]
pattern = "schema/**/*.sql"
run_hooks_only = true
on_change = [{ command = "sqlc generate", strategy = "pre" }]

[[watch]]
pattern = "reflow.d/**"
on_change = [{ builtin = "full-reset" }]
"#,
    )
    .unwrap();

    let discovery = ConfigDiscovery::new(dir.path());
    let found = discovery.find().unwrap();
    assert_eq!(found.file_name().unwrap(), DEFAULT_CONFIG_FILE);

    let config = discovery.load().unwrap();
    assert_eq!(config.dev.port, 4100);
    assert_eq!(config.dev.compiled_extensions, vec!["go".to_string()]);
    assert_eq!(config.dev.debounce_ms, 30);
    assert_eq!(
        config.styles.non_critical_entry,
        Some(PathBuf::from("styles/main.css"))
    );

    assert_eq!(config.watch.len(), 3);
    assert!(config.watch[0].restart_process_only);
    assert_eq!(
        config.watch[1].on_change[0].command,
        HookCommand::Shell("sqlc generate".into())
    );
    assert_eq!(config.watch[1].on_change[0].strategy, HookStrategy::Pre);
    assert!(config.watch[2].triggers_full_reset());
}

#[test]
fn rejects_unknown_keys() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(DEFAULT_CONFIG_FILE),
        r#"
[[watch]]
pattern = "**/*.sql"
restart = true
"#,
    )
    .unwrap();

    let err = ConfigDiscovery::new(dir.path()).load().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn rejects_hook_with_command_and_builtin() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(DEFAULT_CONFIG_FILE),
        r#"
[[watch]]
pattern = "**/*.sql"
on_change = [{ command = "make", builtin = "build-hook" }]
"#,
    )
    .unwrap();

    assert!(ConfigDiscovery::new(dir.path()).load().is_err());
}

#[test]
fn load_from_reads_an_explicit_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");

    let mut config = ReflowConfig::default();
    config.app.build_command = "cargo build".into();
    config.app.launch_command = "target/debug/api".into();
    config.watch.push(WatchedFileConfig::new("templates/**"));
    fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

    let loaded = ConfigDiscovery::load_from(&path).unwrap();
    assert_eq!(loaded.app, config.app);
    assert_eq!(loaded.watch, config.watch);
    assert_eq!(loaded.watch_root(), dir.path().join("."));
}

#[test]
fn load_from_missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let err = ConfigDiscovery::load_from(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }));
}
