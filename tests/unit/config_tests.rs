//! Unit tests for configuration parsing, environment overlay, and validation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;

use app_server_probe::config::{
    parse_flag, resolve_trace_path, ProbeConfig, DEFAULT_TRACE_FILE, ENV_COMMAND, ENV_DEBUG,
    ENV_TRACE, ENV_TURN_TIMEOUT,
};
use app_server_probe::AppError;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

// ── Defaults and TOML ─────────────────────────────────────────────────────────

/// Defaults target `codex app-server` with a 60 s turn timeout.
#[test]
fn defaults_are_sensible() {
    let config = ProbeConfig::default();

    assert_eq!(config.command, "codex app-server");
    assert_eq!(config.trace_path, None);
    assert!(!config.debug);
    assert_eq!(config.turn_timeout(), Duration::from_secs(60));
    assert_eq!(config.request_timeout(), Duration::from_secs(5));
    assert_eq!(config.poll_interval(), Duration::from_millis(100));
    assert!(config.validate().is_ok());
}

/// An empty TOML document yields the defaults.
#[test]
fn empty_toml_equals_defaults() {
    assert_eq!(ProbeConfig::from_toml_str("").unwrap(), ProbeConfig::default());
}

/// Fields given in TOML override defaults; others keep theirs.
#[test]
fn partial_toml_overrides_named_fields() {
    let config = ProbeConfig::from_toml_str(
        r#"
command = "my-agent serve --stdio"
turn_timeout_seconds = 5
trace_path = "/tmp/trace.jsonl"
"#,
    )
    .unwrap();

    assert_eq!(config.command, "my-agent serve --stdio");
    assert_eq!(config.turn_timeout_seconds, 5);
    assert_eq!(config.trace_path, Some(PathBuf::from("/tmp/trace.jsonl")));
    assert_eq!(config.request_timeout_seconds, 5);
}

/// Malformed TOML is a config error.
#[test]
fn invalid_toml_is_config_error() {
    let err = ProbeConfig::from_toml_str("command = [").unwrap_err();
    assert!(matches!(err, AppError::Config(_)), "{err}");
}

/// A config file is read from disk.
#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("probe.toml");
    std::fs::write(&path, "debug = true\n").unwrap();

    let config = ProbeConfig::load_from_path(&path).unwrap();
    assert!(config.debug);

    let missing = ProbeConfig::load_from_path(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(missing, AppError::Config(_)));
}

// ── Validation ────────────────────────────────────────────────────────────────

/// Blank commands and zero durations are rejected.
#[test]
fn validation_rejects_unusable_values() {
    for raw in [
        "command = \"   \"",
        "turn_timeout_seconds = 0",
        "request_timeout_seconds = 0",
        "poll_interval_ms = 0",
    ] {
        let err = ProbeConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, AppError::Config(_)), "{raw}: {err}");
    }
}

/// The command splits on whitespace into program and arguments.
#[test]
fn command_line_splits_on_whitespace() {
    let config = ProbeConfig {
        command: "  codex   app-server --flag ".into(),
        ..ProbeConfig::default()
    };
    let (program, args) = config.command_line().unwrap();
    assert_eq!(program, "codex");
    assert_eq!(args, vec!["app-server", "--flag"]);

    let blank = ProbeConfig {
        command: String::new(),
        ..ProbeConfig::default()
    };
    assert!(blank.command_line().is_err());
}

// ── Environment overlay ───────────────────────────────────────────────────────

/// Every recognised variable is applied.
#[test]
fn env_overlay_applies_all_variables() {
    let mut config = ProbeConfig::default();
    config
        .apply_env_from(env_of(&[
            (ENV_COMMAND, "dummy-peer --x"),
            (ENV_TRACE, "out/trace.jsonl"),
            (ENV_DEBUG, "yes"),
            (ENV_TURN_TIMEOUT, "7"),
        ]))
        .unwrap();

    assert_eq!(config.command, "dummy-peer --x");
    assert_eq!(config.trace_path, Some(PathBuf::from("out/trace.jsonl")));
    assert!(config.debug);
    assert_eq!(config.turn_timeout(), Duration::from_secs(7));
}

/// Blank variables leave existing values alone.
#[test]
fn blank_env_values_are_ignored() {
    let mut config = ProbeConfig {
        command: "from-file".into(),
        ..ProbeConfig::default()
    };
    config
        .apply_env_from(env_of(&[(ENV_COMMAND, "  "), (ENV_TRACE, "")]))
        .unwrap();

    assert_eq!(config.command, "from-file");
    assert_eq!(config.trace_path, None);
}

/// A non-numeric timeout is a config error.
#[test]
fn bad_timeout_is_config_error() {
    let mut config = ProbeConfig::default();
    let err = config
        .apply_env_from(env_of(&[(ENV_TURN_TIMEOUT, "soon")]))
        .unwrap_err();
    assert!(err.to_string().contains(ENV_TURN_TIMEOUT), "{err}");
}

/// Boolean-looking trace settings select the default file.
#[test]
fn trace_setting_resolution() {
    for flag in ["1", "true", "YES"] {
        assert_eq!(resolve_trace_path(flag), Some(PathBuf::from(DEFAULT_TRACE_FILE)));
    }
    assert_eq!(resolve_trace_path(" "), None);
    assert_eq!(resolve_trace_path("x.jsonl"), Some(PathBuf::from("x.jsonl")));
    assert!(parse_flag("True"));
    assert!(!parse_flag("0"));
    assert!(!parse_flag("off"));
}

/// The real process environment is read by `apply_env`.
#[test]
#[serial]
fn apply_env_reads_process_environment() {
    std::env::set_var(ENV_COMMAND, "env-peer serve");
    std::env::set_var(ENV_TRACE, "1");
    let mut config = ProbeConfig::default();
    let result = config.apply_env();
    std::env::remove_var(ENV_COMMAND);
    std::env::remove_var(ENV_TRACE);

    result.unwrap();
    assert_eq!(config.command, "env-peer serve");
    assert_eq!(config.trace_path, Some(PathBuf::from(DEFAULT_TRACE_FILE)));
}
