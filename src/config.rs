//! Probe configuration parsing, environment overrides, and validation.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! the `CODEX_APP_SERVER_*` environment variables, then CLI flags (applied
//! by the binary).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// Peer launch command, e.g. `codex app-server`.
pub const ENV_COMMAND: &str = "CODEX_APP_SERVER_CMD";
/// Trace file path, or `1`/`true`/`yes` for [`DEFAULT_TRACE_FILE`].
pub const ENV_TRACE: &str = "CODEX_APP_SERVER_DUMP";
/// Debug-logging toggle.
pub const ENV_DEBUG: &str = "CODEX_APP_SERVER_DEBUG";
/// Turn timeout in seconds.
pub const ENV_TURN_TIMEOUT: &str = "CODEX_APP_SERVER_TIMEOUT";

/// Trace file used when the trace setting is a bare boolean.
pub const DEFAULT_TRACE_FILE: &str = "dump.jsonl";

fn default_command() -> String {
    "codex app-server".into()
}

fn default_turn_timeout_seconds() -> u64 {
    60
}

fn default_request_timeout_seconds() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_client_name() -> String {
    "app-server-probe".into()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

/// Settings for one probe run.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProbeConfig {
    /// Peer launch command; split on whitespace into program and arguments.
    #[serde(default = "default_command")]
    pub command: String,
    /// Optional append-only trace of every observed message.
    #[serde(default)]
    pub trace_path: Option<PathBuf>,
    /// Raise the crate's log level to `debug`.
    #[serde(default)]
    pub debug: bool,
    /// Overall bound on one turn, in seconds.
    #[serde(default = "default_turn_timeout_seconds")]
    pub turn_timeout_seconds: u64,
    /// Bound on `initialize` and `thread/start` responses, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Inbox polling granularity, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// `clientInfo.name` sent with `initialize`.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// `clientInfo.version` sent with `initialize`.
    #[serde(default = "default_client_version")]
    pub client_version: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            trace_path: None,
            debug: false,
            turn_timeout_seconds: default_turn_timeout_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
            client_name: default_client_name(),
            client_version: default_client_version(),
        }
    }
}

impl ProbeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay the `CODEX_APP_SERVER_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `CODEX_APP_SERVER_TIMEOUT` is not a
    /// whole number of seconds.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| env::var(key).ok())
    }

    /// Overlay environment-style settings obtained through `lookup`.
    ///
    /// Blank values are ignored so an exported-but-empty variable never
    /// clears a value from the config file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the timeout value does not parse.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = move |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        if let Some(command) = get(ENV_COMMAND) {
            self.command = command;
        }
        if let Some(trace) = get(ENV_TRACE) {
            self.trace_path = resolve_trace_path(&trace);
        }
        if let Some(flag) = get(ENV_DEBUG) {
            self.debug = parse_flag(&flag);
        }
        if let Some(secs) = get(ENV_TURN_TIMEOUT) {
            self.turn_timeout_seconds = secs.parse().map_err(|err| {
                AppError::Config(format!("{ENV_TURN_TIMEOUT} must be whole seconds: {err}"))
            })?;
        }

        debug!(command = %self.command, trace = ?self.trace_path, "environment applied");
        Ok(())
    }

    /// Check invariants the session relies on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty command, a zero timeout, or a
    /// zero poll interval.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(AppError::Config("command must not be empty".into()));
        }
        if self.turn_timeout_seconds == 0 {
            return Err(AppError::Config(
                "turn_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "request_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Split [`command`](Self::command) into program and arguments.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the command is blank.
    pub fn command_line(&self) -> Result<(String, Vec<String>)> {
        let mut parts = self.command.split_whitespace().map(str::to_owned);
        let program = parts
            .next()
            .ok_or_else(|| AppError::Config("command must not be empty".into()))?;
        Ok((program, parts.collect()))
    }

    /// Turn timeout as a [`Duration`].
    #[must_use]
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_seconds)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Interpret `1`, `true`, or `yes` (any case) as enabled.
#[must_use]
pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Map a trace setting to a file path.
///
/// A boolean-looking value selects [`DEFAULT_TRACE_FILE`]; blank disables tracing.
#[must_use]
pub fn resolve_trace_path(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        None
    } else if parse_flag(raw) {
        Some(PathBuf::from(DEFAULT_TRACE_FILE))
    } else {
        Some(PathBuf::from(raw))
    }
}
