//! Error types shared across the probe.

use std::fmt::{Display, Formatter};

/// Shared result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure modes surfaced to callers.
///
/// Decode failures on individual transport lines never appear here: the
/// transport skips them. A turn that runs out of time is not an error either;
/// it is reported as [`TurnStatus::TimedOut`](crate::session::TurnStatus::TimedOut).
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The peer process could not be launched.
    Spawn(String),
    /// Writing to the peer's stdin failed (stream closed or serialisation error).
    Write(String),
    /// `initialize` timed out or returned an error payload.
    Handshake(String),
    /// An expected response shape was missing a required field.
    Protocol(String),
    /// A bounded wait that the session cannot continue without expired.
    Timeout(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Write(msg) => write!(f, "write: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("unexpected message shape: {err}"))
    }
}
