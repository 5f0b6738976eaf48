//! Diagnostic trace of observed peer messages.
//!
//! Writes one JSON object per line to a file, truncating long encodings.
//! The sink is a pure side effect: write failures are logged at `WARN` and
//! otherwise ignored.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::rpc::message::Message;
use crate::{AppError, Result};

/// Encoded messages longer than this many characters are cut.
pub const MAX_TRACE_CHARS: usize = 2000;

/// Marker appended to a cut encoding.
pub const TRUNCATION_MARKER: &str = "...\" (truncated)";

/// Append-only JSONL trace file.
#[derive(Debug)]
pub struct TraceSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl TraceSink {
    /// Create (or empty) the trace file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| {
                AppError::Io(format!("failed to create trace file {}: {err}", path.display()))
            })?;

        info!(path = %path.display(), "tracing peer messages to file");
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the trace file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `message` as one (possibly truncated) JSON line.
    pub fn record(&self, message: &Message) {
        let encoded = match serde_json::to_string(message) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(%err, "trace: failed to encode message");
                return;
            }
        };
        let line = truncate_encoding(&encoded);

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            warn!(path = %self.path.display(), %err, "trace: write failed");
        }
    }
}

/// Cut `encoded` to [`MAX_TRACE_CHARS`] characters plus [`TRUNCATION_MARKER`].
#[must_use]
pub fn truncate_encoding(encoded: &str) -> String {
    match encoded.char_indices().nth(MAX_TRACE_CHARS) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &encoded[..cut]),
        None => encoded.to_owned(),
    }
}
