//! Peer process transport.
//!
//! Owns the spawned peer and its three pipes:
//! - stdin is wrapped in a [`FramedWrite`] behind an async mutex so each
//!   [`Transport::write_line`] lands on the wire as one uninterrupted line;
//! - stdout is handed out once, as a lazy [`MessageStream`];
//! - stderr is drained by a background task and re-emitted at `DEBUG` so the
//!   peer never blocks on a full pipe.

use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures_util::stream::{self, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::rpc::codec::{Frame, RpcCodec};
use crate::rpc::message::Message;
use crate::{AppError, Result};

/// Lazy, unbounded sequence of decoded messages; ends when the stream closes.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Decode messages from any line-oriented byte source.
///
/// Blank lines, non-JSON text, JSON that is not an object, oversized lines,
/// and non-UTF-8 lines are skipped. The sequence ends at EOF or on a read
/// error.
#[must_use]
pub fn decode_messages<R>(reader: R) -> MessageStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let framed = FramedRead::new(reader, RpcCodec::new());

    Box::pin(stream::unfold(framed, |mut framed| async move {
        loop {
            match framed.next().await? {
                Ok(Frame::Line(line)) => {
                    if let Some(message) = Message::parse_line(&line) {
                        return Some((message, framed));
                    }
                    if !line.trim().is_empty() {
                        trace!(line = %line, "transport: skipping non-message line");
                    }
                }
                Ok(Frame::Discarded(reason)) => {
                    debug!(?reason, "transport: discarded inbound line");
                }
                Err(err) => {
                    debug!(%err, "transport: read failed, ending message stream");
                    return None;
                }
            }
        }
    }))
}

/// Connection to a spawned peer speaking line-delimited JSON.
#[derive(Debug)]
pub struct Transport {
    program: String,
    child: Child,
    writer: Mutex<FramedWrite<ChildStdin, RpcCodec>>,
    stdout: Option<ChildStdout>,
    stderr_task: JoinHandle<()>,
    terminated: bool,
}

impl Transport {
    /// Spawn `program` with `args` and piped stdio.
    ///
    /// The child is `kill_on_drop`, so dropping the transport never leaks
    /// the peer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the executable cannot be launched or a
    /// pipe cannot be captured.
    pub fn start(program: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to launch `{program}`: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture peer stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture peer stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture peer stderr".into()))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, RpcCodec::new());
            while let Some(Ok(frame)) = lines.next().await {
                if let Frame::Line(line) = frame {
                    debug!(target: "app_server_probe::peer", "{line}");
                }
            }
        });

        info!(program, ?args, pid = ?child.id(), "peer process started");

        Ok(Self {
            program: program.to_owned(),
            child,
            writer: Mutex::new(FramedWrite::new(stdin, RpcCodec::new())),
            stdout: Some(stdout),
            stderr_task,
            terminated: false,
        })
    }

    /// Serialise `message` as one JSON line and write it to the peer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Write` if serialisation fails or the peer's stdin
    /// is closed.
    pub async fn write_line(&self, message: &Message) -> Result<()> {
        let line = serde_json::to_string(message)
            .map_err(|err| AppError::Write(format!("failed to serialise message: {err}")))?;

        let mut writer = self.writer.lock().await;
        writer.send(line).await.map_err(|err| {
            warn!(program = %self.program, %err, "transport: write to peer stdin failed");
            AppError::Write(format!("peer stdin closed: {err}"))
        })?;

        trace!(id = ?message.id, method = ?message.method, "transport: line written");
        Ok(())
    }

    /// Take the decoded message sequence from the peer's stdout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the sequence has already been taken.
    pub fn messages(&mut self) -> Result<MessageStream> {
        self.stdout
            .take()
            .map(decode_messages)
            .ok_or_else(|| AppError::Io("peer message stream already taken".into()))
    }

    /// Ask the peer to exit. Idempotent; never waits for the exit.
    ///
    /// Sends `SIGTERM` on unix and a kill request elsewhere. Once the peer
    /// exits its stdout closes, which ends any [`MessageStream`] consumer.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.stderr_task.abort();

        let Some(pid) = self.child.id() else {
            debug!(program = %self.program, "terminate: peer already exited");
            return;
        };

        match signal_terminate(&mut self.child, pid) {
            Ok(()) => info!(program = %self.program, pid, "terminate: requested peer exit"),
            Err(err) => warn!(program = %self.program, pid, %err, "terminate: request failed"),
        }
    }

    /// `true` once [`terminate`](Self::terminate) has been called.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Wait up to `timeout` for the peer to exit.
    ///
    /// Returns `None` if it is still running when the timeout elapses.
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                warn!(program = %self.program, %err, "error waiting for peer process");
                None
            }
            Err(_elapsed) => None,
        }
    }
}

#[cfg(unix)]
fn signal_terminate(_child: &mut Child, pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| AppError::Io(format!("pid {pid} out of range")))?;
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(AppError::Io(format!("SIGTERM failed: {err}"))),
    }
}

#[cfg(not(unix))]
fn signal_terminate(child: &mut Child, _pid: u32) -> Result<()> {
    child
        .start_kill()
        .map_err(|err| AppError::Io(format!("kill failed: {err}")))
}
