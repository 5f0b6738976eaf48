//! Conversation session against an app-server peer.
//!
//! The session drives the protocol in a fixed order:
//!
//! ```text
//! Uninitialized --initialize--> Initialized --thread/start--> ThreadStarted
//!                                                               |   ^
//!                                                     turn/start|   |turn ends
//!                                                               v   |
//!                                                            TurnInFlight
//! ```
//!
//! `initialize` and `thread/start` failures are fatal and close the session.
//! A turn that does not complete in time is not an error: its
//! [`TurnOutcome`] carries the partial reply and the methods observed.

pub mod protocol;
pub mod turn;

use std::collections::BTreeSet;
use std::process::ExitStatus;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::rpc::correlator::{Awaited, Correlator};
use crate::rpc::message::{Message, RequestId};
use crate::rpc::router::{spawn_router, Inbox};
use crate::rpc::trace::TraceSink;
use crate::rpc::transport::Transport;
use crate::{AppError, Result};

use self::protocol::{
    ClientInfo, InitializeParams, InputItem, ThreadStartParams, ThreadStartResponse,
    TurnStartParams, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_THREAD_START,
    METHOD_TURN_START,
};
pub use self::turn::{TurnAccumulator, TurnOutcome, TurnStatus};

/// How long [`TurnSession::shutdown`] waits for the peer to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Protocol position of a [`TurnSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet.
    Uninitialized,
    /// `initialize` succeeded.
    Initialized,
    /// A thread id is known; turns may be started.
    ThreadStarted,
    /// A turn is being drained.
    TurnInFlight,
    /// A fatal error occurred or the session was shut down.
    Closed,
}

/// Tunables of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// `clientInfo` sent with `initialize`.
    pub client_name: String,
    /// `clientInfo.version` sent with `initialize`.
    pub client_version: String,
    /// Bound on `initialize` and `thread/start` responses.
    pub request_timeout: Duration,
    /// Bound on one turn.
    pub turn_timeout: Duration,
    /// Inbox re-check granularity.
    pub poll_interval: Duration,
}

impl From<&ProbeConfig> for SessionOptions {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            client_name: config.client_name.clone(),
            client_version: config.client_version.clone(),
            request_timeout: config.request_timeout(),
            turn_timeout: config.turn_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// One peer process, one conversation thread, any number of turns.
#[derive(Debug)]
pub struct TurnSession {
    transport: Transport,
    inbox: Inbox,
    correlator: Correlator,
    router: JoinHandle<()>,
    cancel: CancellationToken,
    options: SessionOptions,
    next_id: RequestId,
    state: SessionState,
    thread_id: Option<String>,
    finished_turn_ids: BTreeSet<String>,
}

impl TurnSession {
    /// Launch the configured peer and start routing its output.
    ///
    /// A trace file that cannot be created is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty command and `AppError::Spawn`
    /// if the peer cannot be launched.
    pub fn start(config: &ProbeConfig) -> Result<Self> {
        let (program, args) = config.command_line()?;
        let transport = Transport::start(&program, &args)?;

        let trace = config
            .trace_path
            .as_ref()
            .and_then(|path| match TraceSink::create(path) {
                Ok(sink) => Some(sink),
                Err(err) => {
                    warn!(%err, "continuing without message trace");
                    None
                }
            });

        Self::with_transport(transport, SessionOptions::from(config), trace)
    }

    /// Wrap an already started transport.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the transport's message stream was taken.
    pub fn with_transport(
        mut transport: Transport,
        options: SessionOptions,
        trace: Option<TraceSink>,
    ) -> Result<Self> {
        let inbox = Inbox::new();
        let cancel = CancellationToken::new();
        let router = spawn_router(transport.messages()?, inbox.clone(), trace, cancel.clone());

        Ok(Self {
            correlator: Correlator::new(inbox.clone(), options.poll_interval),
            transport,
            inbox,
            router,
            cancel,
            options,
            next_id: 0,
            state: SessionState::Uninitialized,
            thread_id: None,
            finished_turn_ids: BTreeSet::new(),
        })
    }

    /// Start the peer, then run `initialize` and `thread/start`.
    ///
    /// # Errors
    ///
    /// Any error of [`start`](Self::start), [`initialize`](Self::initialize),
    /// or [`start_thread`](Self::start_thread).
    pub async fn connect(config: &ProbeConfig) -> Result<Self> {
        let mut session = Self::start(config)?;
        session.initialize().await?;
        session.start_thread().await?;
        Ok(session)
    }

    /// Current protocol position.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Thread id, once `thread/start` succeeded.
    #[must_use]
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Messages routed but not yet claimed; useful after a failure.
    #[must_use]
    pub fn pending_messages(&self) -> Vec<Message> {
        self.inbox.snapshot()
    }

    /// Send `initialize`, wait for its response, then send `initialized`.
    ///
    /// Returns the response's `result` payload.
    ///
    /// # Errors
    ///
    /// - `AppError::Handshake` if no response arrives within the request
    ///   timeout or the response carries `error`.
    /// - `AppError::Write` if the peer's stdin is closed.
    /// - `AppError::Protocol` if called out of order.
    pub async fn initialize(&mut self) -> Result<Value> {
        self.expect_state(SessionState::Uninitialized, METHOD_INITIALIZE)?;

        let id = self.next_request_id();
        let params = InitializeParams {
            client_info: ClientInfo {
                name: self.options.client_name.clone(),
                version: self.options.client_version.clone(),
            },
        };
        self.send_request(id, METHOD_INITIALIZE, &params).await?;

        let response = match self
            .correlator
            .await_response(id, self.options.request_timeout)
            .await
        {
            Awaited::Response(response) => response,
            Awaited::TimedOut => {
                let err = AppError::Handshake(format!(
                    "no response to initialize within {:?} ({} unclaimed messages)",
                    self.options.request_timeout,
                    self.inbox.len()
                ));
                return Err(self.fail(err));
            }
        };
        if let Some(error) = response.error {
            let err = AppError::Handshake(format!("initialize returned error: {error}"));
            return Err(self.fail(err));
        }

        if let Err(err) = self
            .transport
            .write_line(&Message::notification(METHOD_INITIALIZED, None))
            .await
        {
            return Err(self.fail(err));
        }

        self.state = SessionState::Initialized;
        info!(request_id = id, "session initialized");
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send `thread/start` and record the returned thread id.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout` if no response arrives within the request timeout.
    /// - `AppError::Protocol` if the response carries `error`, lacks a
    ///   non-empty `result.thread.id`, or the call is out of order.
    /// - `AppError::Write` if the peer's stdin is closed.
    pub async fn start_thread(&mut self) -> Result<String> {
        self.expect_state(SessionState::Initialized, METHOD_THREAD_START)?;

        let id = self.next_request_id();
        self.send_request(id, METHOD_THREAD_START, &ThreadStartParams::default())
            .await?;

        let response = match self
            .correlator
            .await_response(id, self.options.request_timeout)
            .await
        {
            Awaited::Response(response) => response,
            Awaited::TimedOut => {
                let err = AppError::Timeout(format!(
                    "no response to thread/start within {:?}",
                    self.options.request_timeout
                ));
                return Err(self.fail(err));
            }
        };
        if let Some(error) = response.error {
            let err = AppError::Protocol(format!("thread/start returned error: {error}"));
            return Err(self.fail(err));
        }

        let result = response.result.unwrap_or(Value::Null);
        let thread_id = match serde_json::from_value::<ThreadStartResponse>(result.clone()) {
            Ok(parsed) if !parsed.thread.id.is_empty() => parsed.thread.id,
            Ok(_) => {
                let err = AppError::Protocol("thread/start returned an empty thread.id".into());
                return Err(self.fail(err));
            }
            Err(parse_err) => {
                let err = AppError::Protocol(format!(
                    "thread/start result has no thread.id ({parse_err}): {result}"
                ));
                return Err(self.fail(err));
            }
        };

        info!(thread_id = %thread_id, "thread started");
        self.state = SessionState::ThreadStarted;
        self.thread_id = Some(thread_id.clone());
        Ok(thread_id)
    }

    /// Run one turn with `input` on the current thread.
    ///
    /// Notifications left over from earlier turns are discarded first. The
    /// inbox is then drained until `turn/completed`, the turn timeout, or
    /// the end of the peer's output, whichever comes first.
    ///
    /// # Errors
    ///
    /// - `AppError::Write` if `turn/start` cannot be sent.
    /// - `AppError::Protocol` if no thread has been started.
    pub async fn run_turn(&mut self, input: Vec<InputItem>) -> Result<TurnOutcome> {
        self.expect_state(SessionState::ThreadStarted, METHOD_TURN_START)?;
        let thread_id = self
            .thread_id
            .clone()
            .ok_or_else(|| AppError::Protocol("no thread id recorded".into()))?;

        let purged = self.inbox.purge_notifications();
        if purged > 0 {
            debug!(purged, "discarded notifications left from an earlier turn");
        }

        let id = self.next_request_id();
        let params = TurnStartParams {
            thread_id: thread_id.clone(),
            input,
        };
        self.send_request(id, METHOD_TURN_START, &params).await?;
        self.state = SessionState::TurnInFlight;
        debug!(request_id = id, thread_id = %thread_id, "turn started");

        let mut turn = TurnAccumulator::after_turns(id, self.finished_turn_ids.clone());
        let deadline = Instant::now() + self.options.turn_timeout;
        let mut peer_closed = false;

        loop {
            while let Some(message) = self.inbox.pop_front() {
                turn.apply(&message);
                if turn.is_completed() {
                    break;
                }
            }
            if turn.is_completed() {
                break;
            }
            if self.router.is_finished() && self.inbox.is_empty() {
                warn!(request_id = id, "peer output closed before turn/completed");
                peer_closed = true;
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.inbox
                .wait(self.options.poll_interval.min(deadline - now))
                .await;
        }

        self.state = SessionState::ThreadStarted;
        let outcome = turn.finish(peer_closed);
        if let Some(turn_id) = &outcome.turn_id {
            self.finished_turn_ids.insert(turn_id.clone());
        }
        info!(
            request_id = id,
            status = ?outcome.status,
            reply_chars = outcome.reply.chars().count(),
            observed = outcome.observed_methods.len(),
            "turn finished"
        );
        Ok(outcome)
    }

    /// Run one turn with a single text input.
    ///
    /// # Errors
    ///
    /// See [`run_turn`](Self::run_turn).
    pub async fn run_text_turn(&mut self, text: &str) -> Result<TurnOutcome> {
        self.run_turn(vec![InputItem::text(text)]).await
    }

    /// Stop routing, terminate the peer, and wait briefly for it to exit.
    pub async fn shutdown(mut self) -> Option<ExitStatus> {
        self.cancel.cancel();
        self.transport.terminate();
        self.state = SessionState::Closed;

        let status = self.transport.wait_for_exit(SHUTDOWN_GRACE).await;
        if let Err(err) = (&mut self.router).await {
            warn!(%err, "router task ended abnormally");
        }
        info!(?status, "session shut down");
        status
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn send_request<P: Serialize>(
        &mut self,
        id: RequestId,
        method: &str,
        params: &P,
    ) -> Result<()> {
        let params = serde_json::to_value(params)
            .map_err(|err| AppError::Write(format!("failed to encode {method} params: {err}")))?;
        if let Err(err) = self
            .transport
            .write_line(&Message::request(id, method, params))
            .await
        {
            return Err(self.fail(err));
        }
        debug!(request_id = id, method, "request sent");
        Ok(())
    }

    fn expect_state(&self, expected: SessionState, method: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(AppError::Protocol(format!(
                "{method} requires state {expected:?}, session is {:?}",
                self.state
            )))
        }
    }

    fn fail(&mut self, err: AppError) -> AppError {
        warn!(%err, state = ?self.state, "session aborted");
        self.state = SessionState::Closed;
        self.transport.terminate();
        err
    }
}

impl Drop for TurnSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
