//! Request/response correlation over the shared inbox.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::rpc::message::{Message, RequestId};
use crate::rpc::router::Inbox;

/// Polling granularity used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of waiting for a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Awaited {
    /// The matching response, removed from the inbox.
    Response(Message),
    /// The deadline passed first.
    TimedOut,
}

impl Awaited {
    /// The response, or `None` on timeout.
    #[must_use]
    pub fn into_response(self) -> Option<Message> {
        match self {
            Self::Response(message) => Some(message),
            Self::TimedOut => None,
        }
    }

    /// `true` when the wait expired.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Claims responses from an [`Inbox`] by request id.
#[derive(Debug, Clone)]
pub struct Correlator {
    inbox: Inbox,
    poll_interval: Duration,
}

impl Correlator {
    /// Correlate against `inbox`, re-checking at least every `poll_interval`.
    #[must_use]
    pub fn new(inbox: Inbox, poll_interval: Duration) -> Self {
        Self {
            inbox,
            poll_interval,
        }
    }

    /// Wait up to `timeout` for the response to request `id`.
    ///
    /// Only a message carrying `result` or `error` with exactly this id is
    /// claimed. The deadline is honoured within one poll interval; the
    /// final check happens at the deadline itself.
    pub async fn await_response(&self, id: RequestId, timeout: Duration) -> Awaited {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(message) = self.inbox.take_response(id) {
                trace!(request_id = id, "correlator: response claimed");
                return Awaited::Response(message);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(request_id = id, ?timeout, "correlator: no response before deadline");
                return Awaited::TimedOut;
            }

            self.inbox
                .wait(self.poll_interval.min(deadline - now))
                .await;
        }
    }
}
