//! Shared inbox and the router task that fills it.
//!
//! The router is the inbox's only producer: it appends responses and
//! method-bearing messages in arrival order. Consumers (the correlator and
//! the turn session) remove messages with [`Inbox::take_response`],
//! [`Inbox::pop_front`], or [`Inbox::purge_notifications`]; every removal
//! happens under the inbox lock, so each message is claimed exactly once.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::rpc::message::{Message, MessageKind, RequestId};
use crate::rpc::trace::TraceSink;
use crate::rpc::transport::MessageStream;

#[derive(Debug, Default)]
struct InboxInner {
    queue: Mutex<VecDeque<Message>>,
    arrived: Notify,
}

/// Ordered collection of not-yet-consumed messages.
///
/// Cloning yields another handle to the same inbox.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    inner: Arc<InboxInner>,
}

impl Inbox {
    /// Create an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        // Every critical section leaves the deque consistent, so poisoning is ignored.
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `message` and wake any waiter.
    pub fn push(&self, message: Message) {
        self.queue().push_back(message);
        self.inner.arrived.notify_waiters();
    }

    /// Remove and return the first response to request `id`.
    #[must_use]
    pub fn take_response(&self, id: RequestId) -> Option<Message> {
        let mut queue = self.queue();
        let index = queue.iter().position(|message| message.is_response_to(id))?;
        queue.remove(index)
    }

    /// Remove and return the oldest message.
    #[must_use]
    pub fn pop_front(&self) -> Option<Message> {
        self.queue().pop_front()
    }

    /// Remove every notification, keeping responses in place.
    ///
    /// Returns the number of messages removed.
    #[must_use]
    pub fn purge_notifications(&self) -> usize {
        let mut queue = self.queue();
        let before = queue.len();
        queue.retain(Message::is_response);
        before - queue.len()
    }

    /// Copy of the current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.queue().iter().cloned().collect()
    }

    /// Number of messages waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue().len()
    }

    /// `true` when no messages are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// Sleep until a message is appended or `max_wait` elapses.
    ///
    /// A wake-up is a hint to re-check, not a guarantee that the message a
    /// caller wants has arrived.
    pub async fn wait(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.inner.arrived.notified()).await;
    }
}

/// Consume `messages` on a background task, appending each response or
/// method-bearing message to `inbox`.
///
/// Every message read, routed or not, is offered to `trace` first. The task
/// ends when the stream closes or `cancel` fires.
#[must_use]
pub fn spawn_router(
    mut messages: MessageStream,
    inbox: Inbox,
    trace: Option<TraceSink>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut routed = 0_usize;
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(routed, "router: cancellation received, stopping");
                    break;
                }

                next = messages.next() => {
                    let Some(message) = next else {
                        debug!(routed, "router: peer stream closed");
                        break;
                    };

                    if let Some(sink) = &trace {
                        sink.record(&message);
                    }

                    match message.kind() {
                        MessageKind::Response | MessageKind::Request | MessageKind::Notification => {
                            trace!(id = ?message.id, method = ?message.method, "router: queued");
                            inbox.push(message);
                            routed += 1;
                        }
                        MessageKind::Noise => {
                            trace!("router: dropping message without id/method/result");
                        }
                    }
                }
            }
        }
    })
}
