//! Per-turn accumulation of streamed notifications.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::rpc::message::{Message, RequestId};
use crate::session::protocol::{
    is_turn_related, notification_turn_id, TurnEvent, TurnStartResponse,
};

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// `turn/completed` arrived before the deadline.
    Completed,
    /// The deadline passed without `turn/completed`.
    TimedOut,
    /// The peer's output closed before `turn/completed`.
    PeerClosed,
}

/// Final report of one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// How the turn ended.
    pub status: TurnStatus,
    /// Reassembled reply; possibly partial or empty unless completed.
    pub reply: String,
    /// Distinct `item/…` and `turn/…` methods seen during the turn.
    pub observed_methods: BTreeSet<String>,
    /// Peer-assigned turn id, when the `turn/start` response reported one.
    pub turn_id: Option<String>,
}

impl TurnOutcome {
    /// `true` when the turn completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TurnStatus::Completed
    }
}

/// Mutable state of the turn in flight.
///
/// Reply text is the concatenation of every delta in arrival order; when no
/// delta carried text, the last completed agent message is used instead.
#[derive(Debug)]
pub struct TurnAccumulator {
    request_id: RequestId,
    turn_id: Option<String>,
    previous_turn_ids: BTreeSet<String>,
    fragments: Vec<String>,
    completed_text: Option<String>,
    observed_methods: BTreeSet<String>,
    completed: bool,
}

impl TurnAccumulator {
    /// Fresh accumulator for the turn started by request `request_id`.
    #[must_use]
    pub fn new(request_id: RequestId) -> Self {
        Self::after_turns(request_id, BTreeSet::new())
    }

    /// Fresh accumulator that ignores notifications tagged with any of
    /// `previous_turn_ids`, even before this turn's own id is known.
    #[must_use]
    pub fn after_turns(request_id: RequestId, previous_turn_ids: BTreeSet<String>) -> Self {
        Self {
            request_id,
            turn_id: None,
            previous_turn_ids,
            fragments: Vec::new(),
            completed_text: None,
            observed_methods: BTreeSet::new(),
            completed: false,
        }
    }

    /// Fold one drained message into the turn.
    pub fn apply(&mut self, message: &Message) {
        if message.is_response_to(self.request_id) {
            self.apply_turn_start_response(message);
            return;
        }

        let Some(method) = message.method() else {
            debug!(id = ?message.id, "turn: ignoring response to another request");
            return;
        };

        if let Some(tagged) = notification_turn_id(message.params.as_ref()) {
            let foreign = match self.turn_id.as_deref() {
                Some(current) => current != tagged,
                None => self.previous_turn_ids.contains(tagged),
            };
            if foreign {
                debug!(method, turn_id = tagged, "turn: ignoring notification for another turn");
                return;
            }
        }

        if is_turn_related(method) {
            self.observed_methods.insert(method.to_owned());
        }
        debug!(method, "turn: notification");

        match TurnEvent::parse(method, message.params.as_ref()) {
            TurnEvent::AgentMessageDelta(delta) => self.fragments.push(delta),
            TurnEvent::ItemCompleted {
                text: Some(text), ..
            } => self.completed_text = Some(text),
            TurnEvent::TurnCompleted => self.completed = true,
            TurnEvent::ItemCompleted { text: None, .. } | TurnEvent::Other => {}
        }
    }

    fn apply_turn_start_response(&mut self, message: &Message) {
        if let Some(error) = &message.error {
            warn!(request_id = self.request_id, %error, "turn/start returned an error");
            return;
        }
        let turn = message
            .result
            .clone()
            .and_then(|result| serde_json::from_value::<TurnStartResponse>(result).ok())
            .and_then(|response| response.turn);
        if let Some(turn) = turn {
            debug!(turn_id = %turn.id, "turn: peer assigned turn id");
            self.turn_id = Some(turn.id);
        }
    }

    /// `true` once `turn/completed` has been seen.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Reply text accumulated so far.
    #[must_use]
    pub fn reply_text(&self) -> String {
        let streamed = self.fragments.concat();
        if streamed.is_empty() {
            self.completed_text.clone().unwrap_or_default()
        } else {
            streamed
        }
    }

    /// Methods observed so far.
    #[must_use]
    pub fn observed_methods(&self) -> &BTreeSet<String> {
        &self.observed_methods
    }

    /// Close the turn. `PeerClosed` is only reported when incomplete.
    #[must_use]
    pub fn finish(self, peer_closed: bool) -> TurnOutcome {
        let status = if self.completed {
            TurnStatus::Completed
        } else if peer_closed {
            TurnStatus::PeerClosed
        } else {
            TurnStatus::TimedOut
        };
        TurnOutcome {
            status,
            reply: self.reply_text(),
            observed_methods: self.observed_methods,
            turn_id: self.turn_id,
        }
    }
}
