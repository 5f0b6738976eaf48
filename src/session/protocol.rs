//! Typed shapes of the app-server methods the session uses.
//!
//! Requests are built from these structs rather than ad-hoc JSON, and
//! responses are decoded into them at the session boundary so a shape
//! mismatch surfaces as one `AppError::Protocol` instead of scattered
//! missing-key checks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `initialize` request.
pub const METHOD_INITIALIZE: &str = "initialize";
/// `initialized` notification sent after a successful `initialize`.
pub const METHOD_INITIALIZED: &str = "initialized";
/// `thread/start` request.
pub const METHOD_THREAD_START: &str = "thread/start";
/// `turn/start` request.
pub const METHOD_TURN_START: &str = "turn/start";

/// Streamed reply fragment.
pub const NOTIFY_AGENT_MESSAGE_DELTA: &str = "item/agentMessage/delta";
/// An item finished; agent messages carry their full text.
pub const NOTIFY_ITEM_COMPLETED: &str = "item/completed";
/// The turn is over.
pub const NOTIFY_TURN_COMPLETED: &str = "turn/completed";

/// `item.type` of an agent reply item.
pub const ITEM_TYPE_AGENT_MESSAGE: &str = "agentMessage";

/// Identifies this client to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

/// Parameters of `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Client metadata.
    pub client_info: ClientInfo,
}

/// Parameters of `thread/start`; always an empty object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreadStartParams {}

/// One typed piece of user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputItem {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
}

impl InputItem {
    /// Text input.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Parameters of `turn/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartParams {
    /// Thread the turn belongs to.
    pub thread_id: String,
    /// User input for this turn.
    pub input: Vec<InputItem>,
}

/// `result` of `thread/start`; only the thread id is required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadStartResponse {
    /// The started thread.
    pub thread: ThreadRef,
}

/// Reference to a thread.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadRef {
    /// Peer-assigned thread id.
    pub id: String,
}

/// `result` of `turn/start`; the turn reference is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TurnStartResponse {
    /// The started turn, when the peer reports it.
    #[serde(default)]
    pub turn: Option<TurnRef>,
}

/// Reference to a turn.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TurnRef {
    /// Peer-assigned turn id.
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct DeltaParams {
    delta: String,
}

#[derive(Debug, Deserialize)]
struct ItemCompletedParams {
    item: CompletedItem,
}

#[derive(Debug, Deserialize)]
struct CompletedItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// A notification interpreted for turn accumulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// A reply fragment.
    AgentMessageDelta(String),
    /// A finished item; `text` is set only for non-empty agent messages.
    ItemCompleted {
        /// `item.type`.
        item_type: String,
        /// Full agent message text.
        text: Option<String>,
    },
    /// The turn is over.
    TurnCompleted,
    /// Anything else, including known methods with unexpected params.
    Other,
}

impl TurnEvent {
    /// Interpret a notification by method name.
    #[must_use]
    pub fn parse(method: &str, params: Option<&Value>) -> Self {
        let params = params.cloned().unwrap_or(Value::Null);
        match method {
            NOTIFY_AGENT_MESSAGE_DELTA => serde_json::from_value::<DeltaParams>(params)
                .map_or(Self::Other, |p| Self::AgentMessageDelta(p.delta)),
            NOTIFY_ITEM_COMPLETED => serde_json::from_value::<ItemCompletedParams>(params)
                .map_or(Self::Other, |p| Self::ItemCompleted {
                    text: p.item.text.filter(|text| {
                        p.item.item_type == ITEM_TYPE_AGENT_MESSAGE && !text.is_empty()
                    }),
                    item_type: p.item.item_type,
                }),
            NOTIFY_TURN_COMPLETED => Self::TurnCompleted,
            _ => Self::Other,
        }
    }
}

/// `true` for the `item/…` and `turn/…` notification families.
#[must_use]
pub fn is_turn_related(method: &str) -> bool {
    method.starts_with("item/") || method.starts_with("turn/")
}

/// Turn id a notification refers to, from `params.turnId` or `params.turn.id`.
#[must_use]
pub fn notification_turn_id(params: Option<&Value>) -> Option<&str> {
    let params = params?;
    params
        .get("turnId")
        .and_then(Value::as_str)
        .or_else(|| params.get("turn")?.get("id")?.as_str())
}
