//! Line-level JSON-RPC message model.
//!
//! One [`Message`] is one decoded JSON object from the wire. The same shape
//! covers requests, responses, and notifications; [`Message::kind`] tells
//! them apart:
//!
//! | Fields present          | Kind                       |
//! |-------------------------|----------------------------|
//! | `result` or `error`     | [`MessageKind::Response`]  |
//! | `method` and `id`       | [`MessageKind::Request`]   |
//! | `method` without `id`   | [`MessageKind::Notification`] |
//! | none of the above       | [`MessageKind::Noise`]     |

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Numeric request identifier, chosen by the initiator.
pub type RequestId = i64;

/// Classification of a decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Carries `result` or `error`.
    Response,
    /// Carries `method` and an `id`.
    Request,
    /// Carries `method` but no `id`.
    Notification,
    /// Valid JSON object with none of the protocol fields.
    Noise,
}

/// A decoded JSON-RPC line.
///
/// `result` and `error` keep an explicit JSON `null` as `Some(Value::Null)`,
/// so `{"id":1,"result":null}` still counts as a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id; non-integer ids are treated as absent.
    #[serde(
        default,
        deserialize_with = "integer_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<RequestId>,
    /// Method name for requests and notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Success payload of a response.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// Failure payload of a response.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<Value>,
    /// Any other top-level members (e.g. `jsonrpc`), kept for tracing.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Build a request.
    #[must_use]
    pub fn request(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id),
            method: Some(method.into()),
            params: Some(params),
            ..Self::default()
        }
    }

    /// Build a notification (no `id`).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::default()
        }
    }

    /// Build a successful response.
    #[must_use]
    pub fn response(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            ..Self::default()
        }
    }

    /// Build an error response.
    #[must_use]
    pub fn error_response(id: RequestId, error: Value) -> Self {
        Self {
            id: Some(id),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Parse a single line; `None` for blank lines, non-JSON text, or JSON
    /// that is not an object.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    /// Classify this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        if self.is_response() {
            MessageKind::Response
        } else if self.method.is_some() {
            if self.id.is_some() {
                MessageKind::Request
            } else {
                MessageKind::Notification
            }
        } else {
            MessageKind::Noise
        }
    }

    /// `true` when the message carries `result` or `error`.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// `true` when this is the response to request `id`.
    #[must_use]
    pub fn is_response_to(&self, id: RequestId) -> bool {
        self.is_response() && self.id == Some(id)
    }

    /// Method name, if any.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Look up a member of `params`.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|params| params.get(key))
    }
}

/// Deserialize an `id` member, mapping anything but an integer to `None`.
fn integer_id<'de, D>(deserializer: D) -> std::result::Result<Option<RequestId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_i64())
}

/// Deserialize a member that counts as present even when `null`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
