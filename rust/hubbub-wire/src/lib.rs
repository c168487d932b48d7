#![deny(unsafe_code)]

//! Wire-level message types for the hub protocol (JSON encoding, version 1).
//!
//! Every frame on the wire is a single JSON object carrying an integer `type`
//! discriminant. Decoding is two-phase: read the discriminant, then decode the
//! matching message struct. Unknown fields are ignored so peers can extend
//! messages without breaking older servers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error decoding a wire frame into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON, or a message body did not match its schema.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The frame had no integer `type` field.
    #[error("message has no integer `type` discriminant")]
    MissingDiscriminant,
    /// The `type` discriminant is not one this protocol version defines.
    #[error("unknown message type {0}")]
    UnknownType(u64),
}

/// A client request to run a hub method.
///
/// Used for both plain invocations (`type` 1) and stream invocations
/// (`type` 4) - the two share a wire shape and differ only in how the
/// result travels back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    #[serde(rename = "type")]
    pub kind: u8,
    /// Absent for "blind" invocations whose result the client discards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Ids of client-to-server streams feeding this invocation's channel
    /// arguments, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stream_ids: Vec<String>,
}

/// One element of an in-progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamItem {
    #[serde(rename = "type")]
    pub kind: u8,
    pub invocation_id: String,
    pub item: Value,
}

/// Terminal message for an invocation or stream.
///
/// Carries at most one of `result` and `error`. A `result` on an id that has
/// already produced stream items is a protocol violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    #[serde(rename = "type")]
    pub kind: u8,
    pub invocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request to stop an in-progress stream invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInvocation {
    #[serde(rename = "type")]
    pub kind: u8,
    pub invocation_id: String,
}

/// Connection teardown notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Close {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Protocol message, discriminated by the integer `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `type` 1 - run a hub method, result comes back as a Completion.
    Invocation(Invocation),
    /// `type` 2 - one element of a stream.
    StreamItem(StreamItem),
    /// `type` 3 - terminal result or error for an id.
    Completion(Completion),
    /// `type` 4 - run a hub method whose result is a stream of items.
    StreamInvocation(Invocation),
    /// `type` 5 - stop an in-progress stream.
    CancelInvocation(CancelInvocation),
    /// `type` 6 - liveness probe, never answered.
    Ping,
    /// `type` 7 - the peer is done with this connection.
    Close(Close),
}

impl Invocation {
    pub fn new(invocation_id: Option<String>, target: impl Into<String>) -> Self {
        Self {
            kind: 1,
            invocation_id,
            target: target.into(),
            arguments: Vec::new(),
            stream_ids: Vec::new(),
        }
    }
}

impl StreamItem {
    pub fn new(invocation_id: impl Into<String>, item: Value) -> Self {
        Self {
            kind: 2,
            invocation_id: invocation_id.into(),
            item,
        }
    }
}

impl Completion {
    /// Completion with no result, ending a stream cleanly.
    pub fn done(invocation_id: impl Into<String>) -> Self {
        Self {
            kind: 3,
            invocation_id: invocation_id.into(),
            result: None,
            error: None,
        }
    }

    pub fn result(invocation_id: impl Into<String>, result: Value) -> Self {
        Self {
            kind: 3,
            invocation_id: invocation_id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: 3,
            invocation_id: invocation_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }
}

impl Close {
    pub fn new(error: Option<String>) -> Self {
        Self { kind: 7, error }
    }
}

impl Message {
    /// Decode one frame.
    ///
    /// A `type` 7 frame whose body does not match the Close schema still
    /// decodes as a Close without an error string - a peer saying goodbye
    /// badly is still saying goodbye.
    pub fn from_slice(bytes: &[u8]) -> Result<Message, ProtocolError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let kind = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingDiscriminant)?;
        match kind {
            1 => Ok(Message::Invocation(serde_json::from_value(value)?)),
            2 => Ok(Message::StreamItem(serde_json::from_value(value)?)),
            3 => Ok(Message::Completion(serde_json::from_value(value)?)),
            4 => Ok(Message::StreamInvocation(serde_json::from_value(value)?)),
            5 => Ok(Message::CancelInvocation(serde_json::from_value(value)?)),
            6 => Ok(Message::Ping),
            7 => Ok(Message::Close(
                serde_json::from_value(value).unwrap_or(Close { kind: 7, error: None }),
            )),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }

    /// Encode this message as compact JSON (without the frame separator).
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Message::Invocation(m) | Message::StreamInvocation(m) => serde_json::to_vec(m),
            Message::StreamItem(m) => serde_json::to_vec(m),
            Message::Completion(m) => serde_json::to_vec(m),
            Message::CancelInvocation(m) => serde_json::to_vec(m),
            Message::Ping => serde_json::to_vec(&serde_json::json!({ "type": 6 })),
            Message::Close(m) => serde_json::to_vec(m),
        }
    }

    /// The invocation id this message refers to, when it has one.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            Message::Invocation(m) | Message::StreamInvocation(m) => m.invocation_id.as_deref(),
            Message::StreamItem(m) => Some(&m.invocation_id),
            Message::Completion(m) => Some(&m.invocation_id),
            Message::CancelInvocation(m) => Some(&m.invocation_id),
            Message::Ping | Message::Close(_) => None,
        }
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// First frame of a connection: the client announces protocol and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

/// Server reply to a [`HandshakeRequest`]. Serializes as `{}` on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests;
