//! Hub protocol codec for the realtime chat channel.
//!
//! The chat hub speaks a record-oriented JSON protocol over WebSocket text
//! messages. Every record is a JSON object terminated by the ASCII record
//! separator (`0x1E`). A single WebSocket message may carry several records,
//! and [`RecordBuffer`] tolerates a record split across messages.
//!
//! The connection opens with a handshake record in each direction; after
//! that every record is a [`HubMessage`] discriminated by its numeric `type`.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Terminates every record on the wire.
pub const RECORD_SEPARATOR: char = '\u{1e}';
/// Protocol name announced in the handshake.
pub const PROTOCOL_NAME: &str = "json";
/// Protocol version announced in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Error returned while decoding hub records.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The record is not valid JSON or does not have the expected shape.
    #[error("failed to decode hub record: {0}")]
    Json(#[from] serde_json::Error),
    /// The `type` integer does not map to a known [`MessageKind`].
    #[error("invalid hub message type: {0}")]
    InvalidKind(i64),
    /// A field required by the message kind is absent.
    #[error("missing field `{field}` in {kind:?} message")]
    MissingField { kind: MessageKind, field: &'static str },
    /// The server answered the handshake with an error.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}

// =============================================================================
// MESSAGE KIND
// =============================================================================

/// Numeric discriminator carried in the `type` field of every record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Call a method on the other side.
    Invocation,
    /// One item of a streamed result.
    StreamItem,
    /// Terminal result (or error) for an invocation.
    Completion,
    /// Call a method whose result is streamed.
    StreamInvocation,
    /// Cancel a streamed invocation.
    CancelInvocation,
    /// Keep-alive.
    Ping,
    /// Orderly close, optionally with an error.
    Close,
}

impl MessageKind {
    /// Convert kind into its wire integer.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Invocation => 1,
            Self::StreamItem => 2,
            Self::Completion => 3,
            Self::StreamInvocation => 4,
            Self::CancelInvocation => 5,
            Self::Ping => 6,
            Self::Close => 7,
        }
    }

    /// Parse a kind from its wire integer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKind`] for values outside `1..=7`.
    pub fn from_i64(value: i64) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::Invocation),
            2 => Ok(Self::StreamItem),
            3 => Ok(Self::Completion),
            4 => Ok(Self::StreamInvocation),
            5 => Ok(Self::CancelInvocation),
            6 => Ok(Self::Ping),
            7 => Ok(Self::Close),
            other => Err(CodecError::InvalidKind(other)),
        }
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// A decoded hub record.
#[derive(Clone, Debug, PartialEq)]
pub enum HubMessage {
    /// Method call. A missing `invocation_id` means no completion is expected.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    StreamItem {
        invocation_id: String,
        item: Value,
    },
    /// Result of an earlier invocation. `error` wins over `result`.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    StreamInvocation {
        invocation_id: String,
        target: String,
        arguments: Vec<Value>,
    },
    CancelInvocation {
        invocation_id: String,
    },
    Ping,
    /// Server-initiated close. `allow_reconnect` tells the client whether
    /// an automatic reconnect is acceptable.
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

impl HubMessage {
    /// Build an invocation that expects a completion.
    #[must_use]
    pub fn invocation(invocation_id: impl Into<String>, target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self::Invocation { invocation_id: Some(invocation_id.into()), target: target.into(), arguments }
    }

    /// Wire discriminator of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Invocation { .. } => MessageKind::Invocation,
            Self::StreamItem { .. } => MessageKind::StreamItem,
            Self::Completion { .. } => MessageKind::Completion,
            Self::StreamInvocation { .. } => MessageKind::StreamInvocation,
            Self::CancelInvocation { .. } => MessageKind::CancelInvocation,
            Self::Ping => MessageKind::Ping,
            Self::Close { .. } => MessageKind::Close,
        }
    }
}

/// Loose shape shared by every record; validated per kind in [`decode_message`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    kind: i64,
    #[serde(default)]
    invocation_id: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<Value>>,
    #[serde(default)]
    item: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: Option<bool>,
}

/// Encode a message as one record, separator included.
#[must_use]
pub fn encode_message(message: &HubMessage) -> String {
    let mut out = Map::new();
    out.insert("type".to_owned(), Value::from(message.kind().as_i64()));

    match message {
        HubMessage::Invocation { invocation_id, target, arguments } => {
            if let Some(id) = invocation_id {
                out.insert("invocationId".to_owned(), Value::String(id.clone()));
            }
            out.insert("target".to_owned(), Value::String(target.clone()));
            out.insert("arguments".to_owned(), Value::Array(arguments.clone()));
        }
        HubMessage::StreamItem { invocation_id, item } => {
            out.insert("invocationId".to_owned(), Value::String(invocation_id.clone()));
            out.insert("item".to_owned(), item.clone());
        }
        HubMessage::Completion { invocation_id, result, error } => {
            out.insert("invocationId".to_owned(), Value::String(invocation_id.clone()));
            if let Some(error) = error {
                out.insert("error".to_owned(), Value::String(error.clone()));
            } else if let Some(result) = result {
                out.insert("result".to_owned(), result.clone());
            }
        }
        HubMessage::StreamInvocation { invocation_id, target, arguments } => {
            out.insert("invocationId".to_owned(), Value::String(invocation_id.clone()));
            out.insert("target".to_owned(), Value::String(target.clone()));
            out.insert("arguments".to_owned(), Value::Array(arguments.clone()));
        }
        HubMessage::CancelInvocation { invocation_id } => {
            out.insert("invocationId".to_owned(), Value::String(invocation_id.clone()));
        }
        HubMessage::Ping => {}
        HubMessage::Close { error, allow_reconnect } => {
            if let Some(error) = error {
                out.insert("error".to_owned(), Value::String(error.clone()));
            }
            if *allow_reconnect {
                out.insert("allowReconnect".to_owned(), Value::Bool(true));
            }
        }
    }

    let mut record = Value::Object(out).to_string();
    record.push(RECORD_SEPARATOR);
    record
}

/// Decode a single record (separator already stripped).
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed JSON, [`CodecError::InvalidKind`]
/// for unknown `type` values and [`CodecError::MissingField`] when the record
/// lacks a field its kind requires.
pub fn decode_message(record: &str) -> Result<HubMessage, CodecError> {
    let wire: WireMessage = serde_json::from_str(record.trim_end_matches(RECORD_SEPARATOR))?;
    let kind = MessageKind::from_i64(wire.kind)?;

    let require_id = |id: Option<String>| id.ok_or(CodecError::MissingField { kind, field: "invocationId" });
    let require_target = |target: Option<String>| target.ok_or(CodecError::MissingField { kind, field: "target" });

    Ok(match kind {
        MessageKind::Invocation => HubMessage::Invocation {
            invocation_id: wire.invocation_id,
            target: require_target(wire.target)?,
            arguments: wire.arguments.unwrap_or_default(),
        },
        MessageKind::StreamItem => HubMessage::StreamItem {
            invocation_id: require_id(wire.invocation_id)?,
            item: wire.item.unwrap_or(Value::Null),
        },
        MessageKind::Completion => HubMessage::Completion {
            invocation_id: require_id(wire.invocation_id)?,
            result: wire.result,
            error: wire.error,
        },
        MessageKind::StreamInvocation => HubMessage::StreamInvocation {
            invocation_id: require_id(wire.invocation_id)?,
            target: require_target(wire.target)?,
            arguments: wire.arguments.unwrap_or_default(),
        },
        MessageKind::CancelInvocation => HubMessage::CancelInvocation {
            invocation_id: require_id(wire.invocation_id)?,
        },
        MessageKind::Ping => HubMessage::Ping,
        MessageKind::Close => HubMessage::Close {
            error: wire.error,
            allow_reconnect: wire.allow_reconnect.unwrap_or(false),
        },
    })
}

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Handshake record the client sends right after the socket opens.
#[must_use]
pub fn handshake_request() -> String {
    let mut record = serde_json::json!({
        "protocol": PROTOCOL_NAME,
        "version": PROTOCOL_VERSION,
    })
    .to_string();
    record.push(RECORD_SEPARATOR);
    record
}

#[derive(Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Check the server's handshake reply (separator already stripped).
///
/// # Errors
///
/// Returns [`CodecError::HandshakeRejected`] when the server reports an
/// error, or [`CodecError::Json`] when the reply is not a JSON object.
pub fn parse_handshake_response(record: &str) -> Result<(), CodecError> {
    let response: HandshakeResponse = serde_json::from_str(record.trim_end_matches(RECORD_SEPARATOR))?;
    match response.error {
        Some(error) => Err(CodecError::HandshakeRejected(error)),
        None => Ok(()),
    }
}

// =============================================================================
// RECORD BUFFER
// =============================================================================

/// Splits incoming text into complete records, holding back a partial tail.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    pending: String,
}

impl RecordBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every record it completed, in order.
    /// Blank records are skipped.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut records = Vec::new();
        while let Some(pos) = self.pending.find(RECORD_SEPARATOR) {
            let record: String = self.pending.drain(..pos).collect();
            self.pending.drain(..RECORD_SEPARATOR.len_utf8());
            if !record.trim().is_empty() {
                records.push(record);
            }
        }
        records
    }

    /// Whether an incomplete record is waiting for more input.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.pending.trim().is_empty()
    }

    /// Drop any buffered partial record.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
