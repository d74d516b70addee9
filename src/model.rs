//! Chat data model shared by the stores, the reconciler and the wire layer.
//!
//! Field names follow the server's camelCase JSON. Timestamps are
//! `OffsetDateTime`; the server emits both RFC 3339 and offset-less
//! ISO-8601 values, the latter read as UTC.

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

/// Prefix of ids minted locally before the server assigns a durable one.
pub const PROVISIONAL_ID_PREFIX: &str = "temp-";

// =============================================================================
// CONVERSATION
// =============================================================================

/// A persistent thread between the signed-in staff member and one customer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub other_user_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub last_message: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub last_sender_id: String,
    #[serde(default, with = "timestamp::option")]
    pub last_sent_at: Option<OffsetDateTime>,
}

// =============================================================================
// MESSAGE
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sender_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub receiver_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    #[serde(with = "timestamp")]
    pub sent_at: OffsetDateTime,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Message {
    /// True while the entry still carries a locally minted id.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.id.is_empty() || self.id.starts_with(PROVISIONAL_ID_PREFIX)
    }
}

/// Mint a provisional id from a local timestamp: `temp-<unix millis>`.
#[must_use]
pub fn provisional_id(at: OffsetDateTime) -> String {
    format!("{PROVISIONAL_ID_PREFIX}{}", at.unix_timestamp_nanos() / 1_000_000)
}

/// A message the local user wants to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Draft {
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
}

/// Server-pushed message event, decoded leniently.
///
/// Every field is optional so a broken event still decodes; the reconciler
/// decides whether it is usable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushPayload {
    pub id: Option<String>,
    pub conversation_id: Option<String>,
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub text: Option<String>,
    #[serde(with = "timestamp::lenient")]
    pub sent_at: Option<OffsetDateTime>,
    pub is_read: Option<bool>,
    pub is_deleted: Option<bool>,
}

// =============================================================================
// CONNECTION STATE
// =============================================================================

/// Lifecycle of the realtime connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// The signed-in staff member as returned by the login endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffUser {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub full_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub avatar: String,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// =============================================================================
// TIMESTAMPS
// =============================================================================

pub mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer, de, ser};
    use time::format_description::well_known::Rfc3339;
    use time::macros::format_description;
    use time::{OffsetDateTime, PrimitiveDateTime};

    /// Parse RFC 3339, falling back to an offset-less date-time taken as UTC.
    ///
    /// Offset-less values must be UTC wall-clock time: echo matching compares
    /// them against `now_utc()` within
    /// [`ECHO_WINDOW`](crate::reconciler::ECHO_WINDOW).
    #[must_use]
    pub fn parse(raw: &str) -> Option<OffsetDateTime> {
        let raw = raw.trim();
        if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
            return Some(ts);
        }
        let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]");
        PrimitiveDateTime::parse(raw, naive).ok().map(PrimitiveDateTime::assume_utc)
    }

    pub fn serialize<S: Serializer>(ts: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let text = ts.format(&Rfc3339).map_err(ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    /// Nullable timestamp; `null` and `""` both mean absent.
    pub mod option {
        use super::*;

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(ts: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => super::serialize(ts, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}"))),
            }
        }
    }

    /// Like [`option`] but an unreadable value also becomes `None`.
    pub mod lenient {
        use super::*;

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(ts: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error> {
            super::option::serialize(ts, serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error> {
            let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
            Ok(raw.as_ref().and_then(serde_json::Value::as_str).and_then(parse))
        }
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
