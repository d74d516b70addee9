use super::*;
use time::macros::datetime;

// =============================================================
// Timestamps
// =============================================================

#[test]
fn parse_accepts_rfc3339_with_offset() {
    let ts = timestamp::parse("2025-03-01T10:15:30.250+02:00").expect("rfc3339");
    assert_eq!(ts, datetime!(2025-03-01 08:15:30.25 UTC));
}

#[test]
fn parse_reads_offsetless_values_as_utc() {
    assert_eq!(timestamp::parse("2025-03-01T10:15:30").expect("naive"), datetime!(2025-03-01 10:15:30 UTC));
    assert_eq!(
        timestamp::parse("2025-03-01T10:15:30.1234567").expect("naive fractional"),
        datetime!(2025-03-01 10:15:30.1234567 UTC)
    );
}

#[test]
fn parse_rejects_garbage() {
    assert!(timestamp::parse("yesterday").is_none());
}

// =============================================================
// Message
// =============================================================

#[test]
fn message_decodes_camel_case_payload() {
    let msg: Message = serde_json::from_value(serde_json::json!({
        "id": "srv-1",
        "conversationId": "c1",
        "senderId": "u1",
        "receiverId": "u2",
        "text": "hello",
        "sentAt": "2025-03-01T10:00:00Z",
        "isRead": true,
        "isDeleted": false
    }))
    .expect("message");
    assert_eq!(msg.conversation_id, "c1");
    assert_eq!(msg.sent_at, datetime!(2025-03-01 10:00 UTC));
    assert!(msg.is_read);
    assert!(!msg.is_provisional());
}

#[test]
fn message_serializes_sent_at_as_rfc3339() {
    let msg = Message {
        id: "m".to_owned(),
        conversation_id: "c1".to_owned(),
        sender_id: "u1".to_owned(),
        receiver_id: "u2".to_owned(),
        text: "t".to_owned(),
        sent_at: datetime!(2025-03-01 10:00 UTC),
        is_read: false,
        is_deleted: false,
    };
    let value = serde_json::to_value(&msg).expect("json");
    assert_eq!(value["sentAt"], "2025-03-01T10:00:00Z");
    assert_eq!(value["conversationId"], "c1");
}

#[test]
fn provisional_id_uses_unix_millis() {
    let at = datetime!(1970-01-01 00:00:01.5 UTC);
    assert_eq!(provisional_id(at), "temp-1500");
}

#[test]
fn provisional_detection_covers_prefix_and_empty() {
    let mut msg: Message = serde_json::from_value(serde_json::json!({
        "id": "temp-1",
        "conversationId": "c1",
        "sentAt": "2025-03-01T10:00:00Z"
    }))
    .expect("message");
    assert!(msg.is_provisional());
    msg.id = String::new();
    assert!(msg.is_provisional());
    msg.id = "42".to_owned();
    assert!(!msg.is_provisional());
}

// =============================================================
// PushPayload / Conversation
// =============================================================

#[test]
fn push_payload_tolerates_missing_and_broken_fields() {
    let push: PushPayload = serde_json::from_value(serde_json::json!({
        "conversationId": "c1",
        "text": "hi",
        "sentAt": "not a date",
        "id": null
    }))
    .expect("lenient decode");
    assert_eq!(push.conversation_id.as_deref(), Some("c1"));
    assert!(push.id.is_none());
    assert!(push.sent_at.is_none());
    assert!(push.sender_id.is_none());
}

#[test]
fn conversation_nulls_become_empty_preview() {
    let conv: Conversation = serde_json::from_value(serde_json::json!({
        "conversationId": "c1",
        "otherUserId": "u2",
        "lastMessage": null,
        "lastSenderId": null,
        "lastSentAt": null
    }))
    .expect("conversation");
    assert_eq!(conv.last_message, "");
    assert!(conv.last_sent_at.is_none());
}

#[test]
fn connection_state_display_is_lowercase() {
    assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
}
