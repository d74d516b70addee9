use super::*;
use time::macros::datetime;

const T0: OffsetDateTime = datetime!(2025-05-01 12:00:00 UTC);

fn ms(n: i64) -> Duration {
    Duration::milliseconds(n)
}

fn draft(text: &str) -> Draft {
    Draft {
        conversation_id: "c1".to_owned(),
        sender_id: "u1".to_owned(),
        receiver_id: "u2".to_owned(),
        text: text.to_owned(),
    }
}

fn push(id: &str, conversation_id: &str, sender: &str, text: &str, sent_at: OffsetDateTime) -> PushPayload {
    PushPayload {
        id: Some(id.to_owned()),
        conversation_id: Some(conversation_id.to_owned()),
        sender_id: Some(sender.to_owned()),
        receiver_id: Some("u2".to_owned()),
        text: Some(text.to_owned()),
        sent_at: Some(sent_at),
        is_read: Some(false),
        is_deleted: Some(false),
    }
}

fn stored(id: &str, sender: &str, text: &str, sent_at: OffsetDateTime) -> Message {
    Message {
        id: id.to_owned(),
        conversation_id: "c1".to_owned(),
        sender_id: sender.to_owned(),
        receiver_id: "u2".to_owned(),
        text: text.to_owned(),
        sent_at,
        is_read: true,
        is_deleted: false,
    }
}

/// Reconciler showing `c1` with its (empty) history applied.
fn open_c1() -> MessageReconciler {
    let mut rec = MessageReconciler::new();
    let ticket = rec.begin_history("c1");
    assert!(rec.apply_history(ticket, Vec::new()));
    rec
}

fn ids(rec: &MessageReconciler) -> Vec<&str> {
    rec.messages().iter().map(|m| m.id.as_str()).collect()
}

// =============================================================
// Optimistic + echo reconciliation
// =============================================================

#[test]
fn optimistic_entry_resolves_to_server_id() {
    let mut rec = open_c1();

    let local = rec.append_optimistic_at(&draft("hello"), T0);
    assert_eq!(local.id, provisional_id(T0));
    assert!(local.id.starts_with("temp-"));
    assert_eq!(rec.messages().len(), 1);

    let out = rec
        .ingest_push_at(push("srv-42", "c1", "u1", "hello", T0 + ms(200)), T0 + ms(300))
        .expect("valid push");

    assert_eq!(out.disposition, Disposition::Confirmed { provisional_id: local.id });
    assert_eq!(ids(&rec), vec!["srv-42"]);
    assert_eq!(rec.messages()[0].sent_at, T0 + ms(200));
}

#[test]
fn offsetless_echo_stamp_confirms_as_utc() {
    let mut rec = open_c1();
    let local = rec.append_optimistic_at(&draft("hello"), T0);
    let payload: PushPayload = serde_json::from_value(serde_json::json!({
        "id": "srv-43",
        "conversationId": "c1",
        "senderId": "u1",
        "receiverId": "u2",
        "text": "hello",
        "sentAt": "2025-05-01T12:00:00.400"
    }))
    .expect("payload");

    let out = rec.ingest_push_at(payload, T0 + ms(500)).expect("valid push");

    assert_eq!(out.disposition, Disposition::Confirmed { provisional_id: local.id });
    assert_eq!(ids(&rec), vec!["srv-43"]);
}

#[test]
fn echo_with_same_id_is_dropped() {
    let mut rec = open_c1();
    rec.ingest_push_at(push("srv-1", "c1", "u2", "hi", T0), T0).expect("push");
    let out = rec
        .ingest_push_at(push("srv-1", "c1", "u2", "hi", T0 + ms(5_000)), T0)
        .expect("push");
    assert_eq!(out.disposition, Disposition::Duplicate);
    assert_eq!(rec.messages().len(), 1);
}

#[test]
fn echo_outside_window_is_a_new_message() {
    let mut rec = open_c1();
    rec.append_optimistic_at(&draft("ok"), T0);
    let out = rec
        .ingest_push_at(push("srv-2", "c1", "u1", "ok", T0 + ms(1_000)), T0)
        .expect("push");
    assert_eq!(out.disposition, Disposition::Appended);
    assert_eq!(rec.messages().len(), 2);
}

#[test]
fn same_text_from_other_sender_is_not_an_echo() {
    let mut rec = open_c1();
    rec.append_optimistic_at(&draft("thanks"), T0);
    let out = rec
        .ingest_push_at(push("srv-3", "c1", "u2", "thanks", T0 + ms(10)), T0)
        .expect("push");
    assert_eq!(out.disposition, Disposition::Appended);
    assert_eq!(rec.messages().len(), 2);
}

#[test]
fn echo_arriving_before_ack_suppresses_optimistic_entry() {
    let mut rec = open_c1();
    rec.ingest_push_at(push("srv-7", "c1", "u1", "fast", T0 + ms(50)), T0).expect("push");

    let local = rec.append_optimistic_at(&draft("fast"), T0 + ms(120));

    assert_eq!(local.id, "srv-7");
    assert_eq!(ids(&rec), vec!["srv-7"]);
}

#[test]
fn repeated_identical_sends_resolve_one_to_one() {
    let mut rec = open_c1();
    rec.append_optimistic_at(&draft("ok"), T0);
    rec.append_optimistic_at(&draft("ok"), T0 + ms(300));

    rec.ingest_push_at(push("srv-a", "c1", "u1", "ok", T0 + ms(100)), T0).expect("push");
    rec.ingest_push_at(push("srv-b", "c1", "u1", "ok", T0 + ms(400)), T0).expect("push");

    assert_eq!(ids(&rec), vec!["srv-a", "srv-b"]);
    assert!(rec.messages().iter().all(|m| !m.is_provisional()));
}

// =============================================================
// Validation
// =============================================================

#[test]
fn push_without_conversation_is_malformed() {
    let mut rec = open_c1();
    rec.append_optimistic_at(&draft("keep"), T0);

    let err = rec
        .ingest_push_at(push("srv-9", "", "u2", "x", T0), T0)
        .expect_err("malformed");
    assert_eq!(err, MalformedPush::MissingConversation);
    assert_eq!(rec.messages().len(), 1);
}

#[test]
fn push_without_text_is_malformed() {
    let mut rec = open_c1();
    let mut bad = push("srv-9", "c1", "u2", "", T0);
    bad.text = None;
    assert_eq!(rec.ingest_push_at(bad, T0), Err(MalformedPush::MissingText));
    assert!(rec.messages().is_empty());
}

#[test]
fn push_without_id_or_timestamp_gets_local_defaults() {
    let mut rec = open_c1();
    let now = T0 + ms(9);
    let out = rec
        .ingest_push_at(
            PushPayload {
                conversation_id: Some("c1".to_owned()),
                text: Some("hey".to_owned()),
                ..PushPayload::default()
            },
            now,
        )
        .expect("push");
    assert_eq!(out.message.id, provisional_id(now));
    assert_eq!(out.message.sent_at, now);
    assert_eq!(out.disposition, Disposition::Appended);
}

// =============================================================
// Selection isolation
// =============================================================

#[test]
fn push_for_other_conversation_leaves_list_untouched() {
    let mut rec = open_c1();
    rec.append_optimistic_at(&draft("mine"), T0);
    let before = rec.messages().to_vec();

    let out = rec
        .ingest_push_at(push("srv-5", "c2", "u3", "elsewhere", T0), T0)
        .expect("push");

    assert_eq!(out.disposition, Disposition::OtherConversation);
    assert_eq!(out.message.conversation_id, "c2");
    assert_eq!(rec.messages(), before.as_slice());
}

#[test]
fn optimistic_for_hidden_conversation_is_not_listed() {
    let mut rec = open_c1();
    let mut other = draft("psst");
    other.conversation_id = "c2".to_owned();
    let msg = rec.append_optimistic_at(&other, T0);
    assert_eq!(msg.conversation_id, "c2");
    assert!(rec.messages().is_empty());
}

#[test]
fn nothing_visible_before_first_selection() {
    let mut rec = MessageReconciler::new();
    let out = rec.ingest_push_at(push("srv-1", "c1", "u2", "hi", T0), T0).expect("push");
    assert_eq!(out.disposition, Disposition::OtherConversation);
    assert!(rec.conversation_id().is_none());
}

// =============================================================
// Ordering
// =============================================================

#[test]
fn late_push_is_inserted_by_sent_at() {
    let mut rec = open_c1();
    rec.ingest_push_at(push("b", "c1", "u2", "second", T0 + ms(2_000)), T0).expect("push");
    rec.ingest_push_at(push("c", "c1", "u2", "third", T0 + ms(3_000)), T0).expect("push");
    rec.ingest_push_at(push("a", "c1", "u2", "first", T0 + ms(1_000)), T0).expect("push");
    assert_eq!(ids(&rec), vec!["a", "b", "c"]);
}

#[test]
fn equal_timestamps_keep_arrival_order() {
    let mut rec = open_c1();
    rec.ingest_push_at(push("x", "c1", "u2", "one", T0), T0).expect("push");
    rec.ingest_push_at(push("y", "c1", "u3", "two", T0), T0).expect("push");
    rec.ingest_push_at(push("z", "c1", "u2", "three", T0), T0).expect("push");
    assert_eq!(ids(&rec), vec!["x", "y", "z"]);
}

// =============================================================
// History
// =============================================================

#[test]
fn history_replaces_list_sorted() {
    let mut rec = MessageReconciler::new();
    let ticket = rec.begin_history("c1");
    assert!(rec.is_loading());

    let applied = rec.apply_history(
        ticket,
        vec![stored("m2", "u2", "later", T0 + ms(10)), stored("m1", "u1", "earlier", T0)],
    );

    assert!(applied);
    assert!(!rec.is_loading());
    assert_eq!(ids(&rec), vec!["m1", "m2"]);
}

#[test]
fn stale_history_response_is_discarded() {
    let mut rec = MessageReconciler::new();
    let first = rec.begin_history("c1");
    let second = rec.begin_history("c2");

    assert!(!rec.apply_history(first, vec![stored("old", "u2", "from c1", T0)]));
    assert!(rec.messages().is_empty());
    assert!(rec.is_loading());

    let mut c2 = stored("new", "u3", "from c2", T0);
    c2.conversation_id = "c2".to_owned();
    assert!(rec.apply_history(second, vec![c2]));
    assert_eq!(ids(&rec), vec!["new"]);
    assert_eq!(rec.conversation_id(), Some("c2"));
}

#[test]
fn pushes_during_history_fetch_survive_the_response() {
    let mut rec = MessageReconciler::new();
    let ticket = rec.begin_history("c1");

    rec.ingest_push_at(push("live", "c1", "u2", "just now", T0 + ms(5_000)), T0).expect("push");
    rec.ingest_push_at(push("m1", "c1", "u2", "in history too", T0), T0).expect("push");

    rec.apply_history(ticket, vec![stored("m1", "u2", "in history too", T0)]);

    assert_eq!(ids(&rec), vec!["m1", "live"]);
}

#[test]
fn failed_history_only_clears_loading_for_current_ticket() {
    let mut rec = MessageReconciler::new();
    let first = rec.begin_history("c1");
    let second = rec.begin_history("c1");
    assert!(!rec.fail_history(first));
    assert!(rec.is_loading());
    assert!(rec.fail_history(second));
    assert!(!rec.is_loading());
}

#[test]
fn clear_invalidates_outstanding_ticket() {
    let mut rec = MessageReconciler::new();
    let ticket = rec.begin_history("c1");
    rec.clear();
    assert!(!rec.apply_history(ticket, vec![stored("m1", "u2", "x", T0)]));
    assert!(rec.messages().is_empty());
}
