//! Per-conversation message list with optimistic/pushed reconciliation.
//!
//! DESIGN
//! ======
//! Messages reach the visible list through three paths:
//! - history fetched over REST when a conversation is selected
//! - optimistic entries appended after the hub acknowledges a send
//! - `ReceiveMessage` pushes from the hub (which echo our own sends too)
//!
//! A locally sent message therefore shows up twice: once under a provisional
//! `temp-…` id and once under the server's durable id. The dedup rule, in
//! order:
//! 1. same durable id already listed -> duplicate
//! 2. same text + same sender + `sent_at` less than one second apart ->
//!    the same logical message; a provisional entry adopts the server's id
//!
//! INVARIANTS
//! ==========
//! - The list only ever holds messages of the visible conversation.
//! - The list is sorted by `sent_at`; equal timestamps keep arrival order.
//! - History responses apply only while their ticket is current.

use time::{Duration, OffsetDateTime};

use crate::model::{Draft, Message, PushPayload, provisional_id};

/// Two copies of the same text from the same sender closer than this are
/// one logical message. Both sides are UTC: optimistic entries use
/// `now_utc()` and offset-less server stamps are read as UTC (see
/// [`timestamp::parse`](crate::model::timestamp::parse)).
pub const ECHO_WINDOW: Duration = Duration::seconds(1);

/// Identifies one history request; only the latest one may apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryTicket(u64);

/// What happened to a pushed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// New entry inserted into the visible list.
    Appended,
    /// Matched an optimistic entry, which now carries the durable id.
    Confirmed { provisional_id: String },
    /// Already listed; dropped.
    Duplicate,
    /// Belongs to a conversation that is not visible; list untouched.
    OtherConversation,
}

/// A validated push and its effect on the visible list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ingested {
    pub message: Message,
    pub disposition: Disposition,
}

/// Why a push was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MalformedPush {
    #[error("push event has no conversation id")]
    MissingConversation,
    #[error("push event has no text")]
    MissingText,
}

enum Match {
    SameId,
    Echo(usize),
}

#[derive(Clone, Debug, Default)]
pub struct MessageReconciler {
    conversation_id: Option<String>,
    messages: Vec<Message>,
    ticket: u64,
    loading: bool,
}

impl MessageReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Conversation whose messages are visible.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// True between [`Self::begin_history`] and the matching apply/fail.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    // =========================================================================
    // HISTORY
    // =========================================================================

    /// Switch the visible conversation and start a history load.
    ///
    /// Any earlier ticket becomes stale.
    pub fn begin_history(&mut self, conversation_id: &str) -> HistoryTicket {
        self.ticket = self.ticket.wrapping_add(1);
        self.conversation_id = Some(conversation_id.to_owned());
        self.messages.clear();
        self.loading = true;
        HistoryTicket(self.ticket)
    }

    #[must_use]
    pub fn is_current(&self, ticket: HistoryTicket) -> bool {
        ticket.0 == self.ticket && self.conversation_id.is_some()
    }

    /// Install fetched history if `ticket` is still current.
    ///
    /// Pushes that arrived while the fetch was in flight are merged back in
    /// through the dedup rule. Returns `false` for a stale response.
    pub fn apply_history(&mut self, ticket: HistoryTicket, mut history: Vec<Message>) -> bool {
        if !self.is_current(ticket) {
            tracing::debug!(?ticket, "stale history response discarded");
            return false;
        }

        let conversation_id = self.conversation_id.clone().unwrap_or_default();
        history.retain(|m| m.conversation_id == conversation_id);
        history.sort_by_key(|m| m.sent_at);

        let live = std::mem::replace(&mut self.messages, history);
        for msg in live {
            if self.find_match(&msg).is_none() {
                self.insert_sorted(msg);
            }
        }
        self.loading = false;
        true
    }

    /// Record a failed history fetch. Returns `false` for a stale ticket.
    pub fn fail_history(&mut self, ticket: HistoryTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.loading = false;
        true
    }

    // =========================================================================
    // PUSH
    // =========================================================================

    /// Validate and merge a server push stamped with the local clock.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedPush`] when the event lacks a conversation id or
    /// text; the list is left untouched.
    pub fn ingest_push(&mut self, push: PushPayload) -> Result<Ingested, MalformedPush> {
        self.ingest_push_at(push, OffsetDateTime::now_utc())
    }

    /// [`Self::ingest_push`] with an explicit "now" for missing fields.
    ///
    /// # Errors
    ///
    /// See [`Self::ingest_push`].
    pub fn ingest_push_at(&mut self, push: PushPayload, now: OffsetDateTime) -> Result<Ingested, MalformedPush> {
        let message = validate_push(push, now)?;

        if self.conversation_id.as_deref() != Some(message.conversation_id.as_str()) {
            return Ok(Ingested { message, disposition: Disposition::OtherConversation });
        }

        let disposition = match self.find_match(&message) {
            Some(Match::SameId) => Disposition::Duplicate,
            Some(Match::Echo(idx)) if self.messages[idx].is_provisional() && !message.is_provisional() => {
                let provisional = self.messages.remove(idx);
                let provisional_id = provisional.id.clone();
                self.insert_sorted(Message {
                    id: message.id.clone(),
                    sent_at: message.sent_at,
                    is_read: message.is_read,
                    is_deleted: message.is_deleted,
                    ..provisional
                });
                Disposition::Confirmed { provisional_id }
            }
            Some(Match::Echo(_)) => Disposition::Duplicate,
            None => {
                self.insert_sorted(message.clone());
                Disposition::Appended
            }
        };

        Ok(Ingested { message, disposition })
    }

    // =========================================================================
    // OPTIMISTIC
    // =========================================================================

    /// Synthesize a provisional entry for an acknowledged send.
    pub fn append_optimistic(&mut self, draft: &Draft) -> Message {
        self.append_optimistic_at(draft, OffsetDateTime::now_utc())
    }

    /// [`Self::append_optimistic`] with an explicit send time.
    ///
    /// Only the visible conversation's list is touched. When the server echo
    /// already arrived, that confirmed entry is returned and nothing is added.
    pub fn append_optimistic_at(&mut self, draft: &Draft, at: OffsetDateTime) -> Message {
        let message = Message {
            id: provisional_id(at),
            conversation_id: draft.conversation_id.clone(),
            sender_id: draft.sender_id.clone(),
            receiver_id: draft.receiver_id.clone(),
            text: draft.text.clone(),
            sent_at: at,
            is_read: false,
            is_deleted: false,
        };

        if self.conversation_id.as_deref() != Some(draft.conversation_id.as_str()) {
            return message;
        }

        if let Some(existing) = self.messages.iter().find(|m| !m.is_provisional() && is_echo(m, &message)) {
            return existing.clone();
        }

        self.insert_sorted(message.clone());
        message
    }

    pub fn clear(&mut self) {
        self.ticket = self.ticket.wrapping_add(1);
        self.conversation_id = None;
        self.messages.clear();
        self.loading = false;
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Apply the dedup rule. Among echo candidates a provisional entry wins,
    /// so repeated identical sends resolve one-to-one.
    fn find_match(&self, incoming: &Message) -> Option<Match> {
        if !incoming.is_provisional() && self.messages.iter().any(|m| m.id == incoming.id) {
            return Some(Match::SameId);
        }

        let mut first_echo = None;
        for (idx, m) in self.messages.iter().enumerate() {
            if is_echo(m, incoming) {
                if m.is_provisional() {
                    return Some(Match::Echo(idx));
                }
                first_echo.get_or_insert(idx);
            }
        }
        first_echo.map(Match::Echo)
    }

    fn insert_sorted(&mut self, message: Message) {
        let idx = self.messages.partition_point(|m| m.sent_at <= message.sent_at);
        self.messages.insert(idx, message);
    }
}

fn is_echo(a: &Message, b: &Message) -> bool {
    a.text == b.text && a.sender_id == b.sender_id && (a.sent_at - b.sent_at).abs() < ECHO_WINDOW
}

fn validate_push(push: PushPayload, now: OffsetDateTime) -> Result<Message, MalformedPush> {
    let conversation_id = push
        .conversation_id
        .filter(|s| !s.is_empty())
        .ok_or(MalformedPush::MissingConversation)?;
    let text = push.text.filter(|s| !s.is_empty()).ok_or(MalformedPush::MissingText)?;

    Ok(Message {
        id: push.id.filter(|s| !s.is_empty()).unwrap_or_else(|| provisional_id(now)),
        conversation_id,
        sender_id: push.sender_id.unwrap_or_default(),
        receiver_id: push.receiver_id.unwrap_or_default(),
        text,
        sent_at: push.sent_at.unwrap_or(now),
        is_read: push.is_read.unwrap_or(false),
        is_deleted: push.is_deleted.unwrap_or(false),
    })
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod tests;
