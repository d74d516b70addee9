//! Outbound messages: hub invocation first, local state after.
//!
//! A send is all-or-nothing. Nothing local changes until the hub has
//! acknowledged `SendMessage`; a refused or failed invocation leaves the
//! message list and previews exactly as they were. So does an acknowledgment
//! that arrives after the sender signed out.

use serde_json::Value;

use crate::connection::{ConnectionManager, SEND_MESSAGE};
use crate::conversations::ConversationStore;
use crate::error::ChatError;
use crate::model::{Draft, Message};
use crate::reconciler::MessageReconciler;

/// Why a send did not go through.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message text is empty")]
    EmptyText,
    #[error("no conversation selected")]
    NoConversation,
    #[error("not signed in")]
    NotAuthenticated,
    #[error("realtime connection is not connected")]
    NotConnected,
    #[error("send rejected: {0}")]
    Rejected(#[source] ChatError),
}

/// Deliver `draft` over the hub, then record it locally.
///
/// On acknowledgment the optimistic entry goes into `reconciler` (when its
/// conversation is visible) and the conversation preview is updated.
/// Returns the entry as listed, which is the server's copy when the echo
/// beat the acknowledgment.
///
/// # Errors
///
/// Returns a [`SendError`] without touching any state when the draft is
/// incomplete, the connection is not `Connected`, or the hub refuses.
/// `still_signed_in` is checked again once the hub answers; if the sender's
/// credential went away meanwhile the send fails with
/// [`ChatError::ConnectionLost`].
pub async fn send(
    connection: &ConnectionManager,
    reconciler: &mut MessageReconciler,
    conversations: &mut ConversationStore,
    draft: Draft,
    still_signed_in: impl Fn() -> bool,
) -> Result<Message, SendError> {
    if draft.text.trim().is_empty() {
        return Err(SendError::EmptyText);
    }
    if draft.conversation_id.is_empty() {
        return Err(SendError::NoConversation);
    }
    if draft.sender_id.is_empty() {
        return Err(SendError::NotAuthenticated);
    }
    if !connection.is_connected() {
        tracing::warn!(conversation_id = %draft.conversation_id, state = %connection.state(), "send refused while not connected");
        return Err(SendError::NotConnected);
    }

    let arguments = vec![
        Value::String(draft.conversation_id.clone()),
        Value::String(draft.sender_id.clone()),
        Value::String(draft.receiver_id.clone()),
        Value::String(draft.text.clone()),
    ];
    match connection.invoke(SEND_MESSAGE, arguments).await {
        Ok(_) => {}
        Err(ChatError::NotConnected) => return Err(SendError::NotConnected),
        Err(e) => {
            tracing::warn!(conversation_id = %draft.conversation_id, error = %e, "send failed");
            return Err(SendError::Rejected(e));
        }
    }
    if !still_signed_in() {
        tracing::warn!(conversation_id = %draft.conversation_id, "acknowledgment arrived after sign-out; send dropped");
        return Err(SendError::Rejected(ChatError::ConnectionLost));
    }

    let message = reconciler.append_optimistic(&draft);
    conversations.apply_incoming_message(&message);
    tracing::debug!(conversation_id = %message.conversation_id, id = %message.id, "message sent");
    Ok(message)
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
