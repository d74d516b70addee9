//! Conversation list and last-message previews.

use crate::model::{Conversation, Message};

/// Owns the conversation list and the current selection.
///
/// Loading is a full refresh: [`ConversationStore::replace_all`] swaps the
/// list wholesale. Between refreshes, every message that reaches the client
/// (pushed or sent locally) updates the matching preview in place.
#[derive(Clone, Debug, Default)]
pub struct ConversationStore {
    items: Vec<Conversation>,
    selected: Option<String>,
}

impl ConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn conversations(&self) -> &[Conversation] {
        &self.items
    }

    #[must_use]
    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.conversation_id == conversation_id)
    }

    /// Replace the list with an authoritative snapshot from the server.
    ///
    /// A selection whose conversation disappeared from the snapshot is kept;
    /// the selected id stays meaningful to the reconciler until the user
    /// picks something else.
    pub fn replace_all(&mut self, items: Vec<Conversation>) {
        self.items = items;
    }

    /// Overwrite the preview fields of the conversation the message targets.
    ///
    /// Returns `false` (and changes nothing) when the conversation is not in
    /// the local list; the next full refresh will bring it in.
    pub fn apply_incoming_message(&mut self, message: &Message) -> bool {
        let Some(conv) = self.items.iter_mut().find(|c| c.conversation_id == message.conversation_id) else {
            tracing::debug!(conversation_id = %message.conversation_id, "preview update for unknown conversation ignored");
            return false;
        };
        conv.last_message.clone_from(&message.text);
        conv.last_sender_id.clone_from(&message.sender_id);
        conv.last_sent_at = Some(message.sent_at);
        true
    }

    /// Mark a conversation as the active one. Does not fetch anything.
    pub fn select(&mut self, conversation: &Conversation) {
        self.selected = Some(conversation.conversation_id.clone());
    }

    #[must_use]
    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// The selected conversation with its current preview, if it is listed.
    #[must_use]
    pub fn selected(&self) -> Option<&Conversation> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.selected = None;
    }
}

#[cfg(test)]
#[path = "conversations_test.rs"]
mod tests;
