//! Facade the UI layer drives: one signed-in staff member's chat.
//!
//! DESIGN
//! ======
//! `ChatSession` owns the connection manager, both stores and the
//! reconciler, and every mutation goes through `&mut self`. Asynchronous
//! sources meet in [`ChatSession::next_update`], which selects over:
//! - hub events from the connection driver
//! - the inbox, where spawned history fetches post their results
//! - auth changes published by the [`AuthStore`](crate::auth::AuthStore)
//!
//! History fetches run concurrently with pushes and sends; each carries a
//! ticket and only the newest one may touch the message list.
//!
//! After each change a full [`ChatState`] snapshot is published on a
//! `watch` channel for renderers.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::api::{ChatApi, RestChatApi};
use crate::auth::{AuthIdentity, AuthSnapshot};
use crate::config::{ChatConfig, HubOptions};
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::conversations::ConversationStore;
use crate::dispatcher::{self, SendError};
use crate::error::ChatError;
use crate::model::{ConnectionState, Conversation, Draft, Message};
use crate::reconciler::{HistoryTicket, Ingested, MessageReconciler};
use crate::transport::{Transport, WsTransport};

/// Everything a renderer needs, as one immutable snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatState {
    pub conversations: Vec<Conversation>,
    pub selected: Option<Conversation>,
    pub messages: Vec<Message>,
    pub loading_conversations: bool,
    pub loading_messages: bool,
    pub connection: ConnectionState,
}

/// One thing that happened, for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatUpdate {
    Connection(ConnectionState),
    /// A pushed message was validated; see its disposition for the effect.
    Message(Ingested),
    MalformedPush(String),
    ServerException(String),
    TransportError(String),
    HistoryLoaded { conversation_id: String, count: usize },
    HistoryFailed { conversation_id: String, error: String },
    /// The auth store changed and the connection was re-bound.
    Auth { signed_in: bool },
}

enum InboxNote {
    History {
        ticket: HistoryTicket,
        conversation_id: String,
        result: Result<Vec<Message>, ChatError>,
    },
}

pub struct ChatSession {
    api: Arc<dyn ChatApi>,
    hub_url: String,
    connection: ConnectionManager,
    conversations: ConversationStore,
    reconciler: MessageReconciler,
    auth: watch::Receiver<AuthSnapshot>,
    auth_open: bool,
    /// An auth change was seen but its re-bind has not finished.
    auth_sync_pending: bool,
    /// Identity the live connection was opened for.
    bound: Option<AuthIdentity>,
    inbox_tx: mpsc::UnboundedSender<InboxNote>,
    inbox: mpsc::UnboundedReceiver<InboxNote>,
    loading_conversations: bool,
    state: watch::Sender<ChatState>,
}

impl ChatSession {
    pub fn new(
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn Transport>,
        hub_url: impl Into<String>,
        options: HubOptions,
        auth: watch::Receiver<AuthSnapshot>,
    ) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChatState::default());
        Self {
            api,
            hub_url: hub_url.into(),
            connection: ConnectionManager::new(transport, options),
            conversations: ConversationStore::new(),
            reconciler: MessageReconciler::new(),
            auth,
            auth_open: true,
            auth_sync_pending: false,
            bound: None,
            inbox_tx,
            inbox,
            loading_conversations: false,
            state,
        }
    }

    /// Session over the production REST client and WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built.
    pub fn from_config(config: &ChatConfig, auth: watch::Receiver<AuthSnapshot>) -> Result<Self, ChatError> {
        let api = RestChatApi::from_config(config)?;
        Ok(Self::new(Arc::new(api), Arc::new(WsTransport), config.hub_url.clone(), config.hub.clone(), auth))
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn conversations(&self) -> &[Conversation] {
        self.conversations.conversations()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.reconciler.messages()
    }

    #[must_use]
    pub fn selected(&self) -> Option<&Conversation> {
        self.conversations.selected()
    }

    // =========================================================================
    // AUTH
    // =========================================================================

    /// Bring the connection in line with the current auth snapshot.
    ///
    /// Signed out (or not yet hydrated): disconnect first, then clear the
    /// stores. New identity: reconnect with it, clearing the stores when the
    /// user changed. Same identity: reconnect only if the connection gave up.
    pub async fn sync_auth(&mut self) -> ConnectionState {
        let current = self.auth.borrow_and_update().credential().cloned();
        let Some(identity) = current else {
            self.connection.disconnect();
            if self.bound.take().is_some() {
                tracing::info!("signed out; chat state cleared");
            }
            self.conversations.clear();
            self.reconciler.clear();
            self.loading_conversations = false;
            self.publish();
            return ConnectionState::Disconnected;
        };

        let unchanged = self.bound.as_ref() == Some(&identity);
        if unchanged && self.connection.state() != ConnectionState::Disconnected {
            return self.connection.state();
        }

        self.connection.disconnect();
        let user_changed = self.bound.as_ref().is_some_and(|bound| bound.user.id != identity.user.id);
        if user_changed {
            tracing::info!(user_id = %identity.user.id, "signed-in user changed; chat state cleared");
            self.conversations.clear();
            self.reconciler.clear();
        }
        let state = self.connection.connect(Some(&identity.access_token), Some(&self.hub_url)).await;
        self.bound = Some(identity);
        self.publish();
        state
    }

    // =========================================================================
    // CONVERSATIONS
    // =========================================================================

    /// Refresh the conversation list.
    ///
    /// Without a credential nothing is fetched and the result is empty.
    ///
    /// # Errors
    ///
    /// Returns the REST error; the current list is kept in that case.
    pub async fn load_conversations(&mut self) -> Result<Vec<Conversation>, ChatError> {
        let Some(identity) = self.credential() else {
            tracing::debug!("conversation load skipped: not signed in");
            return Ok(Vec::new());
        };

        self.loading_conversations = true;
        self.publish();
        let result = self.api.conversations(&identity.access_token).await;
        self.loading_conversations = false;

        match result {
            Ok(items) => {
                tracing::debug!(count = items.len(), "conversations loaded");
                self.conversations.replace_all(items);
                self.publish();
                Ok(self.conversations.conversations().to_vec())
            }
            Err(e) => {
                tracing::warn!(error = %e, "conversation load failed");
                self.publish();
                Err(e)
            }
        }
    }

    /// Make `conversation` the visible one and start loading its history.
    ///
    /// The fetch runs in the background; its result arrives through
    /// [`ChatSession::next_update`].
    pub fn select_conversation(&mut self, conversation: &Conversation) {
        self.conversations.select(conversation);
        let conversation_id = conversation.conversation_id.clone();
        let ticket = self.reconciler.begin_history(&conversation_id);

        let Some(identity) = self.credential() else {
            tracing::debug!(%conversation_id, "history load skipped: not signed in");
            self.reconciler.fail_history(ticket);
            self.publish();
            return;
        };

        let api = Arc::clone(&self.api);
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = api.messages(&identity.access_token, &conversation_id).await;
            if inbox.send(InboxNote::History { ticket, conversation_id, result }).is_err() {
                tracing::debug!("session gone; history result dropped");
            }
        });
        self.publish();
    }

    // =========================================================================
    // SENDING
    // =========================================================================

    /// Send `text` to the selected conversation. `true` when the hub
    /// acknowledged it.
    pub async fn send_message(&mut self, text: &str) -> bool {
        match self.try_send_message(text).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "message not sent");
                false
            }
        }
    }

    /// [`ChatSession::send_message`] with the failure reason.
    ///
    /// # Errors
    ///
    /// See [`SendError`]; nothing changes locally on failure.
    pub async fn try_send_message(&mut self, text: &str) -> Result<Message, SendError> {
        let identity = self.credential().ok_or(SendError::NotAuthenticated)?;
        let conversation = self.conversations.selected().ok_or(SendError::NoConversation)?;
        let draft = Draft {
            conversation_id: conversation.conversation_id.clone(),
            sender_id: identity.user.id.clone(),
            receiver_id: conversation.other_user_id.clone(),
            text: text.to_owned(),
        };

        let auth = &self.auth;
        let still_signed_in = || auth.borrow().credential() == Some(&identity);
        let result =
            dispatcher::send(&self.connection, &mut self.reconciler, &mut self.conversations, draft, still_signed_in)
                .await;
        match &result {
            Ok(_) => self.publish(),
            Err(_) if self.credential().as_ref() != Some(&identity) => {
                tracing::info!("credential changed during send; connection closed");
                self.connection.disconnect();
            }
            Err(_) => {}
        }
        result
    }

    // =========================================================================
    // EVENT LOOP
    // =========================================================================

    /// Wait for the next externally visible change and apply it.
    ///
    /// Cancel-safe: dropping the future while an auth change is being applied
    /// leaves it pending, and the next call finishes it first.
    pub async fn next_update(&mut self) -> ChatUpdate {
        if self.auth_sync_pending {
            return self.finish_auth_sync().await;
        }
        loop {
            tokio::select! {
                event = self.connection.next_event() => {
                    return self.apply_connection_event(event);
                }
                note = self.inbox.recv() => {
                    if let Some(update) = note.and_then(|note| self.apply_inbox(note)) {
                        return update;
                    }
                }
                changed = self.auth.changed(), if self.auth_open => {
                    if changed.is_err() {
                        tracing::debug!("auth store dropped; no further auth updates");
                        self.auth_open = false;
                        continue;
                    }
                    self.auth_sync_pending = true;
                    return self.finish_auth_sync().await;
                }
            }
        }
    }

    async fn finish_auth_sync(&mut self) -> ChatUpdate {
        self.sync_auth().await;
        self.auth_sync_pending = false;
        ChatUpdate::Auth { signed_in: self.bound.is_some() }
    }

    fn apply_connection_event(&mut self, event: ConnectionEvent) -> ChatUpdate {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.publish();
                ChatUpdate::Connection(state)
            }
            ConnectionEvent::MessageReceived(push) => match self.reconciler.ingest_push(push) {
                Ok(ingested) => {
                    self.conversations.apply_incoming_message(&ingested.message);
                    tracing::debug!(
                        conversation_id = %ingested.message.conversation_id,
                        id = %ingested.message.id,
                        disposition = ?ingested.disposition,
                        "push applied"
                    );
                    self.publish();
                    ChatUpdate::Message(ingested)
                }
                Err(reason) => {
                    tracing::warn!(%reason, "malformed push discarded");
                    ChatUpdate::MalformedPush(reason.to_string())
                }
            },
            ConnectionEvent::MalformedPush(reason) => ChatUpdate::MalformedPush(reason),
            ConnectionEvent::ServerException(message) => ChatUpdate::ServerException(message),
            ConnectionEvent::TransportError(message) => ChatUpdate::TransportError(message),
        }
    }

    fn apply_inbox(&mut self, note: InboxNote) -> Option<ChatUpdate> {
        let InboxNote::History { ticket, conversation_id, result } = note;
        match result {
            Ok(history) => {
                let count = history.len();
                if !self.reconciler.apply_history(ticket, history) {
                    tracing::debug!(%conversation_id, "stale history discarded");
                    return None;
                }
                tracing::debug!(%conversation_id, count, "history loaded");
                self.publish();
                Some(ChatUpdate::HistoryLoaded { conversation_id, count })
            }
            Err(e) => {
                if !self.reconciler.fail_history(ticket) {
                    return None;
                }
                tracing::warn!(%conversation_id, error = %e, "history load failed");
                self.publish();
                Some(ChatUpdate::HistoryFailed { conversation_id, error: e.to_string() })
            }
        }
    }

    fn credential(&self) -> Option<AuthIdentity> {
        self.auth.borrow().credential().cloned()
    }

    fn publish(&self) {
        self.state.send_replace(ChatState {
            conversations: self.conversations.conversations().to_vec(),
            selected: self.conversations.selected().cloned(),
            messages: self.reconciler.messages().to_vec(),
            loading_conversations: self.loading_conversations,
            loading_messages: self.reconciler.is_loading(),
            connection: self.connection.state(),
        });
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
