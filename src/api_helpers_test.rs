//! Scripted [`ChatApi`] for session tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::ChatApi;
use crate::error::ChatError;
use crate::model::{Conversation, Message};

#[derive(Default)]
struct Script {
    conversations: Vec<Conversation>,
    histories: HashMap<String, (Duration, Vec<Message>)>,
    unauthorized: bool,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeChatApi {
    script: Mutex<Script>,
}

impl FakeChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversations(self, conversations: Vec<Conversation>) -> Self {
        self.script.lock().expect("script lock").conversations = conversations;
        self
    }

    /// History for `conversation_id`, answered after `delay`.
    pub fn with_history(self, conversation_id: &str, delay: Duration, messages: Vec<Message>) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .histories
            .insert(conversation_id.to_owned(), (delay, messages));
        self
    }

    pub fn reject_credentials(&self) {
        self.script.lock().expect("script lock").unauthorized = true;
    }

    /// Requests seen so far, as `conversations` or `messages:<id>`.
    pub fn calls(&self) -> Vec<String> {
        self.script.lock().expect("script lock").calls.clone()
    }
}

#[async_trait::async_trait]
impl ChatApi for FakeChatApi {
    async fn conversations(&self, _access_token: &str) -> Result<Vec<Conversation>, ChatError> {
        let mut script = self.script.lock().expect("script lock");
        script.calls.push("conversations".to_owned());
        if script.unauthorized {
            return Err(ChatError::Unauthorized);
        }
        Ok(script.conversations.clone())
    }

    async fn messages(&self, _access_token: &str, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        let (delay, messages) = {
            let mut script = self.script.lock().expect("script lock");
            script.calls.push(format!("messages:{conversation_id}"));
            if script.unauthorized {
                return Err(ChatError::Unauthorized);
            }
            script.histories.get(conversation_id).cloned().unwrap_or_default()
        };
        tokio::time::sleep(delay).await;
        Ok(messages)
    }
}
