//! REST collaborator for the two chat reads.
//!
//! Both endpoints wrap their list in a double envelope:
//! `{ "result": { "result": [...] } }`. A null or absent inner list reads
//! as empty.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::model::{Conversation, Message};

/// Chat reads served over REST.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    /// Conversations visible to the signed-in staff member.
    ///
    /// # Errors
    ///
    /// [`ChatError::Unauthorized`] when the credential is rejected, other
    /// variants for transport or decode failures.
    async fn conversations(&self, access_token: &str) -> Result<Vec<Conversation>, ChatError>;

    /// Full message history of one conversation.
    ///
    /// # Errors
    ///
    /// As for [`ChatApi::conversations`].
    async fn messages(&self, access_token: &str, conversation_id: &str) -> Result<Vec<Message>, ChatError>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: Option<Page<T>>,
}

#[derive(Deserialize)]
struct Page<T> {
    result: Option<Vec<T>>,
}

/// [`ChatApi`] over `reqwest` with bearer authentication.
#[derive(Clone, Debug)]
pub struct RestChatApi {
    http: reqwest::Client,
    base_url: String,
}

impl RestChatApi {
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built.
    pub fn from_config(config: &ChatConfig) -> Result<Self, ChatError> {
        Self::new(&config.api_url, config.request_timeout)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, ChatError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ChatError::ConfigParse(format!("invalid API URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| ChatError::ConfigParse(format!("API URL cannot take a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_list<T: DeserializeOwned>(&self, access_token: &str, segments: &[&str]) -> Result<Vec<T>, ChatError> {
        let url = self.endpoint(segments)?;
        tracing::debug!(%url, "chat api request");
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("chat api rejected the credential");
            return Err(ChatError::Unauthorized);
        }
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(ChatError::Status { status: status.as_u16(), message: body });
        }
        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        Ok(envelope.result.and_then(|page| page.result).unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ChatApi for RestChatApi {
    async fn conversations(&self, access_token: &str) -> Result<Vec<Conversation>, ChatError> {
        self.get_list(access_token, &["chat", "conversations"]).await
    }

    async fn messages(&self, access_token: &str, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        self.get_list(access_token, &["chat", conversation_id, "messages"]).await
    }
}

fn request_error(err: reqwest::Error) -> ChatError {
    if err.is_timeout() {
        ChatError::Timeout("chat api request")
    } else {
        ChatError::Http(err)
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;

#[cfg(test)]
#[path = "api_helpers_test.rs"]
pub(crate) mod test_helpers;
