use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;

use crate::common::types::timestamp;
use crate::common::{
    ChatError, ChatMessage, ConversationSummary, UserId, UserRecord, placeholder_name,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST operations the chat core needs from the backend.
pub trait ChatBackend: Clone + Send + Sync + 'static {
    fn fetch_user(&self, id: &UserId) -> impl Future<Output = Result<UserRecord, ChatError>> + Send;

    fn fetch_history(
        &self,
        user_id: &UserId,
        other_user_id: &UserId,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, ChatError>> + Send;

    fn delete_message(&self, id: i64) -> impl Future<Output = Result<(), ChatError>> + Send;

    fn delete_conversation(
        &self,
        user_id: &UserId,
        other_user_id: &UserId,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    fn archive_conversation(
        &self,
        user_id: &UserId,
        other_user_id: &UserId,
    ) -> impl Future<Output = Result<(), ChatError>> + Send;

    fn fetch_conversations(
        &self,
        user_id: &UserId,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, ChatError>> + Send;
}

/// Wire shape of `GET /chat/conversations/{userId}` entries.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationRecord {
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    last_message: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_lenient")]
    last_timestamp: Option<DateTime<Utc>>,
}

impl ConversationRecord {
    fn into_summary(self) -> Option<ConversationSummary> {
        let Some(peer_id) = self.user_id else {
            log::warn!("Skipping conversation without a peer id: {:?}", self.last_message);
            return None;
        };
        let display_name = self.user_name.unwrap_or_else(|| placeholder_name(&peer_id));
        Some(ConversationSummary {
            peer_id,
            display_name,
            last_message: self.last_message,
            last_timestamp: self.last_timestamp,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RestBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl RestBackend {
    pub fn new(base_url: &str) -> Result<Self, ChatError> {
        Self::with_timeout(base_url, REQUEST_TIMEOUT)
    }

    /// Every request, body included, fails with `Fetch` once `timeout` elapses.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ChatError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| ChatError::Fetch(format!("invalid api url `{base_url}`: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ChatError::Fetch(format!("api url `{base_url}` cannot be a base")));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ChatError::Fetch(format!("HTTP client: {err}")))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChatError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChatError::Fetch(format!("api url `{}` cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn pair_query<'a>(user_id: &'a UserId, other_user_id: &'a UserId) -> [(&'static str, &'a str); 2] {
    [("userId", user_id.as_str()), ("otherUserId", other_user_id.as_str())]
}

impl ChatBackend for RestBackend {
    async fn fetch_user(&self, id: &UserId) -> Result<UserRecord, ChatError> {
        let url = self.endpoint(&["users", id.as_str()])?;
        let record = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<UserRecord>()
            .await?;
        Ok(record)
    }

    async fn fetch_history(
        &self,
        user_id: &UserId,
        other_user_id: &UserId,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let url = self.endpoint(&["chat", "history"])?;
        let messages = self
            .client
            .get(url)
            .query(&pair_query(user_id, other_user_id))
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<ChatMessage>>()
            .await?;
        log::debug!(
            "Fetched {} history messages between {user_id} and {other_user_id}",
            messages.len()
        );
        Ok(messages)
    }

    async fn delete_message(&self, id: i64) -> Result<(), ChatError> {
        let url = self.endpoint(&["chat", "messages", &id.to_string()])?;
        self.client.delete(url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn delete_conversation(
        &self,
        user_id: &UserId,
        other_user_id: &UserId,
    ) -> Result<(), ChatError> {
        let url = self.endpoint(&["chat", "conversations"])?;
        self.client
            .delete(url)
            .query(&pair_query(user_id, other_user_id))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn archive_conversation(
        &self,
        user_id: &UserId,
        other_user_id: &UserId,
    ) -> Result<(), ChatError> {
        let url = self.endpoint(&["chat", "conversations", "archive"])?;
        self.client
            .post(url)
            .query(&pair_query(user_id, other_user_id))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn fetch_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationSummary>, ChatError> {
        let url = self.endpoint(&["chat", "conversations", user_id.as_str()])?;
        let records = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<ConversationRecord>>()
            .await?;
        Ok(records
            .into_iter()
            .filter_map(ConversationRecord::into_summary)
            .collect())
    }
}
