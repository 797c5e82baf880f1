use tokio::task::JoinHandle;

use crate::common::{ChatError, ChatMessage, UserId};
use crate::network::ChatBackend;

/// One-shot fetch of the persisted messages between two users.
#[derive(Debug, Clone)]
pub struct HistoryLoader<B> {
    backend: B,
}

impl<B: ChatBackend> HistoryLoader<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the messages in the order the backend sent them (expected to
    /// be oldest first).
    pub async fn load(
        &self,
        user_id: &UserId,
        peer_id: &UserId,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let messages = self.backend.fetch_history(user_id, peer_id).await?;
        if !messages.is_sorted_by_key(|message| message.timestamp) {
            log::debug!("History for {user_id}/{peer_id} is not in ascending timestamp order");
        }
        Ok(messages)
    }

    /// Runs [`load`](Self::load) on its own task so the caller can abort it.
    pub fn spawn(
        self,
        user_id: UserId,
        peer_id: UserId,
    ) -> JoinHandle<Result<Vec<ChatMessage>, ChatError>> {
        tokio::spawn(async move { self.load(&user_id, &peer_id).await })
    }
}
