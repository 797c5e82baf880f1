use std::collections::{BTreeSet, HashMap};

use futures::future::join_all;

use crate::common::{ChatError, ConversationSummary, SessionContext, UserId, placeholder_name};
use crate::network::ChatBackend;

/// Looks up a user's display name, degrading to a placeholder on any failure.
pub async fn resolve_display_name<B: ChatBackend>(backend: &B, id: &UserId) -> String {
    match backend.fetch_user(id).await {
        Ok(record) => record.display_name(id),
        Err(err) => {
            log::warn!("Could not resolve name for user {id}: {err}");
            placeholder_name(id)
        }
    }
}

/// Resolves every distinct id concurrently.
pub async fn resolve_display_names<'a, B, I>(backend: &B, ids: I) -> HashMap<UserId, String>
where
    B: ChatBackend,
    I: IntoIterator<Item = &'a UserId>,
{
    let distinct: BTreeSet<&UserId> = ids.into_iter().collect();
    let lookups = distinct.into_iter().map(|id| async move {
        let name = resolve_display_name(backend, id).await;
        (id.clone(), name)
    });
    join_all(lookups).await.into_iter().collect()
}

/// Danh sách hội thoại của người dùng hiện tại, độc lập với session chat.
pub struct ConversationDirectory<B> {
    context: SessionContext,
    backend: B,
    conversations: Vec<ConversationSummary>,
}

impl<B: ChatBackend> ConversationDirectory<B> {
    pub fn new(context: SessionContext, backend: B) -> Self {
        Self {
            context,
            backend,
            conversations: Vec::new(),
        }
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    /// Re-fetches the listing. On failure the previous list is kept.
    pub async fn refresh(&mut self) -> Result<&[ConversationSummary], ChatError> {
        let fetched = self.backend.fetch_conversations(&self.context.user_id).await;
        let mut conversations = match fetched {
            Ok(conversations) => conversations,
            Err(err) => {
                log::warn!("Failed to load conversations for {}: {err}", self.context.user_id);
                return Err(err);
            }
        };

        let names =
            resolve_display_names(&self.backend, conversations.iter().map(|c| &c.peer_id)).await;
        for conversation in &mut conversations {
            if let Some(name) = names.get(&conversation.peer_id) {
                conversation.display_name = name.clone();
            }
        }

        log::info!("Loaded {} conversations", conversations.len());
        self.conversations = conversations;
        Ok(&self.conversations)
    }

    /// Deletes the conversation with `peer_id`; the local list only changes
    /// once the backend confirms.
    pub async fn delete(&mut self, peer_id: &UserId) -> Result<(), ChatError> {
        if let Err(err) = self
            .backend
            .delete_conversation(&self.context.user_id, peer_id)
            .await
        {
            log::warn!("Failed to delete conversation with {peer_id}: {err}");
            return Err(err);
        }
        self.conversations.retain(|conversation| &conversation.peer_id != peer_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, summary};

    fn directory(backend: &FakeBackend) -> ConversationDirectory<FakeBackend> {
        ConversationDirectory::new(SessionContext::new("7".into()), backend.clone())
    }

    #[tokio::test]
    async fn refresh_resolves_names_once_per_peer() {
        let backend = FakeBackend::with(|state| {
            state.users.insert("42".into(), "Asha".into());
            state.conversations =
                vec![summary("42", "hi"), summary("42", "again"), summary("9", "yo")];
        });
        let mut directory = directory(&backend);

        let listed = directory.refresh().await.unwrap();

        let names: Vec<_> = listed.iter().map(|c| c.display_name.as_str()).collect();
        assert_eq!(names, ["Asha", "Asha", "User 9"]);
        assert_eq!(backend.state().user_lookups, 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_list() {
        let backend = FakeBackend::with(|state| state.conversations = vec![summary("42", "hi")]);
        let mut directory = directory(&backend);
        directory.refresh().await.unwrap();

        backend.state().fail_conversations = true;
        assert!(directory.refresh().await.is_err());

        assert_eq!(directory.conversations().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_summary_only_after_backend_success() {
        let backend = FakeBackend::with(|state| {
            state.conversations = vec![summary("42", "hi"), summary("9", "yo")];
        });
        let mut directory = directory(&backend);
        directory.refresh().await.unwrap();

        backend.state().fail_delete_conversation = true;
        assert!(directory.delete(&"42".into()).await.is_err());
        assert_eq!(directory.conversations().len(), 2);

        backend.state().fail_delete_conversation = false;
        directory.delete(&"42".into()).await.unwrap();

        let peers: Vec<_> = directory.conversations().iter().map(|c| c.peer_id.as_str()).collect();
        assert_eq!(peers, ["9"]);
        assert_eq!(
            backend.state().deleted_conversations,
            [(UserId::new("7"), UserId::new("42"))]
        );
    }
}
