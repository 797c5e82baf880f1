use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::common::ChatMessage;

/// How history is combined with messages that arrived live before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeOrder {
    /// History is appended after whatever is already in the log.
    Arrival,
    /// History is merged in by timestamp; entries already present are skipped.
    #[default]
    Timestamp,
}

/// Ordered message log of one open conversation.
///
/// Entries are never mutated once appended; they can only be removed one by
/// one or all at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationLog {
    messages: Vec<ChatMessage>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Removes the first entry carrying persisted id `id`.
    pub fn remove(&mut self, id: i64) -> Option<ChatMessage> {
        let index = self
            .messages
            .iter()
            .position(|message| message.id == Some(id))?;
        Some(self.messages.remove(index))
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Merges a history response into the log and returns how many entries
    /// were added.
    pub fn merge_history(&mut self, history: Vec<ChatMessage>, order: MergeOrder) -> usize {
        match order {
            MergeOrder::Arrival => {
                let added = history.len();
                self.messages.extend(history);
                added
            }
            MergeOrder::Timestamp => self.merge_by_timestamp(history),
        }
    }

    fn merge_by_timestamp(&mut self, history: Vec<ChatMessage>) -> usize {
        let known: HashSet<i64> = self.messages.iter().filter_map(|message| message.id).collect();
        let mut incoming: Vec<ChatMessage> = history
            .into_iter()
            .filter(|message| message.id.is_none_or(|id| !known.contains(&id)))
            .collect();
        incoming.sort_by_key(|message| message.timestamp);
        let added = incoming.len();
        if added == 0 {
            return 0;
        }

        // Stable two-way merge: existing entries keep their relative order,
        // a history entry goes ahead of any existing entry that is newer.
        let existing = std::mem::take(&mut self.messages);
        let mut merged = Vec::with_capacity(existing.len() + added);
        let mut incoming = incoming.into_iter().peekable();
        for message in existing {
            while let Some(next) = incoming.next_if(|next| next.timestamp <= message.timestamp) {
                merged.push(next);
            }
            merged.push(message);
        }
        merged.extend(incoming);
        self.messages = merged;
        added
    }
}
