use chrono::Local;

use crate::common::ConversationSummary;

/// One line per conversation for the `conversations` command.
pub fn render(conversations: &[ConversationSummary]) -> Vec<String> {
    if conversations.is_empty() {
        return vec!["No conversations yet".to_string()];
    }

    conversations
        .iter()
        .map(|conversation| {
            let when = conversation
                .last_timestamp
                .map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            let last = conversation.last_message.as_deref().unwrap_or("");
            format!(
                "{:<20} {:<16} {}  {}",
                conversation.display_name, conversation.peer_id, when, last
            )
        })
        .collect()
}
