use std::collections::{BTreeSet, HashMap};

use crate::common::{ChatMessage, SessionEvent, UserId, placeholder_name};
use crate::network::ConnectionState;

use super::components::chat_area;

/// Trạng thái cục bộ của màn hình chat.
pub struct ChatScreenState {
    pub self_id: UserId,
    pub peer_id: UserId,
    pub names: HashMap<UserId, String>,
    pub status: ConnectionState,
    pub archived: bool,
}

impl ChatScreenState {
    pub fn new(self_id: UserId, peer_id: UserId, names: HashMap<UserId, String>) -> Self {
        Self {
            self_id,
            peer_id,
            names,
            status: ConnectionState::Disconnected,
            archived: false,
        }
    }

    pub fn name_of(&self, id: &UserId) -> String {
        if id == &self.self_id {
            return "You".to_string();
        }
        self.names
            .get(id)
            .cloned()
            .unwrap_or_else(|| placeholder_name(id))
    }

    /// Senders in `event` whose names have not been looked up yet.
    pub fn unknown_senders(&self, event: &SessionEvent) -> Vec<UserId> {
        let messages: &[ChatMessage] = match event {
            SessionEvent::MessageAppended(message) => std::slice::from_ref(message),
            SessionEvent::HistoryMerged { log } => log,
            _ => return Vec::new(),
        };
        let unknown: BTreeSet<&UserId> = messages
            .iter()
            .map(|message| &message.sender_id)
            .filter(|id| **id != self.self_id && !self.names.contains_key(*id))
            .collect();
        unknown.into_iter().cloned().collect()
    }

    pub fn learn_names(&mut self, names: HashMap<UserId, String>) {
        self.names.extend(names);
    }

    pub fn header(&self) -> String {
        format!("Chat with {} (#{})", self.name_of(&self.peer_id), self.peer_id)
    }

    fn line_for(&self, message: &ChatMessage) -> String {
        chat_area::format_message(message, &self.name_of(&message.sender_id))
    }

    /// Applies a session event and returns the lines to print.
    pub fn apply(&mut self, event: SessionEvent) -> Vec<String> {
        match event {
            SessionEvent::StatusChanged(status) => {
                if status == self.status {
                    return Vec::new();
                }
                self.status = status;
                let label = match status {
                    ConnectionState::Disconnected => "disconnected",
                    ConnectionState::Connecting => "connecting...",
                    ConnectionState::Connected => "connected",
                };
                vec![format!("-- {label} --")]
            }
            SessionEvent::MessageAppended(message) => vec![self.line_for(&message)],
            SessionEvent::HistoryMerged { log } => {
                let mut lines = vec![format!("-- {} --", self.header())];
                lines.extend(log.iter().map(|message| self.line_for(message)));
                lines
            }
            SessionEvent::MessageDeleted(id) => vec![format!("-- message #{id} deleted --")],
            SessionEvent::ConversationCleared => vec!["-- conversation cleared --".to_string()],
            SessionEvent::ConversationArchived => {
                self.archived = true;
                vec!["-- conversation archived --".to_string()]
            }
            SessionEvent::ReconnectScheduled { attempt, delay } => vec![format!(
                "-- reconnecting in {:.1}s (attempt {attempt}) --",
                delay.as_secs_f64()
            )],
            SessionEvent::ReconnectExhausted { attempts } => vec![format!(
                "-- connection lost; gave up after {attempts} attempts. Type /quit to leave --"
            )],
            SessionEvent::Notice(text) => vec![format!("! {text}")],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::message_at;

    fn state() -> ChatScreenState {
        ChatScreenState::new(
            "7".into(),
            "42".into(),
            HashMap::from([(UserId::new("42"), "Asha".to_string())]),
        )
    }

    #[test]
    fn names_prefer_you_then_book_then_placeholder() {
        let state = state();

        assert_eq!(state.name_of(&"7".into()), "You");
        assert_eq!(state.name_of(&"42".into()), "Asha");
        assert_eq!(state.name_of(&"9".into()), "User 9");
    }

    #[test]
    fn unknown_senders_lists_each_new_id_once() {
        let mut state = state();
        let event = SessionEvent::HistoryMerged {
            log: vec![
                message_at(Some(1), "42", "7", "hi", 0),
                message_at(Some(2), "9", "7", "yo", 1),
                message_at(Some(3), "9", "7", "again", 2),
                message_at(None, "7", "42", "hello", 3),
            ],
        };

        assert_eq!(state.unknown_senders(&event), [UserId::new("9")]);

        state.learn_names(HashMap::from([(UserId::new("9"), "Bo".to_string())]));
        assert!(state.unknown_senders(&event).is_empty());
        assert_eq!(state.name_of(&"9".into()), "Bo");
    }

    #[test]
    fn history_redraws_the_whole_log() {
        let mut state = state();

        let lines = state.apply(SessionEvent::HistoryMerged {
            log: vec![
                message_at(Some(1), "42", "7", "hi", 0),
                message_at(None, "7", "42", "hello", 1),
            ],
        });

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "-- Chat with Asha (#42) --");
        assert!(lines[1].ends_with("Asha: hi (#1)"));
        assert!(lines[2].ends_with("You: hello"));
    }

    #[test]
    fn repeated_status_is_printed_once() {
        let mut state = state();

        assert_eq!(
            state.apply(SessionEvent::StatusChanged(ConnectionState::Connected)),
            ["-- connected --"]
        );
        assert!(state.apply(SessionEvent::StatusChanged(ConnectionState::Connected)).is_empty());
    }

    #[test]
    fn archive_and_reconnect_events_render() {
        let mut state = state();

        state.apply(SessionEvent::ConversationArchived);
        let lines = state.apply(SessionEvent::ReconnectScheduled {
            attempt: 2,
            delay: Duration::from_millis(1_500),
        });

        assert!(state.archived);
        assert_eq!(lines, ["-- reconnecting in 1.5s (attempt 2) --"]);
    }
}
