use std::time::Duration;

use crate::network::ConnectionState;

use super::types::ChatMessage;

/// Sự kiện từ session gửi lên màn hình chat.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged(ConnectionState),
    MessageAppended(ChatMessage),
    /// History was merged; carries the whole log so the view can redraw.
    HistoryMerged {
        log: Vec<ChatMessage>,
    },
    MessageDeleted(i64),
    ConversationCleared,
    ConversationArchived,
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    /// Hết số lần thử kết nối lại.
    ReconnectExhausted {
        attempts: u32,
    },
    /// Thông báo tạm thời cho người dùng (lỗi không nghiêm trọng).
    Notice(String),
}
