pub mod commands;
pub mod error;
pub mod events;
pub mod types;

pub use commands::SessionCommand;
pub use error::ChatError;
pub use events::SessionEvent;
pub use types::{
    ChatMessage, ConversationSummary, SessionContext, UserId, UserRecord, placeholder_name,
};
