pub mod directory;
pub mod history;
pub mod log;
pub mod reconnect;
pub mod session;

pub use directory::{ConversationDirectory, resolve_display_names};
pub use log::{ConversationLog, MergeOrder};
pub use reconnect::ReconnectPolicy;
pub use session::{ChatSession, SessionOptions};
