/// Lỗi chung của tầng chat.
///
/// `Connection` and `NotConnected` are transport problems, `Fetch` covers
/// every REST call, `Validation` is raised before anything touches the
/// network.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("not connected to the message broker")]
    NotConnected,

    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),

    #[error("request failed: {0}")]
    Fetch(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("cannot encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("chat session is closed")]
    SessionClosed,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Fetch(err.to_string())
    }
}
