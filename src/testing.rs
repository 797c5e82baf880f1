//! In-memory stand-ins for the backend and the broker used by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use crate::common::{
    ChatError, ChatMessage, ConversationSummary, UserId, UserRecord, placeholder_name,
};
use crate::network::{ChatBackend, ConnectionState, Transport, TransportEvent};

/// Message between `sender` and `recipient` stamped `seconds` past a fixed minute.
pub fn message_at(
    id: Option<i64>,
    sender: &str,
    recipient: &str,
    content: &str,
    seconds: u32,
) -> ChatMessage {
    ChatMessage {
        id,
        local_id: None,
        sender_id: sender.into(),
        recipient_id: recipient.into(),
        content: content.to_string(),
        timestamp: Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, seconds)
            .single()
            .unwrap_or_default(),
    }
}

pub fn summary(peer: &str, last: &str) -> ConversationSummary {
    let peer_id = UserId::new(peer);
    ConversationSummary {
        display_name: placeholder_name(&peer_id),
        peer_id,
        last_message: Some(last.to_string()),
        last_timestamp: None,
    }
}

#[derive(Debug, Default)]
pub struct BackendState {
    pub users: HashMap<UserId, String>,
    pub user_lookups: usize,
    pub history: Vec<ChatMessage>,
    pub fail_history: bool,
    pub conversations: Vec<ConversationSummary>,
    pub fail_conversations: bool,
    pub fail_delete_message: bool,
    pub deleted_messages: Vec<i64>,
    pub fail_delete_conversation: bool,
    pub deleted_conversations: Vec<(UserId, UserId)>,
    pub fail_archive: bool,
    /// Archive requests never complete.
    pub hang_archive: bool,
    pub archived_conversations: Vec<(UserId, UserId)>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    pub fn with(configure: impl FnOnce(&mut BackendState)) -> Self {
        let backend = Self::default();
        configure(&mut backend.state());
        backend
    }

    pub fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap()
    }
}

fn unavailable(what: &str) -> ChatError {
    ChatError::Fetch(format!("{what}: 503 Service Unavailable"))
}

impl ChatBackend for FakeBackend {
    async fn fetch_user(&self, id: &UserId) -> Result<UserRecord, ChatError> {
        let mut state = self.state();
        state.user_lookups += 1;
        match state.users.get(id) {
            Some(name) => Ok(UserRecord {
                name: Some(name.clone()),
            }),
            None => Err(ChatError::Fetch(format!("user {id}: 404 Not Found"))),
        }
    }

    async fn fetch_history(
        &self,
        _user_id: &UserId,
        _other_user_id: &UserId,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let state = self.state();
        if state.fail_history {
            return Err(unavailable("history"));
        }
        Ok(state.history.clone())
    }

    async fn delete_message(&self, id: i64) -> Result<(), ChatError> {
        let mut state = self.state();
        if state.fail_delete_message {
            return Err(unavailable("delete message"));
        }
        state.deleted_messages.push(id);
        Ok(())
    }

    async fn delete_conversation(
        &self,
        user_id: &UserId,
        other_user_id: &UserId,
    ) -> Result<(), ChatError> {
        let mut state = self.state();
        if state.fail_delete_conversation {
            return Err(unavailable("delete conversation"));
        }
        state
            .deleted_conversations
            .push((user_id.clone(), other_user_id.clone()));
        Ok(())
    }

    async fn archive_conversation(
        &self,
        user_id: &UserId,
        other_user_id: &UserId,
    ) -> Result<(), ChatError> {
        let hang = self.state().hang_archive;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        if state.fail_archive {
            return Err(unavailable("archive conversation"));
        }
        state
            .archived_conversations
            .push((user_id.clone(), other_user_id.clone()));
        Ok(())
    }

    async fn fetch_conversations(
        &self,
        _user_id: &UserId,
    ) -> Result<Vec<ConversationSummary>, ChatError> {
        let state = self.state();
        if state.fail_conversations {
            return Err(unavailable("conversations"));
        }
        Ok(state.conversations.clone())
    }
}

/// What the fake broker saw.
#[derive(Debug, Clone, Default)]
pub struct TransportLog {
    pub state: ConnectionState,
    pub connects: usize,
    pub disconnects: usize,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, String)>,
}

pub struct FakeTransport {
    log: Arc<Mutex<TransportLog>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Test-side controls for a [`FakeTransport`] owned by a session.
#[derive(Clone)]
pub struct FakeTransportHandle {
    log: Arc<Mutex<TransportLog>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

pub fn fake_transport() -> (FakeTransport, FakeTransportHandle) {
    let log = Arc::new(Mutex::new(TransportLog::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        FakeTransport {
            log: log.clone(),
            events: rx,
        },
        FakeTransportHandle { log, events: tx },
    )
}

impl FakeTransportHandle {
    /// Marks the link as up, as the broker handshake would.
    pub fn establish(&self) {
        self.log.lock().unwrap().state = ConnectionState::Connected;
    }

    /// Simulates the socket going away underneath the session.
    pub fn drop_link(&self) {
        let mut log = self.log.lock().unwrap();
        log.state = ConnectionState::Disconnected;
        log.subscriptions.clear();
    }

    pub fn push(&self, event: TransportEvent) {
        // Fails only once the session has disconnected.
        let _ = self.events.send(event);
    }

    pub fn snapshot(&self) -> TransportLog {
        self.log.lock().unwrap().clone()
    }
}

impl FakeTransport {
    fn require_connected(&self) -> Result<(), ChatError> {
        if self.log.lock().unwrap().state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ChatError::NotConnected)
        }
    }
}

impl Transport for FakeTransport {
    fn state(&self) -> ConnectionState {
        self.log.lock().unwrap().state
    }

    fn connect(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.connects += 1;
        log.state = ConnectionState::Connecting;
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ChatError> {
        self.require_connected()?;
        let mut log = self.log.lock().unwrap();
        if log.subscriptions.iter().any(|existing| existing == topic) {
            return Err(ChatError::AlreadySubscribed(topic.to_string()));
        }
        log.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, destination: &str, payload: &str) -> Result<(), ChatError> {
        self.require_connected()?;
        self.log
            .lock()
            .unwrap()
            .published
            .push((destination.to_string(), payload.to_string()));
        Ok(())
    }

    fn disconnect(&mut self) {
        {
            let mut log = self.log.lock().unwrap();
            log.disconnects += 1;
            log.state = ConnectionState::Disconnected;
            log.subscriptions.clear();
        }
        self.events.close();
        while self.events.try_recv().is_ok() {}
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}
