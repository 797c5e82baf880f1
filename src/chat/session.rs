//! Per-screen chat session: owns the broker connection, the message log and
//! the history fetch for one peer.
//!
//! Everything runs on the task that drives [`ChatSession::run`]. Backend
//! requests (history, delete, clear, archive) are spawned so the loop keeps
//! serving frames and commands while they are in flight; all of them are
//! aborted when the session closes.

use std::collections::HashSet;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::common::{ChatError, ChatMessage, SessionCommand, SessionContext, SessionEvent, UserId};
use crate::network::{ChatBackend, ConnectionState, Transport, TransportEvent};

use super::history::HistoryLoader;
use super::log::{ConversationLog, MergeOrder};
use super::reconnect::ReconnectPolicy;

pub const SEND_DESTINATION: &str = "/app/chat.send";

type HistoryTask = JoinHandle<Result<Vec<ChatMessage>, ChatError>>;

/// A backend call started by a view command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRequest {
    DeleteMessage(i64),
    ClearConversation,
    ArchiveConversation,
}

type RequestTask = JoinHandle<(BackendRequest, Result<(), ChatError>)>;

/// Inbound messages are addressed to the recipient, not to the conversation.
pub fn inbox_topic(user_id: &UserId) -> String {
    format!("/topic/messages/{user_id}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub merge_order: MergeOrder,
    pub reconnect: ReconnectPolicy,
}

pub struct ChatSession<B: ChatBackend, T: Transport> {
    context: SessionContext,
    peer_id: UserId,
    backend: B,
    transport: T,
    options: SessionOptions,
    log: ConversationLog,
    archived: bool,
    history: Option<HistoryTask>,
    requests: FuturesUnordered<RequestTask>,
    /// Ids deleted in this session; a late history response must not bring them back.
    deleted_ids: HashSet<i64>,
    reconnect_attempts: u32,
    reconnect_at: Option<Instant>,
    closed: bool,
    event_sender: mpsc::UnboundedSender<SessionEvent>,
}

impl<B: ChatBackend, T: Transport> ChatSession<B, T> {
    pub fn new(
        context: SessionContext,
        peer_id: UserId,
        backend: B,
        transport: T,
        options: SessionOptions,
        event_sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            context,
            peer_id,
            backend,
            transport,
            options,
            log: ConversationLog::new(),
            archived: false,
            history: None,
            requests: FuturesUnordered::new(),
            deleted_ids: HashSet::new(),
            reconnect_attempts: 0,
            reconnect_at: None,
            closed: false,
            event_sender,
        }
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    /// Starts connecting and, in parallel, fetching history.
    pub fn open(&mut self) {
        if self.closed {
            return;
        }
        log::info!(
            "Opening chat between {} and {}",
            self.context.user_id,
            self.peer_id
        );
        self.transport.connect();
        self.emit(SessionEvent::StatusChanged(self.transport.state()));

        let loader = HistoryLoader::new(self.backend.clone());
        self.history = Some(loader.spawn(self.context.user_id.clone(), self.peer_id.clone()));
    }

    /// Drives the session until the view closes it or drops its sender.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        self.open();

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::Close) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                Some(joined) = self.requests.next(), if !self.requests.is_empty() => {
                    match joined {
                        Ok((request, result)) => {
                            // Failures are already logged and surfaced as notices.
                            let _ = self.finish_request(request, result);
                        }
                        Err(err) => log::warn!("Backend request task failed: {err}"),
                    }
                }
                Some(event) = self.transport.next_event() => {
                    self.handle_transport_event(event);
                }
                result = join_history(&mut self.history) => {
                    self.apply_history(result);
                }
                () = wait_until(self.reconnect_at) => {
                    self.reconnect();
                }
            }
        }

        self.close();
    }

    /// Never waits on the backend: requests are started here and finished by
    /// [`finish_request`](Self::finish_request) when they complete.
    pub fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SendMessage(text) => {
                // Failures are already logged and surfaced as notices.
                let _ = self.send_message(&text);
            }
            SessionCommand::DeleteMessage(id) => {
                self.start_request(BackendRequest::DeleteMessage(id))
            }
            SessionCommand::ClearConversation => {
                self.start_request(BackendRequest::ClearConversation)
            }
            SessionCommand::ArchiveConversation => {
                self.start_request(BackendRequest::ArchiveConversation)
            }
            SessionCommand::Close => self.close(),
        }
    }

    fn start_request(&mut self, request: BackendRequest) {
        if self.closed {
            log::debug!("Ignoring {request:?} after teardown");
            return;
        }

        let backend = self.backend.clone();
        let user_id = self.context.user_id.clone();
        let peer_id = self.peer_id.clone();
        self.requests.push(tokio::spawn(async move {
            let result = match request {
                BackendRequest::DeleteMessage(id) => backend.delete_message(id).await,
                BackendRequest::ClearConversation => {
                    backend.delete_conversation(&user_id, &peer_id).await
                }
                BackendRequest::ArchiveConversation => {
                    backend.archive_conversation(&user_id, &peer_id).await
                }
            };
            (request, result)
        }));
    }

    /// Applies the outcome of a request started by [`handle_command`](Self::handle_command).
    pub fn finish_request(
        &mut self,
        request: BackendRequest,
        result: Result<(), ChatError>,
    ) -> Result<(), ChatError> {
        self.ensure_open()?;
        match request {
            BackendRequest::DeleteMessage(id) => self.finish_delete(id, result),
            BackendRequest::ClearConversation => self.finish_clear(result),
            BackendRequest::ArchiveConversation => self.finish_archive(result),
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.closed {
            log::debug!("Ignoring transport event after teardown: {event:?}");
            return;
        }

        match event {
            TransportEvent::Connected => {
                self.reconnect_attempts = 0;
                let topic = inbox_topic(&self.context.user_id);
                if let Err(err) = self.transport.subscribe(&topic) {
                    log::warn!("Subscribe to {topic} failed: {err}");
                }
                self.emit(SessionEvent::StatusChanged(ConnectionState::Connected));
            }
            TransportEvent::Frame { topic, body } => {
                if topic != inbox_topic(&self.context.user_id) {
                    log::debug!("Ignoring frame for foreign topic {topic}");
                    return;
                }
                match ChatMessage::from_frame(&body) {
                    Ok(message) => {
                        self.log.push(message.clone());
                        self.emit(SessionEvent::MessageAppended(message));
                    }
                    Err(err) => log::warn!("Dropping frame on {topic}: {err}"),
                }
            }
            TransportEvent::Closed { reason } => {
                log::warn!("Chat connection closed: {reason}");
                self.emit(SessionEvent::StatusChanged(ConnectionState::Disconnected));
                self.schedule_reconnect();
            }
            TransportEvent::Failed { reason } => {
                log::warn!("Chat connection failed: {reason}");
                self.emit(SessionEvent::StatusChanged(ConnectionState::Disconnected));
                self.emit(SessionEvent::Notice(format!("Could not connect: {reason}")));
                self.schedule_reconnect();
            }
        }
    }

    /// Merges the history response. A failed fetch leaves the log as it is.
    pub fn apply_history(&mut self, result: Result<Vec<ChatMessage>, ChatError>) {
        self.history = None;
        if self.closed {
            return;
        }

        match result {
            Ok(mut history) => {
                history.retain(|message| {
                    message.id.is_none_or(|id| !self.deleted_ids.contains(&id))
                });
                let added = self.log.merge_history(history, self.options.merge_order);
                log::info!("Merged {added} history messages with {}", self.peer_id);
                self.emit(SessionEvent::HistoryMerged {
                    log: self.log.messages().to_vec(),
                });
            }
            Err(err) => {
                log::warn!("Failed to load chat history with {}: {err}", self.peer_id);
                self.emit(SessionEvent::Notice("Could not load earlier messages".to_string()));
            }
        }
    }

    /// Publishes `text` and appends it to the log without waiting for an echo.
    pub fn send_message(&mut self, text: &str) -> Result<ChatMessage, ChatError> {
        let result = self.try_send(text);
        if let Err(err) = &result {
            log::warn!("Message not sent: {err}");
            self.emit(SessionEvent::Notice(format!("Message not sent: {err}")));
        }
        result
    }

    fn try_send(&mut self, text: &str) -> Result<ChatMessage, ChatError> {
        self.ensure_open()?;
        if text.trim().is_empty() {
            return Err(ChatError::Validation("message is empty".to_string()));
        }
        if self.transport.state() != ConnectionState::Connected {
            return Err(ChatError::NotConnected);
        }

        let message = ChatMessage::outgoing(
            self.context.user_id.clone(),
            self.peer_id.clone(),
            text,
        );
        let payload = serde_json::to_string(&message)?;
        self.transport.publish(SEND_DESTINATION, &payload)?;

        self.log.push(message.clone());
        self.emit(SessionEvent::MessageAppended(message.clone()));
        Ok(message)
    }

    pub async fn delete_message(&mut self, id: i64) -> Result<(), ChatError> {
        self.ensure_open()?;
        let result = self.backend.delete_message(id).await;
        self.finish_request(BackendRequest::DeleteMessage(id), result)
    }

    /// Clears the log once the backend confirms the conversation is gone.
    pub async fn clear_conversation(&mut self) -> Result<(), ChatError> {
        self.ensure_open()?;
        let result = self
            .backend
            .delete_conversation(&self.context.user_id, &self.peer_id)
            .await;
        self.finish_request(BackendRequest::ClearConversation, result)
    }

    pub async fn archive_conversation(&mut self) -> Result<(), ChatError> {
        self.ensure_open()?;
        let result = self
            .backend
            .archive_conversation(&self.context.user_id, &self.peer_id)
            .await;
        self.finish_request(BackendRequest::ArchiveConversation, result)
    }

    fn finish_delete(&mut self, id: i64, result: Result<(), ChatError>) -> Result<(), ChatError> {
        if let Err(err) = result {
            log::warn!("Failed to delete message {id}: {err}");
            self.emit(SessionEvent::Notice(format!("Could not delete message: {err}")));
            return Err(err);
        }
        self.deleted_ids.insert(id);
        if self.log.remove(id).is_some() {
            self.emit(SessionEvent::MessageDeleted(id));
        }
        Ok(())
    }

    fn finish_clear(&mut self, result: Result<(), ChatError>) -> Result<(), ChatError> {
        if let Err(err) = result {
            log::warn!("Failed to clear conversation with {}: {err}", self.peer_id);
            self.emit(SessionEvent::Notice(format!("Could not clear conversation: {err}")));
            return Err(err);
        }
        // A history response still in flight predates the clear.
        if let Some(task) = self.history.take() {
            task.abort();
        }
        self.log.clear();
        self.emit(SessionEvent::ConversationCleared);
        Ok(())
    }

    fn finish_archive(&mut self, result: Result<(), ChatError>) -> Result<(), ChatError> {
        if let Err(err) = result {
            log::warn!("Failed to archive conversation with {}: {err}", self.peer_id);
            self.emit(SessionEvent::Notice(format!("Could not archive conversation: {err}")));
            return Err(err);
        }
        self.archived = true;
        self.emit(SessionEvent::ConversationArchived);
        Ok(())
    }

    /// Tears the session down. Safe to call more than once; the transport is
    /// disconnected on the first call only.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(task) = self.history.take() {
            task.abort();
        }
        for request in self.requests.iter() {
            request.abort();
        }
        self.requests.clear();
        self.reconnect_at = None;
        self.transport.disconnect();
        log::info!("Closed chat with {}", self.peer_id);
        self.emit(SessionEvent::StatusChanged(ConnectionState::Disconnected));
    }

    fn reconnect(&mut self) {
        self.reconnect_at = None;
        if self.closed || self.transport.state() != ConnectionState::Disconnected {
            return;
        }
        log::info!("Reconnecting (attempt {})", self.reconnect_attempts);
        self.transport.connect();
        self.emit(SessionEvent::StatusChanged(self.transport.state()));
    }

    fn schedule_reconnect(&mut self) {
        let attempt = self.reconnect_attempts + 1;
        match self.options.reconnect.delay_for(attempt) {
            Some(delay) => {
                self.reconnect_attempts = attempt;
                self.reconnect_at = Some(Instant::now() + delay);
                self.emit(SessionEvent::ReconnectScheduled { attempt, delay });
            }
            None => {
                log::warn!(
                    "Giving up on reconnecting after {} attempts",
                    self.reconnect_attempts
                );
                self.emit(SessionEvent::ReconnectExhausted {
                    attempts: self.reconnect_attempts,
                });
            }
        }
    }

    fn ensure_open(&self) -> Result<(), ChatError> {
        if self.closed {
            Err(ChatError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.event_sender.send(event).is_err() {
            log::debug!("Chat view is gone; dropping session event");
        }
    }
}

impl<B: ChatBackend, T: Transport> Drop for ChatSession<B, T> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn join_history(task: &mut Option<HistoryTask>) -> Result<Vec<ChatMessage>, ChatError> {
    let Some(handle) = task.as_mut() else {
        return std::future::pending().await;
    };
    let result = match handle.await {
        Ok(result) => result,
        Err(err) => Err(ChatError::Fetch(format!("history task failed: {err}"))),
    };
    *task = None;
    result
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
