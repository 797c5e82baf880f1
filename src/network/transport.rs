use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

use crate::common::ChatError;

use super::stomp::{Command, Frame};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// What the adapter reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// One inbound frame for a subscribed topic, in receipt order.
    Frame { topic: String, body: String },
    /// The broker or the network closed an established connection.
    Closed { reason: String },
    /// The connection never got established.
    Failed { reason: String },
}

/// Duplex link to the message broker.
///
/// `connect` only starts the attempt; its outcome arrives through
/// [`next_event`](Transport::next_event). After `disconnect` returns no
/// further events are delivered.
pub trait Transport {
    fn state(&self) -> ConnectionState;

    fn connect(&mut self);

    fn subscribe(&mut self, topic: &str) -> Result<(), ChatError>;

    fn publish(&mut self, destination: &str, payload: &str) -> Result<(), ChatError>;

    fn disconnect(&mut self);

    async fn next_event(&mut self) -> Option<TransportEvent>;
}

#[derive(Debug, Default)]
struct Link {
    generation: u64,
    state: ConnectionState,
}

enum LinkEvent {
    Connected,
    Message {
        subscription: Option<String>,
        body: String,
    },
    Closed(String),
    Failed(String),
}

/// STOMP 1.2 over a WebSocket, one I/O task per connection.
pub struct StompTransport {
    endpoint: Url,
    host: String,
    link: Arc<Mutex<Link>>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    task: Option<JoinHandle<()>>,
    /// subscription id -> topic
    subscriptions: HashMap<String, String>,
    next_subscription: u32,
}

impl StompTransport {
    pub fn new(endpoint: &str) -> Result<Self, ChatError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| {
                ChatError::Connection(format!("invalid broker url `{endpoint}`: {err}"))
            })?;
        let host = endpoint
            .host_str()
            .ok_or_else(|| ChatError::Connection(format!("broker url `{endpoint}` has no host")))?
            .to_string();

        Ok(Self {
            endpoint,
            host,
            link: Arc::new(Mutex::new(Link::default())),
            outbound: None,
            events: None,
            task: None,
            subscriptions: HashMap::new(),
            next_subscription: 0,
        })
    }

    fn send_frame(&self, frame: Frame) -> Result<(), ChatError> {
        self.outbound
            .as_ref()
            .ok_or(ChatError::NotConnected)?
            .send(frame)
            .map_err(|_| ChatError::NotConnected)
    }

    fn reset(&mut self) {
        self.outbound = None;
        self.events = None;
        self.task = None;
        self.subscriptions.clear();
    }
}

impl Transport for StompTransport {
    fn state(&self) -> ConnectionState {
        lock(&self.link).state
    }

    fn connect(&mut self) {
        let generation = {
            let mut link = lock(&self.link);
            if link.state != ConnectionState::Disconnected {
                log::debug!("connect() ignored while {:?}", link.state);
                return;
            }
            link.generation += 1;
            link.state = ConnectionState::Connecting;
            link.generation
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.reset();
        self.outbound = Some(outbound_tx);
        self.events = Some(event_rx);

        log::info!("Connecting to broker at {}", self.endpoint);
        self.task = Some(tokio::spawn(drive_connection(
            self.endpoint.to_string(),
            self.host.clone(),
            Arc::clone(&self.link),
            generation,
            outbound_rx,
            event_tx,
        )));
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ChatError> {
        if self.state() != ConnectionState::Connected {
            return Err(ChatError::NotConnected);
        }
        if self.subscriptions.values().any(|existing| existing == topic) {
            return Err(ChatError::AlreadySubscribed(topic.to_string()));
        }

        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        self.send_frame(Frame::subscribe(&id, topic))?;
        log::info!("Subscribed to {topic} ({id})");
        self.subscriptions.insert(id, topic.to_string());
        Ok(())
    }

    fn publish(&mut self, destination: &str, payload: &str) -> Result<(), ChatError> {
        if self.state() != ConnectionState::Connected {
            return Err(ChatError::NotConnected);
        }
        self.send_frame(Frame::send(destination, payload))
    }

    fn disconnect(&mut self) {
        let previous = {
            let mut link = lock(&self.link);
            link.generation += 1;
            std::mem::replace(&mut link.state, ConnectionState::Disconnected)
        };

        // Dropping the receiver is what guarantees silence from here on.
        self.events = None;
        let outbound = self.outbound.take();
        let task = self.task.take();
        match (previous, outbound) {
            (ConnectionState::Connected, Some(outbound)) => {
                // The I/O task flushes DISCONNECT and closes the socket itself.
                let _ = outbound.send(Frame::disconnect());
            }
            _ => {
                if let Some(task) = task {
                    task.abort();
                }
            }
        }
        self.subscriptions.clear();

        if previous != ConnectionState::Disconnected {
            log::info!("Disconnected from broker at {}", self.endpoint);
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            let Some(events) = self.events.as_mut() else {
                return std::future::pending().await;
            };
            let Some(event) = events.recv().await else {
                self.events = None;
                continue;
            };

            match event {
                LinkEvent::Connected => return Some(TransportEvent::Connected),
                LinkEvent::Message { subscription, body } => {
                    let topic = subscription
                        .as_ref()
                        .and_then(|id| self.subscriptions.get(id));
                    match topic {
                        Some(topic) => {
                            return Some(TransportEvent::Frame {
                                topic: topic.clone(),
                                body,
                            });
                        }
                        None => {
                            log::debug!("Dropping frame for unknown subscription {subscription:?}");
                        }
                    }
                }
                LinkEvent::Closed(reason) => {
                    self.reset();
                    return Some(TransportEvent::Closed { reason });
                }
                LinkEvent::Failed(reason) => {
                    self.reset();
                    return Some(TransportEvent::Failed { reason });
                }
            }
        }
    }
}

impl Drop for StompTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn lock(link: &Mutex<Link>) -> MutexGuard<'_, Link> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sets the state only if `generation` is still the live connection.
/// Returns the previous state, or `None` when the connection was superseded.
fn replace_state(
    link: &Mutex<Link>,
    generation: u64,
    state: ConnectionState,
) -> Option<ConnectionState> {
    let mut link = lock(link);
    (link.generation == generation).then(|| std::mem::replace(&mut link.state, state))
}

fn connection_error(err: tungstenite::Error) -> ChatError {
    ChatError::Connection(err.to_string())
}

async fn drive_connection(
    endpoint: String,
    host: String,
    link: Arc<Mutex<Link>>,
    generation: u64,
    outbound: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let result = run_connection(&endpoint, &host, &link, generation, outbound, &events).await;

    let event = match (replace_state(&link, generation, ConnectionState::Disconnected), result) {
        (None, _) => return,
        (Some(_), Ok(())) => LinkEvent::Closed("connection closed".to_string()),
        (Some(ConnectionState::Connected), Err(err)) => LinkEvent::Closed(err.to_string()),
        (Some(_), Err(err)) => LinkEvent::Failed(err.to_string()),
    };
    match &event {
        LinkEvent::Failed(reason) => log::warn!("Broker connection to {endpoint} failed: {reason}"),
        LinkEvent::Closed(reason) => log::warn!("Broker connection to {endpoint} closed: {reason}"),
        _ => {}
    }
    let _ = events.send(event);
}

async fn run_connection(
    endpoint: &str,
    host: &str,
    link: &Mutex<Link>,
    generation: u64,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    events: &mpsc::UnboundedSender<LinkEvent>,
) -> Result<(), ChatError> {
    let (socket, _) = tokio_tungstenite::connect_async(endpoint)
        .await
        .map_err(|err| ChatError::Connection(format!("websocket handshake failed: {err}")))?;
    let (mut sink, mut stream) = socket.split();

    sink.send(WsMessage::Text(Frame::connect(host).encode()))
        .await
        .map_err(connection_error)?;
    tokio::time::timeout(HANDSHAKE_TIMEOUT, await_connected(&mut stream))
        .await
        .map_err(|_| ChatError::Connection("timed out waiting for CONNECTED".to_string()))??;

    if replace_state(link, generation, ConnectionState::Connected).is_none() {
        return Ok(());
    }
    let _ = events.send(LinkEvent::Connected);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        let closing = frame.command == Command::Disconnect;
                        sink.send(WsMessage::Text(frame.encode()))
                            .await
                            .map_err(connection_error)?;
                        if closing {
                            let _ = sink.close().await;
                            return Ok(());
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        return Ok(());
                    }
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(WsMessage::Text(text))) => handle_inbound(&text, events)?,
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(connection_error(err)),
                }
            }
        }
    }
}

async fn await_connected<S>(stream: &mut S) -> Result<(), ChatError>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let WsMessage::Text(text) = message.map_err(connection_error)? else {
            continue;
        };
        match Frame::parse(&text)? {
            Some(frame) if frame.command == Command::Connected => {
                log::debug!(
                    "STOMP session established (version {})",
                    frame.header("version").unwrap_or("?")
                );
                return Ok(());
            }
            Some(frame) if frame.command == Command::Error => {
                return Err(ChatError::Connection(broker_error(&frame)));
            }
            _ => {}
        }
    }
    Err(ChatError::Connection("socket closed during STOMP handshake".to_string()))
}

fn handle_inbound(text: &str, events: &mpsc::UnboundedSender<LinkEvent>) -> Result<(), ChatError> {
    let frame = match Frame::parse(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => return Ok(()),
        Err(err) => {
            log::warn!("Ignoring unreadable frame from broker: {err}");
            return Ok(());
        }
    };

    match frame.command {
        Command::Message => {
            let subscription = frame.header("subscription").map(str::to_string);
            let _ = events.send(LinkEvent::Message {
                subscription,
                body: frame.body,
            });
            Ok(())
        }
        Command::Error => Err(ChatError::Connection(broker_error(&frame))),
        Command::Receipt => {
            log::debug!("Receipt {:?}", frame.header("receipt-id"));
            Ok(())
        }
        other => {
            log::debug!("Ignoring unexpected {} frame", other.as_str());
            Ok(())
        }
    }
}

fn broker_error(frame: &Frame) -> String {
    match frame.header("message") {
        Some(message) => format!("broker error: {message}"),
        None if !frame.body.is_empty() => format!("broker error: {}", frame.body.trim()),
        None => "broker error".to_string(),
    }
}
