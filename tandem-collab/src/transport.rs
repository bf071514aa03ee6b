//! Message-oriented connections to a document channel.
//!
//! ```text
//!   dial(service) ──► resolve ──► open(endpoint, doc_id) ──► Connection
//!   Connecting        Resolving   Connected                   ... Disconnected
//! ```
//!
//! A [`Transport`] finds a server by its advertised name and opens a
//! [`Connection`] to one document channel on it. Bytes go out through
//! [`Connection::send`]; everything that comes back, including the final
//! disconnect, arrives as a [`TransportEvent`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::discovery::Advertisement;
use crate::protocol::{Command, ProtocolError};
use crate::registry::ConnectionId;

/// Path prefix under which document channels are served.
pub const CHANNEL_PREFIX: &str = "/doc/";

// ───────────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Resolving,
    Connected,
    /// Terminal.
    Disconnected,
}

impl ConnectionState {
    /// Whether `self → next` is a legal transition. States only move
    /// forward and nothing leaves `Disconnected`.
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Resolving)
                | (Connecting, Connected)
                | (Resolving, Connected)
                | (Connecting | Resolving | Connected, Disconnected)
        )
    }
}

/// Shared, observable connection state.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatus {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_advance_to(next) {
                log::trace!("connection state {current:?} -> {next:?}");
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn close(&self) -> bool {
        self.advance(ConnectionState::Disconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.get() == ConnectionState::Disconnected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

// ───────────────────────────────────────────────────────────────────
// Addressing
// ───────────────────────────────────────────────────────────────────

/// Where a server can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// WebSocket URL of a document channel on this endpoint.
    pub fn channel_url(&self, doc_id: &str) -> String {
        format!("ws://{}:{}{}", self.host, self.port, channel_path(doc_id))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

pub fn channel_path(doc_id: &str) -> String {
    format!("{CHANNEL_PREFIX}{doc_id}")
}

/// Extract the document id from a `/doc/{docId}` request path.
pub fn parse_channel_path(path: &str) -> Result<&str, TransportError> {
    match path.strip_prefix(CHANNEL_PREFIX) {
        Some(doc_id) if !doc_id.is_empty() && !doc_id.contains('/') => Ok(doc_id),
        _ => Err(TransportError::InvalidPath(path.to_owned())),
    }
}

// ───────────────────────────────────────────────────────────────────
// Errors and events
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out resolving service '{0}'")]
    ResolveTimeout(String),
    #[error("service '{0}' not found")]
    ServiceNotFound(String),
    #[error("service name '{0}' already advertised")]
    NameTaken(String),
    #[error("connection refused by {0}")]
    ConnectionRefused(String),
    #[error("connection closed")]
    Closed,
    #[error("invalid channel path '{0}'")]
    InvalidPath(String),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// What a connection observes from its channel.
#[derive(Debug)]
pub enum TransportEvent {
    /// A frame broadcast by another member.
    Message(Vec<u8>),
    /// The connection ended; `None` for an orderly close.
    Disconnected(Option<TransportError>),
}

// ───────────────────────────────────────────────────────────────────
// Connection
// ───────────────────────────────────────────────────────────────────

/// Sending half of a connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionSender {
    id: ConnectionId,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    status: ConnectionStatus,
}

impl ConnectionSender {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue bytes for the channel. Never blocks.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.status.get() != ConnectionState::Connected {
            return Err(TransportError::Closed);
        }
        self.outgoing.send(bytes).map_err(|_| TransportError::Closed)
    }

    pub fn send_command(&self, command: &Command) -> Result<(), TransportError> {
        log::trace!("{} sending {command}", self.id);
        self.send(command.encode()?)
    }

    pub fn state(&self) -> ConnectionState {
        self.status.get()
    }

    pub fn close(&self) {
        if self.status.close() {
            log::debug!("connection {} closed locally", self.id);
        }
    }
}

/// An open connection to one document channel.
pub struct Connection {
    doc_id: String,
    sender: ConnectionSender,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.sender.id)
            .field("doc_id", &self.doc_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Assemble a connection from the channels a transport's pump task
    /// services: `outgoing` carries bytes to send, `events` everything
    /// received.
    pub fn new(
        id: ConnectionId,
        doc_id: impl Into<String>,
        outgoing: mpsc::UnboundedSender<Vec<u8>>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        status: ConnectionStatus,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            sender: ConnectionSender {
                id,
                outgoing,
                status,
            },
            events,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.sender.id
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn sender(&self) -> ConnectionSender {
        self.sender.clone()
    }

    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.sender.send(bytes)
    }

    pub fn send_command(&self, command: &Command) -> Result<(), TransportError> {
        self.sender.send_command(command)
    }

    /// Next event, or `None` once the disconnect has been delivered.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    pub fn state(&self) -> ConnectionState {
        self.sender.state()
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.sender.status
    }

    pub fn close(&self) {
        self.sender.close();
    }

    /// Hand events to callbacks on a background task. `on_disconnect` runs
    /// once, after the last message.
    pub fn listen<R, D>(mut self, mut on_receive: R, on_disconnect: D) -> ConnectionHandle
    where
        R: FnMut(Vec<u8>) + Send + 'static,
        D: FnOnce(Option<TransportError>) + Send + 'static,
    {
        let sender = self.sender.clone();
        let task = tokio::spawn(async move {
            let mut reason = None;
            while let Some(event) = self.events.recv().await {
                match event {
                    TransportEvent::Message(bytes) => on_receive(bytes),
                    TransportEvent::Disconnected(e) => {
                        reason = e;
                        break;
                    }
                }
            }
            on_disconnect(reason);
        });
        ConnectionHandle { sender, task }
    }
}

/// A connection whose events are being delivered to callbacks.
pub struct ConnectionHandle {
    sender: ConnectionSender,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn sender(&self) -> &ConnectionSender {
        &self.sender
    }

    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.sender.send(bytes)
    }

    pub fn state(&self) -> ConnectionState {
        self.sender.state()
    }

    pub fn close(&self) {
        self.sender.close();
    }

    /// Wait until the disconnect callback has run.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            log::warn!("connection listener for {} failed: {e}", self.sender.id);
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Transport
// ───────────────────────────────────────────────────────────────────

/// Discovery plus connections.
pub trait Transport: Send + Sync {
    /// Publish a server under `name`. Dropping the handle withdraws it.
    fn advertise(&self, name: &str, port: u16) -> Result<Advertisement, TransportError>;

    /// Find an advertised server, waiting up to `timeout` for it to appear.
    fn resolve(
        &self,
        name: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Endpoint, TransportError>> + Send;

    /// Open a connection to `doc_id` on `endpoint`, driving `status` to
    /// `Connected` on success and `Disconnected` on failure.
    fn open(
        &self,
        endpoint: &Endpoint,
        doc_id: &str,
        status: ConnectionStatus,
    ) -> impl Future<Output = Result<Connection, TransportError>> + Send;

    fn connect(
        &self,
        endpoint: &Endpoint,
        doc_id: &str,
    ) -> impl Future<Output = Result<Connection, TransportError>> + Send {
        self.open(endpoint, doc_id, ConnectionStatus::new())
    }
}

/// Resolve `service` and connect to `doc_id` on it.
///
/// A resolve timeout closes only this connection attempt.
pub async fn dial<T: Transport>(
    transport: &T,
    service: &str,
    doc_id: &str,
    timeout: Duration,
) -> Result<Connection, TransportError> {
    dial_with_status(transport, service, doc_id, timeout, ConnectionStatus::new()).await
}

/// [`dial`], reporting progress through a caller-owned status.
pub async fn dial_with_status<T: Transport>(
    transport: &T,
    service: &str,
    doc_id: &str,
    timeout: Duration,
    status: ConnectionStatus,
) -> Result<Connection, TransportError> {
    status.advance(ConnectionState::Resolving);
    let endpoint = match transport.resolve(service, timeout).await {
        Ok(endpoint) => endpoint,
        Err(e) => {
            log::warn!("could not resolve '{service}': {e}");
            status.close();
            return Err(e);
        }
    };
    log::debug!("resolved '{service}' to {endpoint}");
    transport.open(&endpoint, doc_id, status).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        assert!(Connecting.can_advance_to(Resolving));
        assert!(Resolving.can_advance_to(Connected));
        assert!(Connected.can_advance_to(Disconnected));
        assert!(!Connected.can_advance_to(Resolving));
        assert!(!Disconnected.can_advance_to(Connecting));
        assert!(!Disconnected.can_advance_to(Connected));
        assert!(!Disconnected.can_advance_to(Disconnected));
    }

    #[test]
    fn test_status_never_leaves_disconnected() {
        let status = ConnectionStatus::new();
        assert_eq!(status.get(), ConnectionState::Connecting);
        assert!(status.advance(ConnectionState::Resolving));
        assert!(status.close());
        assert!(!status.advance(ConnectionState::Connected));
        assert!(!status.close());
        assert!(status.is_closed());
    }

    #[tokio::test]
    async fn test_status_subscribers_see_close() {
        let status = ConnectionStatus::new();
        let mut rx = status.subscribe();
        status.close();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_channel_paths() {
        assert_eq!(channel_path("2"), "/doc/2");
        assert_eq!(parse_channel_path("/doc/2").unwrap(), "2");
        assert!(parse_channel_path("/doc/").is_err());
        assert!(parse_channel_path("/docs/2").is_err());
        assert!(parse_channel_path("/doc/a/b").is_err());
        assert_eq!(
            Endpoint::new("127.0.0.1", 9090).channel_url("notes"),
            "ws://127.0.0.1:9090/doc/notes"
        );
    }

    #[test]
    fn test_send_requires_connected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let status = ConnectionStatus::new();
        let conn = Connection::new(Uuid::new_v4(), "doc", tx, events_rx, status.clone());

        assert!(matches!(conn.send(vec![1]), Err(TransportError::Closed)));
        status.advance(ConnectionState::Connected);
        conn.send(vec![1]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![1]);
        conn.close();
        assert!(matches!(conn.send(vec![2]), Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_listen_delivers_then_disconnects() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let conn = Connection::new(Uuid::new_v4(), "doc", tx, events_rx, ConnectionStatus::new());

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let done_tx = seen_tx.clone();
        let handle = conn.listen(
            move |bytes| {
                let _ = seen_tx.send(bytes);
            },
            move |reason| {
                assert!(reason.is_none());
                let _ = done_tx.send(b"bye".to_vec());
            },
        );
        events_tx.send(TransportEvent::Message(vec![1])).unwrap();
        events_tx.send(TransportEvent::Disconnected(None)).unwrap();
        handle.finished().await;

        assert_eq!(seen_rx.recv().await.unwrap(), vec![1]);
        assert_eq!(seen_rx.recv().await.unwrap(), b"bye".to_vec());
    }
}
