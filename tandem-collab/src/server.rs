//! WebSocket relay serving document channels.
//!
//! Architecture:
//! ```text
//! Client A ──┐                          ┌──► Client B
//!             ├── /doc/{id} ── Channel ─┤
//! Client C ──┘                          └──► Client C (never A's own frames)
//! ```
//!
//! The server never interprets documents: it relays each binary frame to
//! every other member of the sender's channel. Frames are decoded only for
//! trace logging.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::discovery::{advertised_name, Advertisement};
use crate::protocol::Command;
use crate::registry::{ChannelRegistry, Member};
use crate::transport::{parse_channel_path, Transport, TransportError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Document name the server is advertised under
    pub service_name: String,
    /// Maximum members per document channel
    pub max_peers_per_channel: usize,
    /// Outbox depth at which a slow member is logged
    pub outbox_warn_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            service_name: "tandem".to_string(),
            max_peers_per_channel: 100,
            outbox_warn_len: 1024,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_channels: usize,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<ChannelRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ChannelRegistry::with_max_members(
            config.max_peers_per_channel,
        ));
        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until the listener fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Advertise this server as `"<service_name> @ <host>"`.
    pub fn advertise<T: Transport>(
        &self,
        transport: &T,
        host: &str,
        port: u16,
    ) -> Result<Advertisement, ServerError> {
        let name = advertised_name(&self.config.service_name, host);
        Ok(transport.advertise(&name, port)?)
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<ChannelRegistry>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), ServerError> {
        let mut doc_id = None;
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                match parse_channel_path(request.uri().path()) {
                    Ok(id) => {
                        doc_id = Some(id.to_owned());
                        Ok(response)
                    }
                    Err(e) => {
                        log::warn!("Rejecting {addr}: {e}");
                        let mut error = ErrorResponse::new(Some(e.to_string()));
                        *error.status_mut() = StatusCode::NOT_FOUND;
                        Err(error)
                    }
                }
            },
        )
        .await?;
        let Some(doc_id) = doc_id else {
            return Ok(());
        };

        let id = Uuid::new_v4();
        let (member, inbox) = Member::channel(id);
        let (mut ws_sender, ws_receiver) = ws_stream.split();

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }
        if !registry.join(&doc_id, member).await.joined() {
            stats.write().await.active_connections -= 1;
            ws_sender.send(Message::Close(None)).await?;
            return Ok(());
        }
        log::info!("{addr} joined {doc_id} as {id}");

        let result = Self::relay(
            id,
            &doc_id,
            addr,
            &registry,
            &stats,
            &config,
            ws_sender,
            ws_receiver,
            inbox,
        )
        .await;

        stats.write().await.active_connections -= 1;
        registry.disconnect(id).await;
        log::info!("{addr} left {doc_id}");
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn relay<W, R>(
        id: Uuid,
        doc_id: &str,
        addr: SocketAddr,
        registry: &ChannelRegistry,
        stats: &RwLock<ServerStats>,
        config: &ServerConfig,
        mut ws_sender: W,
        mut ws_receiver: R,
        mut inbox: tokio::sync::mpsc::UnboundedReceiver<crate::registry::Frame>,
    ) -> Result<(), ServerError>
    where
        W: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        {
                            let mut s = stats.write().await;
                            s.total_messages += 1;
                            s.total_bytes += bytes.len() as u64;
                        }
                        if log::log_enabled!(log::Level::Trace) {
                            log::trace!("{id} on {doc_id}: {}", Command::decode(&bytes));
                        }
                        let delivered = registry.broadcast(doc_id, Arc::new(bytes), id).await;
                        log::trace!("relayed to {delivered} member(s)");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::debug!("Connection closed from {addr}");
                        return Ok(());
                    }
                    Some(Ok(Message::Text(_))) => {
                        log::debug!("Ignoring text frame from {addr}");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        return Ok(());
                    }
                },

                // Frames broadcast by other members
                frame = inbox.recv() => match frame {
                    Some(frame) => {
                        let backlog = inbox.len();
                        if backlog >= config.outbox_warn_len {
                            log::warn!("{addr} is {backlog} frames behind on {doc_id}");
                        }
                        ws_sender.send(Message::Binary(frame.to_vec().into())).await?;
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_channels = self.registry.channel_count().await;
        stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.service_name, "tandem");
        assert_eq!(config.max_peers_per_channel, 100);
        assert_eq!(config.outbox_warn_len, 1024);
    }

    #[test]
    fn test_server_custom_config() {
        let config = ServerConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            ..ServerConfig::default()
        };
        let server = SyncServer::new(config);
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = SyncServer::with_defaults();
        assert_eq!(server.stats().await, ServerStats::default());
    }

    #[tokio::test]
    async fn test_advertise_name() {
        let server = SyncServer::new(ServerConfig {
            service_name: "notes.txt".to_string(),
            ..ServerConfig::default()
        });
        let transport = MemoryTransport::new();
        let ad = server.advertise(&transport, "studio", 9090).unwrap();
        assert_eq!(ad.name(), "notes.txt @ studio");
        assert!(transport.directory().lookup("notes.txt @ studio").is_some());
    }
}
