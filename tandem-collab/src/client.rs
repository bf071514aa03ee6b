//! WebSocket transport for connecting to a [`SyncServer`](crate::server::SyncServer).
//!
//! Each connection owns one pump task that moves bytes between the
//! connection's outgoing queue and the socket, and turns everything read
//! from the socket into [`TransportEvent`]s.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

use crate::discovery::{Advertisement, ServiceDirectory};
use crate::transport::{
    Connection, ConnectionState, ConnectionStatus, Endpoint, Transport, TransportError,
    TransportEvent,
};

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                TransportError::ConnectionRefused(io.to_string())
            }
            tungstenite::Error::Io(io) => TransportError::Io(io),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            other => TransportError::WebSocket(other.to_string()),
        }
    }
}

/// Connects to document channels over `ws://host:port/doc/{docId}`.
pub struct WsTransport {
    directory: Arc<ServiceDirectory>,
    /// Host advertised for local servers.
    host: String,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(ServiceDirectory::new())
    }
}

impl WsTransport {
    pub fn new(directory: Arc<ServiceDirectory>) -> Self {
        Self::with_host(directory, "127.0.0.1")
    }

    pub fn with_host(directory: Arc<ServiceDirectory>, host: impl Into<String>) -> Self {
        Self {
            directory,
            host: host.into(),
        }
    }

    pub fn directory(&self) -> &Arc<ServiceDirectory> {
        &self.directory
    }
}

impl Transport for WsTransport {
    fn advertise(&self, name: &str, port: u16) -> Result<Advertisement, TransportError> {
        self.directory.advertise(name, Endpoint::new(self.host.clone(), port))
    }

    async fn resolve(&self, name: &str, timeout: Duration) -> Result<Endpoint, TransportError> {
        self.directory.resolve(name, timeout).await
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        doc_id: &str,
        status: ConnectionStatus,
    ) -> Result<Connection, TransportError> {
        if status.is_closed() {
            return Err(TransportError::Closed);
        }
        let url = endpoint.channel_url(doc_id);
        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("failed to connect to {url}: {e}");
                status.close();
                return Err(e.into());
            }
        };
        if !status.advance(ConnectionState::Connected) {
            // Closed while the handshake was in flight.
            return Err(TransportError::Closed);
        }

        let id = Uuid::new_v4();
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut state_rx = status.subscribe();
        let pump_status = status.clone();

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    biased;

                    out = outgoing_rx.recv() => match out {
                        Some(bytes) => {
                            if let Err(e) = ws_writer.send(Message::Binary(bytes.into())).await {
                                break Some(TransportError::from(e));
                            }
                        }
                        None => {
                            let _ = ws_writer.send(Message::Close(None)).await;
                            break None;
                        }
                    },
                    msg = ws_reader.next() => match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            if events_tx.send(TransportEvent::Message(bytes)).is_err() {
                                break None;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break None,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::warn!("connection {id} read error: {e}");
                            break Some(TransportError::from(e));
                        }
                    },
                    changed = state_rx.changed() => {
                        let closed = changed.is_err()
                            || *state_rx.borrow_and_update() == ConnectionState::Disconnected;
                        if closed {
                            // Frames `send` accepted before the close still go out.
                            while let Ok(bytes) = outgoing_rx.try_recv() {
                                if ws_writer.send(Message::Binary(bytes.into())).await.is_err() {
                                    break;
                                }
                            }
                            let _ = ws_writer.send(Message::Close(None)).await;
                            break None;
                        }
                    }
                }
            };

            pump_status.close();
            log::debug!("connection {id} ended");
            let _ = events_tx.send(TransportEvent::Disconnected(reason));
        });

        log::info!("connected to {url} as {id}");
        Ok(Connection::new(id, doc_id, outgoing_tx, events_rx, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = WsTransport::default();
        let status = ConnectionStatus::new();
        let result = transport
            .open(&Endpoint::new("127.0.0.1", port), "doc", status.clone())
            .await;
        assert!(result.is_err());
        assert_eq!(status.get(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_websocket_errors_map_to_transport_errors() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(matches!(
            TransportError::from(tungstenite::Error::Io(refused)),
            TransportError::ConnectionRefused(_)
        ));
        assert!(matches!(
            TransportError::from(tungstenite::Error::ConnectionClosed),
            TransportError::Closed
        ));
    }

    #[test]
    fn test_advertise_uses_host() {
        let transport = WsTransport::with_host(ServiceDirectory::new(), "studio.local");
        let ad = transport.advertise("doc @ studio", 9090).unwrap();
        assert_eq!(ad.endpoint(), &Endpoint::new("studio.local", 9090));
    }
}
