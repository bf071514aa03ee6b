//! In-process transport.
//!
//! "Servers" are [`ChannelRegistry`] hubs keyed by port; connections relay
//! straight into them without touching the network. Behaves like the
//! WebSocket transport for everything above the wire, so sessions can be
//! exercised without sockets.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::discovery::{Advertisement, ServiceDirectory};
use crate::registry::{ChannelRegistry, Member};
use crate::transport::{
    Connection, ConnectionState, ConnectionStatus, Endpoint, Transport, TransportError,
    TransportEvent,
};

const HOST: &str = "localhost";

pub struct MemoryTransport {
    directory: Arc<ServiceDirectory>,
    hubs: Mutex<HashMap<u16, Arc<ChannelRegistry>>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_directory(ServiceDirectory::new())
    }

    pub fn with_directory(directory: Arc<ServiceDirectory>) -> Self {
        Self {
            directory,
            hubs: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Arc<ServiceDirectory> {
        &self.directory
    }

    /// Start accepting connections on `port`, returning its registry.
    pub fn serve(&self, port: u16) -> Arc<ChannelRegistry> {
        self.hubs
            .lock()
            .entry(port)
            .or_insert_with(|| {
                log::debug!("memory hub listening on {port}");
                Arc::new(ChannelRegistry::new())
            })
            .clone()
    }

    /// Stop accepting new connections on `port`. Open connections stay up.
    pub fn shutdown(&self, port: u16) -> bool {
        self.hubs.lock().remove(&port).is_some()
    }

    fn hub(&self, port: u16) -> Option<Arc<ChannelRegistry>> {
        self.hubs.lock().get(&port).cloned()
    }
}

impl Transport for MemoryTransport {
    fn advertise(&self, name: &str, port: u16) -> Result<Advertisement, TransportError> {
        self.directory.advertise(name, Endpoint::new(HOST, port))
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
        let Some(hub) = self.hub(endpoint.port) else {
            status.close();
            return Err(TransportError::ConnectionRefused(endpoint.to_string()));
        };

        let id = Uuid::new_v4();
        let (member, mut inbox) = Member::channel(id);
        if !hub.join(doc_id, member).await.joined() {
            status.close();
            return Err(TransportError::ConnectionRefused(endpoint.to_string()));
        }

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if !status.advance(ConnectionState::Connected) {
            hub.leave(doc_id, id).await;
            return Err(TransportError::Closed);
        }
        let mut state_rx = status.subscribe();

        let relay_status = status.clone();
        let doc = doc_id.to_owned();
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    biased;

                    out = outgoing_rx.recv() => match out {
                        Some(bytes) => {
                            hub.broadcast(&doc, Arc::new(bytes), id).await;
                        }
                        None => break None,
                    },
                    frame = inbox.recv() => match frame {
                        Some(frame) => {
                            if events_tx.send(TransportEvent::Message(frame.to_vec())).is_err() {
                                break None;
                            }
                        }
                        None => break Some(TransportError::Closed),
                    },
                    changed = state_rx.changed() => {
                        let closed = changed.is_err()
                            || *state_rx.borrow_and_update() == ConnectionState::Disconnected;
                        if closed {
                            // Frames `send` accepted before the close still go out.
                            while let Ok(bytes) = outgoing_rx.try_recv() {
                                hub.broadcast(&doc, Arc::new(bytes), id).await;
                            }
                            break None;
                        }
                    }
                }
            };

            hub.disconnect(id).await;
            relay_status.close();
            log::debug!("memory connection {id} to {doc} ended");
            let _ = events_tx.send(TransportEvent::Disconnected(reason));
        });

        log::debug!("memory connection {id} joined {doc_id} on {endpoint}");
        Ok(Connection::new(id, doc_id, outgoing_tx, events_rx, status))
    }
}
