//! # tandem-collab: Document channels for Tandem
//!
//! Moves [`tandem_core`] changesets between peers editing the same document.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    /doc/{docId}     ┌─────────────┐
//! │ Session     │ ◄─────────────────► │ SyncServer  │
//! │ (per peer)  │    Command frames   │ (relay)     │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌───────────────┐
//! │ Document    │                     │ChannelRegistry│
//! │ + presence  │                     │ (no-echo fan) │
//! └─────────────┘                     └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Tagged commands, bincode envelope
//! - [`presence`]: Selections, cursor colours, remote peers
//! - [`registry`]: Per-document fan-out that never echoes the sender
//! - [`transport`]: Connection state machine and the `Transport` trait
//! - [`discovery`]: In-process service advertisement and resolution
//! - [`memory`]: In-process transport
//! - [`client`]: WebSocket transport
//! - [`server`]: WebSocket relay server
//! - [`session`]: A peer's document, role and reactions to commands

pub mod client;
pub mod discovery;
pub mod memory;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use client::WsTransport;
pub use discovery::{advertised_name, Advertisement, ServiceDirectory};
pub use memory::MemoryTransport;
pub use presence::{CursorColor, PresenceRoom, RemotePeer, Selection, TextRange};
pub use protocol::{Command, ProtocolError};
pub use registry::{ChannelRegistry, ConnectionId, Frame, JoinOutcome, Member, RegistryStats};
pub use server::{ServerConfig, ServerError, ServerStats, SyncServer};
pub use session::{Reaction, Role, Session, SessionConfig, SessionEvent};
pub use transport::{
    dial, dial_with_status, Connection, ConnectionHandle, ConnectionSender, ConnectionState,
    ConnectionStatus, Endpoint, Transport, TransportError, TransportEvent,
};
