//! One peer's view of a shared document.
//!
//! A [`Session`] owns the document id, the last synced [`Document`], its
//! role and the presence of the other peers. It turns local edits and caret
//! moves into commands, and applies commands received from the channel:
//!
//! ```text
//! local text ──► Session::local_edit ──► Command::Update ──► channel
//! channel ──► Session::receive ──► Reaction { reply, event }
//! ```
//!
//! A *publisher* holds the authoritative document and answers `GetDoc`; a
//! *subscriber* starts empty and asks for a snapshot when it joins. Either
//! side answers a diverged update by resynchronizing rather than merging.

use tandem_core::{Changeset, Document};
use uuid::Uuid;

use crate::presence::{PresenceRoom, Selection, TextRange};
use crate::protocol::Command;
use crate::transport::{Connection, ConnectionSender, TransportError, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name announced to the channel
    pub peer_name: String,
    pub role: Role,
    /// Subscriber sends `GetDoc` in its greeting
    pub request_snapshot_on_join: bool,
}

impl SessionConfig {
    pub fn publisher(peer_name: impl Into<String>) -> Self {
        Self {
            peer_name: peer_name.into(),
            role: Role::Publisher,
            request_snapshot_on_join: false,
        }
    }

    pub fn subscriber(peer_name: impl Into<String>) -> Self {
        Self {
            peer_name: peer_name.into(),
            role: Role::Subscriber,
            request_snapshot_on_join: true,
        }
    }
}

/// Something the host editor should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The whole document was replaced by a snapshot.
    Replaced(Document),
    /// A remote change was applied.
    Patched {
        document: Document,
        changeset: Changeset,
    },
    /// A remote change did not apply; a resync was requested.
    ResyncRequested,
    PeerNamed(String),
    CursorMoved(Selection),
}

/// Outcome of receiving one command.
#[derive(Debug, Default, PartialEq)]
pub struct Reaction {
    /// Command to send back to the channel.
    pub reply: Option<Command>,
    pub event: Option<SessionEvent>,
}

impl Reaction {
    fn none() -> Self {
        Self::default()
    }

    fn event(event: SessionEvent) -> Self {
        Self {
            reply: None,
            event: Some(event),
        }
    }

    fn reply(reply: Command) -> Self {
        Self {
            reply: Some(reply),
            event: None,
        }
    }
}

pub struct Session {
    id: Uuid,
    doc_id: String,
    config: SessionConfig,
    document: Document,
    presence: PresenceRoom,
}

impl Session {
    pub fn new(doc_id: impl Into<String>, document: Document, config: SessionConfig) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            doc_id: doc_id.into(),
            presence: PresenceRoom::new(id),
            config,
            document,
        }
    }

    /// Session owning `document` for the channel.
    pub fn publish(doc_id: impl Into<String>, document: Document, peer_name: &str) -> Self {
        Self::new(doc_id, document, SessionConfig::publisher(peer_name))
    }

    /// Empty session waiting for the publisher's snapshot.
    pub fn subscribe(doc_id: impl Into<String>, peer_name: &str) -> Self {
        Self::new(doc_id, Document::default(), SessionConfig::subscriber(peer_name))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn presence(&self) -> &PresenceRoom {
        &self.presence
    }

    /// Commands to send right after joining the channel.
    pub fn greeting(&self) -> Vec<Command> {
        let mut commands = vec![Command::Name(self.config.peer_name.clone())];
        match self.config.role {
            Role::Publisher => commands.push(Command::Doc(self.document.clone())),
            Role::Subscriber if self.config.request_snapshot_on_join => {
                commands.push(Command::GetDoc)
            }
            Role::Subscriber => {}
        }
        commands
    }

    /// Record new local text. Returns the update to broadcast, or `None` if
    /// nothing changed.
    pub fn local_edit(&mut self, text: impl Into<String>) -> Option<Command> {
        let edited = Document::new(text);
        if edited.hash() == self.document.hash() {
            return None;
        }
        let changes = Changeset::new(&self.document, &edited);
        log::debug!("local edit {changes}");
        self.presence.remap(&changes);
        self.document = edited;
        Some(Command::Update(changes))
    }

    /// Record the local caret. Returns a cursor command unless it did not
    /// move.
    pub fn local_cursor(&mut self, range: TextRange) -> Option<Command> {
        self.presence
            .update_local_selection(range)
            .map(Command::Cursor)
    }

    pub fn receive_bytes(&mut self, bytes: &[u8]) -> Reaction {
        self.receive(Command::decode(bytes))
    }

    /// Apply a command received from the channel.
    pub fn receive(&mut self, command: Command) -> Reaction {
        log::trace!("{} received {command}", self.id);
        match command {
            Command::Update(changes) => self.receive_update(changes),
            Command::Doc(document) => self.receive_snapshot(document),
            Command::GetDoc => match self.config.role {
                Role::Publisher => Reaction::reply(Command::Doc(self.document.clone())),
                Role::Subscriber => Reaction::none(),
            },
            Command::GetVersion => match self.config.role {
                Role::Publisher => Reaction::reply(Command::Version(self.document.hash().clone())),
                Role::Subscriber => Reaction::none(),
            },
            Command::Version(hash) => {
                log::debug!("peer at version {hash}, local {}", self.document.hash());
                Reaction::none()
            }
            Command::Name(name) => {
                log::info!("{name} joined {}", self.doc_id);
                Reaction::event(SessionEvent::PeerNamed(name))
            }
            Command::Cursor(selection) => {
                if self.presence.handle_selection(selection.clone()) {
                    Reaction::event(SessionEvent::CursorMoved(selection))
                } else {
                    Reaction::none()
                }
            }
            Command::Undefined => {
                log::debug!("ignoring undefined command");
                Reaction::none()
            }
        }
    }

    fn receive_update(&mut self, changes: Changeset) -> Reaction {
        if changes.target() == self.document.hash() {
            log::debug!("already at {}", changes.target().short());
            return Reaction::none();
        }
        match changes.apply(&self.document) {
            Ok(document) => {
                self.presence.remap(&changes);
                self.document = document.clone();
                Reaction::event(SessionEvent::Patched {
                    document,
                    changeset: changes,
                })
            }
            Err(e) => {
                log::warn!("update {changes} diverged: {e}");
                let reply = match self.config.role {
                    Role::Publisher => Command::Doc(self.document.clone()),
                    Role::Subscriber => Command::GetDoc,
                };
                Reaction {
                    reply: Some(reply),
                    event: Some(SessionEvent::ResyncRequested),
                }
            }
        }
    }

    fn receive_snapshot(&mut self, document: Document) -> Reaction {
        match self.config.role {
            Role::Publisher => {
                log::debug!("publisher ignores snapshot {}", document.hash().short());
                Reaction::none()
            }
            Role::Subscriber if document.hash() == self.document.hash() => Reaction::none(),
            Role::Subscriber => {
                log::info!(
                    "{} replaced by snapshot {} ({} chars)",
                    self.doc_id,
                    document.hash().short(),
                    document.len()
                );
                self.presence.clamp(document.len());
                self.document = document.clone();
                Reaction::event(SessionEvent::Replaced(document))
            }
        }
    }

    /// Send the greeting over `sender`.
    pub fn start(&self, sender: &ConnectionSender) -> Result<(), TransportError> {
        for command in self.greeting() {
            sender.send_command(&command)?;
        }
        Ok(())
    }

    /// Receive one event from `connection`, apply it and send any reply.
    ///
    /// Returns the resulting session event (`None` for commands with no
    /// visible effect), or the reason the connection ended.
    pub async fn step(
        &mut self,
        connection: &mut Connection,
    ) -> Result<Option<SessionEvent>, TransportError> {
        match connection.recv().await {
            Some(TransportEvent::Message(bytes)) => {
                let reaction = self.receive_bytes(&bytes);
                if let Some(reply) = &reaction.reply {
                    connection.send_command(reply)?;
                }
                Ok(reaction.event)
            }
            Some(TransportEvent::Disconnected(reason)) => Err(reason.unwrap_or(TransportError::Closed)),
            None => Err(TransportError::Closed),
        }
    }
}
