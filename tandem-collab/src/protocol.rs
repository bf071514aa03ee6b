//! Tagged command protocol exchanged between peers.
//!
//! Wire format (bincode-encoded envelope):
//! ```text
//! ┌──────────────────┬───────────────────────────┐
//! │ type_tag: String │ payload: Option<Vec<u8>>  │
//! └──────────────────┴───────────────────────────┘
//! ```
//!
//! Payloads by tag: `Doc` UTF-8 text, `Update` bincode changeset
//! (base, target, patches), `Version` and `Name` UTF-8, `Cursor` bincode
//! selection. `GetDoc` and `GetVersion` carry none.
//!
//! Decoding never fails: anything unrecognised becomes
//! [`Command::Undefined`], so newer peers can add commands without breaking
//! older ones.

use std::fmt;

use serde::{Deserialize, Serialize};
use tandem_core::{Changeset, Document, Hash};
use thiserror::Error;

use crate::presence::Selection;

const TAG_UNDEFINED: &str = "Undefined";
const TAG_DOC: &str = "Doc";
const TAG_UPDATE: &str = "Update";
const TAG_VERSION: &str = "Version";
const TAG_GET_DOC: &str = "GetDoc";
const TAG_GET_VERSION: &str = "GetVersion";
const TAG_NAME: &str = "Name";
const TAG_CURSOR: &str = "Cursor";

/// A message between peers on a document channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Unknown or undecodable message.
    Undefined,
    /// Full document snapshot.
    Doc(Document),
    /// Incremental change from one version to another.
    Update(Changeset),
    /// Announces a version hash.
    Version(Hash),
    /// Requests a full snapshot.
    GetDoc,
    /// Requests the current version hash.
    GetVersion,
    /// Announces the sender's display name.
    Name(String),
    /// The sender's caret or selection.
    Cursor(Selection),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    type_tag: String,
    payload: Option<Vec<u8>>,
}

impl Command {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Command::Undefined => TAG_UNDEFINED,
            Command::Doc(_) => TAG_DOC,
            Command::Update(_) => TAG_UPDATE,
            Command::Version(_) => TAG_VERSION,
            Command::GetDoc => TAG_GET_DOC,
            Command::GetVersion => TAG_GET_VERSION,
            Command::Name(_) => TAG_NAME,
            Command::Cursor(_) => TAG_CURSOR,
        }
    }

    pub fn document(&self) -> Option<&Document> {
        match self {
            Command::Doc(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn changeset(&self) -> Option<&Changeset> {
        match self {
            Command::Update(changes) => Some(changes),
            _ => None,
        }
    }

    pub fn version(&self) -> Option<&Hash> {
        match self {
            Command::Version(hash) => Some(hash),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Command::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn selection(&self) -> Option<&Selection> {
        match self {
            Command::Cursor(selection) => Some(selection),
            _ => None,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let envelope = Envelope {
            type_tag: self.type_tag().to_owned(),
            payload: self.payload()?,
        };
        bincode::serde::encode_to_vec(&envelope, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format, degrading to
    /// [`Command::Undefined`] on anything unrecognised.
    pub fn decode(bytes: &[u8]) -> Self {
        Self::try_decode(bytes).unwrap_or_else(|e| {
            log::debug!("undecodable command: {e}");
            Command::Undefined
        })
    }

    /// Deserialize, reporting why a malformed message was rejected.
    /// Unknown tags are not an error and yield `Ok(Command::Undefined)`.
    pub fn try_decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (envelope, _): (Envelope, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;

        let Some(payload) = envelope.payload else {
            return Ok(match envelope.type_tag.as_str() {
                TAG_GET_DOC => Command::GetDoc,
                TAG_GET_VERSION => Command::GetVersion,
                _ => Command::Undefined,
            });
        };

        let command = match envelope.type_tag.as_str() {
            TAG_DOC => Command::Doc(Document::new(utf8(payload)?)),
            TAG_UPDATE => Command::Update(decode_payload(&payload)?),
            TAG_VERSION => Command::Version(Hash::from(utf8(payload)?)),
            TAG_NAME => Command::Name(utf8(payload)?),
            TAG_CURSOR => Command::Cursor(decode_payload(&payload)?),
            _ => Command::Undefined,
        };
        Ok(command)
    }

    fn payload(&self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let payload = match self {
            Command::Undefined | Command::GetDoc | Command::GetVersion => None,
            Command::Doc(doc) => Some(doc.text().as_bytes().to_vec()),
            Command::Update(changes) => Some(encode_payload(changes)?),
            Command::Version(hash) => Some(hash.as_str().as_bytes().to_vec()),
            Command::Name(name) => Some(name.as_bytes().to_vec()),
            Command::Cursor(selection) => Some(encode_payload(selection)?),
        };
        Ok(payload)
    }
}

fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode_payload<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

fn utf8(bytes: Vec<u8>) -> Result<String, ProtocolError> {
    String::from_utf8(bytes).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".{}", self.type_tag())?;
        match self {
            Command::Doc(doc) => write!(f, " {} ({} chars)", doc.hash().short(), doc.len()),
            Command::Update(changes) => write!(f, " {changes}"),
            Command::Version(hash) => write!(f, " {hash}"),
            Command::Name(name) => write!(f, " {name}"),
            Command::Cursor(selection) => {
                write!(f, " {} {}", selection.range.location, selection.range.length)
            }
            Command::Undefined | Command::GetDoc | Command::GetVersion => Ok(()),
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
