//! Versioned text documents.

use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Content hash used as a document version: lowercase hex MD5 of the UTF-8
/// text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash(String);

impl Hash {
    pub fn of(text: &str) -> Self {
        Self(format!("{:x}", Md5::digest(text.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl From<String> for Hash {
    fn from(hex: String) -> Self {
        Self(hex)
    }
}

impl From<&str> for Hash {
    fn from(hex: &str) -> Self {
        Self(hex.to_owned())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable text plus its version hash. Editing produces a new document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    text: String,
    hash: Hash,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let hash = Hash::of(&text);
        Self { text, hash }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    /// Length in chars, the unit every offset in the engine uses.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl From<String> for Document {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Document {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hashes() {
        assert_eq!(
            Hash::of("The quick brown fox jumps over the lazy dog").as_str(),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
        assert_eq!(Hash::of("foo\n").as_str(), "d3b07384d113edec49eaa6238ad5ff00");
        assert_eq!(Hash::of("foo\nbar").as_str(), "a76999788386641a3ec798554f1fe7e6");
        assert_eq!(Hash::of("").as_str(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_document_hash_tracks_text() {
        let a = Document::new("foo\n");
        let b = Document::from("foo\n".to_string());
        let c = Document::new("foo");
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
        assert_eq!(a.hash().short(), "d3b07384");
    }

    #[test]
    fn test_len_counts_chars() {
        let doc = Document::new("héllo");
        assert_eq!(doc.len(), 5);
        assert!(!doc.is_empty());
        assert!(Document::default().is_empty());
    }
}
