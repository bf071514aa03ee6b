//! Serializable patch bundles between two document versions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{Document, Hash};
use crate::patch::{self, Patch, PatchError};
use crate::position;

/// The patches that turn the document with hash `base` into the one with
/// hash `target`.
///
/// Only the patches are needed to apply a changeset. The hashes let a
/// receiver recognise an update it already has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    base: Hash,
    target: Hash,
    patches: Vec<Patch>,
}

impl Changeset {
    pub fn new(source: &Document, target: &Document) -> Self {
        Self {
            base: source.hash().clone(),
            target: target.hash().clone(),
            patches: patch::make_patches(source.text(), target.text()),
        }
    }

    pub fn from_parts(base: Hash, target: Hash, patches: Vec<Patch>) -> Self {
        Self {
            base,
            target,
            patches,
        }
    }

    pub fn base(&self) -> &Hash {
        &self.base
    }

    pub fn target(&self) -> &Hash {
        &self.target
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Apply to `doc`, which may have drifted from `base`.
    pub fn apply(&self, doc: &Document) -> Result<Document, PatchError> {
        if self.patches.is_empty() {
            return Ok(doc.clone());
        }
        let text = patch::apply(doc.text(), &self.patches)?;
        let applied = Document::new(text);
        if doc.hash() == &self.base && applied.hash() != &self.target {
            log::warn!(
                "changeset {} applied cleanly but produced {} instead of {}",
                self,
                applied.hash().short(),
                self.target.short()
            );
        }
        Ok(applied)
    }

    /// Map a char offset in the base text to the target text.
    pub fn remap(&self, pos: usize) -> usize {
        position::remap(pos, &self.patches)
    }
}

impl fmt::Display for Changeset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{} ({} patches)",
            self.base.short(),
            self.target.short(),
            self.patches.len()
        )
    }
}
