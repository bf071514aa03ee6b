//! # tandem-core: Text synchronization engine for Tandem
//!
//! Everything a peer needs to turn edits into compact, relocatable patches
//! and to replay other peers' patches onto its own copy of a document.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐  diff   ┌──────────┐  group + context  ┌───────────┐
//! │ Document │ ──────► │ Vec<Diff>│ ────────────────► │ Changeset │
//! │ (before) │         └──────────┘                   │ (patches) │
//! └──────────┘                                        └─────┬─────┘
//!                                                           │ apply (bitap relocation,
//!                                                           ▼ all-or-nothing)
//!                                                     ┌──────────┐
//!                                                     │ Document │
//!                                                     │ (after)  │
//!                                                     └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`diff`]: Myers diff with line-mode pre-pass and cleanup passes
//! - [`matcher`]: Bitap approximate search near an expected offset
//! - [`patch`]: Patch construction, rendering and fuzzy application
//! - [`position`]: Cursor offset remapping through a patch list
//! - [`merge`]: Three-way merge
//! - [`document`]: Text + MD5 version hash
//! - [`changeset`]: Serializable patch bundle between two versions
//!
//! All offsets count Unicode scalar values (`char`s), never bytes.

pub mod changeset;
pub mod diff;
pub mod document;
pub mod matcher;
pub mod merge;
pub mod patch;
pub mod position;
mod text;

// Re-exports for convenience
pub use changeset::Changeset;
pub use diff::{diff, diff_text, Diff, Operation};
pub use document::{Document, Hash};
pub use matcher::MatchConfig;
pub use merge::merge;
pub use patch::{apply, make_patches, Patch, PatchConfig, PatchError};
pub use position::remap;
