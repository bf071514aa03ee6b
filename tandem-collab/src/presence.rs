//! Presence: carets, selections and who is editing.
//!
//! ## Flow
//!
//! ```text
//! Local caret move
//!       │
//!       ▼
//! PresenceRoom::update_local_selection()
//!       │  (skipped if the caret did not move)
//!       ▼
//! Command::Cursor(Selection)
//!       │
//!       ▼   (channel broadcast)
//! Remote PresenceRoom::handle_selection()
//!       │
//!       ▼
//! PresenceRoom::remap()  on every applied Changeset
//! ```
//!
//! Selections are char offsets into the document, so every applied
//! changeset moves them along with the text they point at.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tandem_core::Changeset;
use uuid::Uuid;

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

/// RGBA cursor colour, components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl CursorColor {
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Stable colour for a peer: hue from the id, fixed saturation and
    /// lightness.
    pub fn from_uuid(id: Uuid) -> Self {
        let hue = ((id.as_u128() % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b, a: 1.0 }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for CursorColor {
    fn default() -> Self {
        Self::new(0.26, 0.52, 0.96, 1.0)
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Char range in a document. A caret is a zero-length range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub location: usize,
    pub length: usize,
}

impl TextRange {
    pub fn new(location: usize, length: usize) -> Self {
        Self { location, length }
    }

    pub fn caret(location: usize) -> Self {
        Self::new(location, 0)
    }

    pub fn end(&self) -> usize {
        self.location + self.length
    }

    /// Move both ends through `changes`.
    pub fn remap(&self, changes: &Changeset) -> Self {
        let start = changes.remap(self.location);
        let end = changes.remap(self.end()).max(start);
        Self::new(start, end - start)
    }
}

/// A peer's caret or selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub range: TextRange,
    pub id: Uuid,
    pub color: CursorColor,
}

impl Selection {
    pub fn new(range: TextRange, id: Uuid, color: CursorColor) -> Self {
        Self { range, id, color }
    }

    /// Selection coloured by its owner's id.
    pub fn for_peer(range: TextRange, id: Uuid) -> Self {
        Self::new(range, id, CursorColor::from_uuid(id))
    }
}

// ───────────────────────────────────────────────────────────────────
// Remote peers
// ───────────────────────────────────────────────────────────────────

/// Remote peer's presence as tracked locally.
#[derive(Debug, Clone)]
pub struct RemotePeer {
    pub id: Uuid,
    pub selection: Option<Selection>,
}

impl RemotePeer {

    pub fn color(&self) -> CursorColor {
        self.selection
            .as_ref()
            .map_or_else(|| CursorColor::from_uuid(self.id), |s| s.color)
    }
}

/// Presence state for one document: the local selection and every remote
/// peer's.
pub struct PresenceRoom {
    local_id: Uuid,
    peers: HashMap<Uuid, RemotePeer>,
    local_selection: Option<Selection>,
}

impl PresenceRoom {
    pub fn new(local_id: Uuid) -> Self {
        Self {
            local_id,
            peers: HashMap::new(),
            local_selection: None,
        }
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    pub fn local_selection(&self) -> Option<&Selection> {
        self.local_selection.as_ref()
    }

    /// Record the local selection. Returns it for broadcast, or `None` if
    /// the range is unchanged.
    pub fn update_local_selection(&mut self, range: TextRange) -> Option<Selection> {
        if self.local_selection.as_ref().is_some_and(|s| s.range == range) {
            return None;
        }
        let selection = Selection::for_peer(range, self.local_id);
        self.local_selection = Some(selection.clone());
        Some(selection)
    }

    /// Apply a remote selection. Returns false for our own echo.
    pub fn handle_selection(&mut self, selection: Selection) -> bool {
        if selection.id == self.local_id {
            return false;
        }
        self.peers.insert(
            selection.id,
            RemotePeer {
                id: selection.id,
                selection: Some(selection),
            },
        );
        true
    }

    /// Move every tracked selection through an applied changeset.
    pub fn remap(&mut self, changes: &Changeset) {
        if changes.is_empty() {
            return;
        }
        for peer in self.peers.values_mut() {
            if let Some(selection) = peer.selection.as_mut() {
                selection.range = selection.range.remap(changes);
            }
        }
        if let Some(selection) = self.local_selection.as_mut() {
            selection.range = selection.range.remap(changes);
        }
    }

    /// Clamp every selection into a freshly replaced document.
    pub fn clamp(&mut self, len: usize) {
        let clamp = |range: &mut TextRange| {
            let start = range.location.min(len);
            let end = range.end().min(len);
            *range = TextRange::new(start, end - start);
        };
        for peer in self.peers.values_mut() {
            if let Some(selection) = peer.selection.as_mut() {
                clamp(&mut selection.range);
            }
        }
        if let Some(selection) = self.local_selection.as_mut() {
            clamp(&mut selection.range);
        }
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<RemotePeer> {
        self.peers.remove(id)
    }

    pub fn peer(&self, id: &Uuid) -> Option<&RemotePeer> {
        self.peers.get(id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::Document;

    #[test]
    fn test_cursor_color_from_uuid_stable() {
        let id = Uuid::new_v4();
        let a = CursorColor::from_uuid(id);
        let b = CursorColor::from_uuid(id);
        assert_eq!(a, b);
        for c in a.to_array() {
            assert!((0.0..=1.0).contains(&c));
        }
        assert_eq!(a.a, 1.0);
    }

    #[test]
    fn test_hsl_primary_colors() {
        let (r, g, b) = hsl_to_rgb(0.0, 1.0, 0.5);
        assert!((r - 1.0).abs() < 1e-6 && g.abs() < 1e-6 && b.abs() < 1e-6);
        let (r, g, b) = hsl_to_rgb(0.5, 0.0, 0.3);
        assert_eq!((r, g, b), (0.3, 0.3, 0.3));
    }

    #[test]
    fn test_text_range_remap() {
        let before = Document::new("012345678\n012345678");
        let after = Document::new("012345678\n01234 5678");
        let changes = Changeset::new(&before, &after);
        assert_eq!(TextRange::new(12, 6).remap(&changes), TextRange::new(12, 7));
        assert_eq!(TextRange::caret(16).remap(&changes), TextRange::caret(17));
        assert_eq!(TextRange::caret(3).remap(&changes), TextRange::caret(3));
    }

    #[test]
    fn test_every_caret_move_is_broadcast() {
        let mut room = PresenceRoom::new(Uuid::new_v4());
        assert!(room.update_local_selection(TextRange::caret(1)).is_some());
        let latest = room.update_local_selection(TextRange::caret(7));
        assert_eq!(latest.map(|s| s.range), Some(TextRange::caret(7)));
        assert!(room.update_local_selection(TextRange::caret(7)).is_none());
        assert_eq!(room.local_selection().map(|s| s.range), Some(TextRange::caret(7)));
    }

    #[test]
    fn test_own_echo_ignored() {
        let local = Uuid::new_v4();
        let mut room = PresenceRoom::new(local);
        assert!(!room.handle_selection(Selection::for_peer(TextRange::caret(1), local)));
        assert_eq!(room.peer_count(), 0);
    }

    #[test]
    fn test_remote_selection_tracked_and_remapped() {
        let mut room = PresenceRoom::new(Uuid::new_v4());
        let remote = Uuid::new_v4();
        assert!(room.handle_selection(Selection::for_peer(TextRange::caret(18), remote)));

        let before = Document::new("012345678\n012345678");
        let after = Document::new("012345678\n01234 5678");
        room.remap(&Changeset::new(&before, &after));

        let peer = room.peer(&remote).unwrap();
        assert_eq!(peer.selection.as_ref().map(|s| s.range), Some(TextRange::caret(19)));
        assert_eq!(peer.color(), CursorColor::from_uuid(remote));
    }

    #[test]
    fn test_clamp_after_snapshot() {
        let mut room = PresenceRoom::new(Uuid::new_v4());
        let remote = Uuid::new_v4();
        room.handle_selection(Selection::for_peer(TextRange::new(8, 10), remote));
        room.clamp(10);
        let range = room.peer(&remote).and_then(|p| p.selection.as_ref()).map(|s| s.range);
        assert_eq!(range, Some(TextRange::new(8, 2)));
    }
}
