//! Context-bounded patches and fuzzy, all-or-nothing application.
//!
//! A patch is a window of an edit script plus a few chars of surrounding
//! context. Applying a patch list relocates every window in the target text
//! with the bitap matcher, so patches survive unrelated edits elsewhere in
//! the text, but a patch whose own content has changed is refused.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff::{
    cleanup_efficiency, cleanup_semantic_lossless, diff_chars, diff_text, levenshtein,
    source_text, target_text, x_index, Diff, Operation,
};
use crate::matcher::{find_chars, MatchConfig};
use crate::text::{self, char_len, chars, clamped, collect};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The patch window could not be found in the text.
    #[error("patch {index} has no match near offset {expected} for {context:?}")]
    NoMatch {
        index: usize,
        expected: usize,
        context: String,
    },
    /// A window was found but the text it deletes has been changed.
    #[error("patch {index} located at offset {location} but its content diverged")]
    Diverged { index: usize, location: usize },
    /// Offsets or lengths that disagree with the patch's own diffs.
    #[error("patch {index} is malformed")]
    Malformed { index: usize },
}

/// One window of an edit script, with context.
///
/// `start1` is measured in the text with all preceding patches applied, so
/// it equals `start2` for freshly made patches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub start1: usize,
    pub length1: usize,
    pub start2: usize,
    pub length2: usize,
    pub diffs: Vec<Diff>,
}

impl Patch {
    /// Text this patch expects to find.
    pub fn source(&self) -> String {
        source_text(&self.diffs)
    }

    /// Text this patch leaves behind.
    pub fn target(&self) -> String {
        target_text(&self.diffs)
    }
}

impl fmt::Display for Patch {
    /// Renders the GNU-diff-like header followed by one percent-encoded line
    /// per operation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "@@ -{} +{} @@",
            coords(self.start1, self.length1),
            coords(self.start2, self.length2)
        )?;
        for diff in &self.diffs {
            let sign = match diff.op {
                Operation::Insert => '+',
                Operation::Delete => '-',
                Operation::Equal => ' ',
            };
            writeln!(f, "{}{}", sign, encode_uri(&diff.text))?;
        }
        Ok(())
    }
}

fn coords(start: usize, length: usize) -> String {
    match length {
        0 => format!("{start},0"),
        1 => format!("{}", start.saturating_add(1)),
        _ => format!("{},{}", start.saturating_add(1), length),
    }
}

/// Percent-encode everything outside the URI-safe set, keeping spaces.
fn encode_uri(text: &str) -> String {
    const SAFE: &str = ";,/?:@&=+$-_.!~*'()# ";
    let mut encoded = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || SAFE.contains(c) {
            encoded.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    encoded
}

/// Tuning for patch construction and application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchConfig {
    /// Chars of context kept on each side of a change.
    pub margin: usize,
    /// How much of a fuzzy-matched window may differ from the expected
    /// source text, as a fraction of the source length.
    pub delete_threshold: f64,
    pub matching: MatchConfig,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            margin: 4,
            delete_threshold: 0.5,
            matching: MatchConfig::default(),
        }
    }
}

/// Patches turning `a` into `b`, with the default configuration.
pub fn make_patches(a: &str, b: &str) -> Vec<Patch> {
    PatchConfig::default().make_patches(a, b)
}

/// Apply `patches` to `base`, with the default configuration.
pub fn apply(base: &str, patches: &[Patch]) -> Result<String, PatchError> {
    PatchConfig::default().apply(base, patches)
}

impl PatchConfig {
    pub fn make_patches(&self, a: &str, b: &str) -> Vec<Patch> {
        let mut diffs = diff_text(a, b);
        if diffs.len() > 2 {
            cleanup_efficiency(&mut diffs);
        }
        self.patches_from_diffs(a, &diffs)
    }

    /// Group an edit script of `source` into context-bounded patches.
    pub fn patches_from_diffs(&self, source: &str, diffs: &[Diff]) -> Vec<Patch> {
        let mut patches = Vec::new();
        if diffs.is_empty() {
            return patches;
        }

        let mut patch = Patch::default();
        let (mut count1, mut count2) = (0usize, 0usize);
        // `prepatch` is the text the open patch applies to; `postpatch`
        // accumulates every change so far.
        let mut prepatch = chars(source);
        let mut postpatch = prepatch.clone();

        for (i, diff) in diffs.iter().enumerate() {
            let run = chars(&diff.text);
            let len = run.len();
            if patch.diffs.is_empty() && diff.op != Operation::Equal {
                patch.start1 = count1;
                patch.start2 = count2;
            }
            match diff.op {
                Operation::Insert => {
                    patch.diffs.push(diff.clone());
                    patch.length2 += len;
                    let at = count2.min(postpatch.len());
                    postpatch.splice(at..at, run);
                }
                Operation::Delete => {
                    patch.length1 += len;
                    patch.diffs.push(diff.clone());
                    let at = count2.min(postpatch.len());
                    let end = (count2 + len).min(postpatch.len());
                    postpatch.drain(at..end);
                }
                Operation::Equal => {
                    let last = i + 1 == diffs.len();
                    if len <= 2 * self.margin && !patch.diffs.is_empty() && !last {
                        // Small equality inside a patch.
                        patch.diffs.push(diff.clone());
                        patch.length1 += len;
                        patch.length2 += len;
                    } else if len >= 2 * self.margin && !patch.diffs.is_empty() {
                        // Large equality closes the patch.
                        self.add_context(&mut patch, &prepatch);
                        patches.push(std::mem::take(&mut patch));
                        prepatch = postpatch.clone();
                        count1 = count2;
                    }
                }
            }
            if diff.op != Operation::Insert {
                count1 += len;
            }
            if diff.op != Operation::Delete {
                count2 += len;
            }
        }
        if !patch.diffs.is_empty() {
            self.add_context(&mut patch, &prepatch);
            patches.push(patch);
        }
        patches
    }

    /// Grow the context until the patch window is unique in `text`, then
    /// pad it by one more margin.
    fn add_context(&self, patch: &mut Patch, text: &[char]) {
        if text.is_empty() {
            return;
        }
        let max_pattern = self.matching.max_bits.saturating_sub(2 * self.margin);
        let end = patch.start2 + patch.length1;
        let mut pattern = clamped(text, patch.start2, end);
        let mut padding = 0;
        while text::find(text, pattern, 0) != text::rfind(text, pattern, text.len())
            && pattern.len() < max_pattern
        {
            padding += self.margin;
            pattern = clamped(text, patch.start2.saturating_sub(padding), end + padding);
        }
        padding += self.margin;

        let prefix = clamped(text, patch.start2.saturating_sub(padding), patch.start2);
        if !prefix.is_empty() {
            patch.diffs.insert(0, Diff::equal(collect(prefix)));
        }
        let suffix = clamped(text, end, end + padding);
        if !suffix.is_empty() {
            patch.diffs.push(Diff::equal(collect(suffix)));
        }

        patch.start1 = patch.start1.saturating_sub(prefix.len());
        patch.start2 = patch.start2.saturating_sub(prefix.len());
        patch.length1 += prefix.len() + suffix.len();
        patch.length2 += prefix.len() + suffix.len();
    }

    /// Apply `patches` to `base`. Every patch must locate and apply, or the
    /// whole call fails and nothing is returned.
    pub fn apply(&self, base: &str, patches: &[Patch]) -> Result<String, PatchError> {
        if patches.is_empty() {
            return Ok(base.to_owned());
        }
        validate(base, patches, self.matching.distance)?;

        let mut patches = patches.to_vec();
        let padding = self.add_padding(&mut patches);
        let pad_len = padding.len();
        let mut text = padding.clone();
        text.extend(base.chars());
        text.extend_from_slice(&padding);
        self.split_max(&mut patches);

        let max_bits = self.matching.max_bits;
        // Offset between where a patch was expected and where it was found.
        let mut delta: isize = 0;
        for (index, patch) in patches.iter().enumerate() {
            let expected = (patch.start2 as isize + delta).max(0) as usize;
            let source = chars(&patch.source());

            let mut end_loc = None;
            let start_loc = if source.len() > max_bits {
                // Oversized deletion: match both ends separately.
                find_chars(&text, &source[..max_bits], expected, &self.matching).and_then(|start| {
                    let tail = &source[source.len() - max_bits..];
                    let tail_loc = expected + source.len() - max_bits;
                    match find_chars(&text, tail, tail_loc, &self.matching) {
                        Some(end) if start < end => {
                            end_loc = Some(end);
                            Some(start)
                        }
                        _ => None,
                    }
                })
            } else {
                find_chars(&text, &source, expected, &self.matching)
            };

            let Some(start_loc) = start_loc else {
                log::debug!("patch {index} not found near {expected}");
                return Err(PatchError::NoMatch {
                    index,
                    expected: expected.saturating_sub(pad_len),
                    context: strip_padding(&source),
                });
            };
            delta = start_loc as isize - expected as isize;

            let found_end = match end_loc {
                Some(end) => (end + max_bits).min(text.len()),
                None => (start_loc + source.len()).min(text.len()),
            };
            let found = text[start_loc..found_end].to_vec();

            if found == source {
                let replacement = chars(&patch.target());
                text.splice(start_loc..start_loc + source.len(), replacement);
                continue;
            }

            // Imperfect match: accept only if the window is close enough and
            // every deleted run is still intact.
            let mut diffs = diff_chars(&source, &found, false);
            let distance = levenshtein(&diffs) as f64 / source.len() as f64;
            if distance > self.delete_threshold || !deletions_intact(&patch.diffs, &diffs) {
                log::debug!(
                    "patch {index} found at {start_loc} but diverged (distance {distance:.2})"
                );
                return Err(PatchError::Diverged {
                    index,
                    location: start_loc.saturating_sub(pad_len),
                });
            }
            cleanup_semantic_lossless(&mut diffs);

            let mut index1 = 0;
            for diff in &patch.diffs {
                let len = diff.len();
                if diff.op != Operation::Equal {
                    let index2 = x_index(&diffs, index1);
                    let at = (start_loc + index2).min(text.len());
                    match diff.op {
                        Operation::Insert => {
                            text.splice(at..at, diff.text.chars());
                        }
                        Operation::Delete => {
                            let end = (start_loc + x_index(&diffs, index1 + len)).min(text.len());
                            text.drain(at..end.max(at));
                        }
                        Operation::Equal => {}
                    }
                }
                if diff.op != Operation::Delete {
                    index1 += len;
                }
            }
        }

        let end = text.len().saturating_sub(pad_len).max(pad_len);
        Ok(collect(&text[pad_len..end]))
    }

    /// Pad the first and last patch with null chars so edits at either end
    /// of the text can be located. Returns the padding.
    fn add_padding(&self, patches: &mut [Patch]) -> Vec<char> {
        let padding: Vec<char> = (1..=self.margin as u32).filter_map(char::from_u32).collect();
        let pad_len = padding.len();

        for patch in patches.iter_mut() {
            patch.start1 = patch.start1.saturating_add(pad_len);
            patch.start2 = patch.start2.saturating_add(pad_len);
        }

        if let Some(first) = patches.first_mut() {
            match first.diffs.first_mut() {
                Some(diff) if diff.op == Operation::Equal => {
                    let existing = diff.len();
                    if pad_len > existing {
                        let extra = pad_len - existing;
                        let mut grown = collect(&padding[existing..]);
                        grown.push_str(&diff.text);
                        diff.text = grown;
                        first.start1 -= extra;
                        first.start2 -= extra;
                        first.length1 += extra;
                        first.length2 += extra;
                    }
                }
                _ => {
                    first.diffs.insert(0, Diff::equal(collect(&padding)));
                    first.start1 -= pad_len;
                    first.start2 -= pad_len;
                    first.length1 += pad_len;
                    first.length2 += pad_len;
                }
            }
        }

        if let Some(last) = patches.last_mut() {
            match last.diffs.last_mut() {
                Some(diff) if diff.op == Operation::Equal => {
                    let existing = diff.len();
                    if pad_len > existing {
                        let extra = pad_len - existing;
                        diff.text.push_str(&collect(&padding[..extra]));
                        last.length1 += extra;
                        last.length2 += extra;
                    }
                }
                _ => {
                    last.diffs.push(Diff::equal(collect(&padding)));
                    last.length1 += pad_len;
                    last.length2 += pad_len;
                }
            }
        }

        padding
    }

    /// Break up patches whose source window is longer than the matcher can
    /// handle.
    fn split_max(&self, patches: &mut Vec<Patch>) {
        let patch_size = self.matching.max_bits;
        let mut x = 0;
        while x < patches.len() {
            if patches[x].length1 <= patch_size {
                x += 1;
                continue;
            }
            let big = patches.remove(x);
            let (mut start1, mut start2) = (big.start1, big.start2);
            let mut precontext: Vec<char> = Vec::new();
            let mut remaining: VecDeque<Diff> = big.diffs.into();

            while !remaining.is_empty() {
                let mut patch = Patch {
                    start1: start1.saturating_sub(precontext.len()),
                    start2: start2.saturating_sub(precontext.len()),
                    ..Patch::default()
                };
                let mut empty = true;
                if !precontext.is_empty() {
                    patch.length1 = precontext.len();
                    patch.length2 = precontext.len();
                    patch.diffs.push(Diff::equal(collect(&precontext)));
                }

                while patch.length1 < patch_size.saturating_sub(self.margin) {
                    let Some(front) = remaining.front_mut() else {
                        break;
                    };
                    let (op, len) = (front.op, front.len());
                    if op == Operation::Insert {
                        patch.length2 += len;
                        start2 += len;
                        empty = false;
                        if let Some(diff) = remaining.pop_front() {
                            patch.diffs.push(diff);
                        }
                    } else if op == Operation::Delete
                        && patch.diffs.len() == 1
                        && patch.diffs[0].op == Operation::Equal
                        && len > 2 * patch_size
                    {
                        // Large deletion: let it through in one chunk.
                        patch.length1 += len;
                        start1 += len;
                        empty = false;
                        if let Some(diff) = remaining.pop_front() {
                            patch.diffs.push(diff);
                        }
                    } else {
                        // Deletion or equality: take only as much as fits.
                        let take = len.min(patch_size - patch.length1 - self.margin);
                        let run = chars(&front.text);
                        patch.length1 += take;
                        start1 += take;
                        if op == Operation::Equal {
                            patch.length2 += take;
                            start2 += take;
                        } else {
                            empty = false;
                        }
                        patch.diffs.push(Diff::new(op, collect(&run[..take])));
                        if take == len {
                            remaining.pop_front();
                        } else {
                            front.text = collect(&run[take..]);
                        }
                    }
                }

                // Trailing text of this patch becomes the next one's context.
                let target = chars(&patch.target());
                precontext = target[target.len().saturating_sub(self.margin)..].to_vec();

                let rest: String = remaining
                    .iter()
                    .filter(|d| d.op != Operation::Insert)
                    .flat_map(|d| d.text.chars())
                    .take(self.margin)
                    .collect();
                if !rest.is_empty() {
                    let n = char_len(&rest);
                    patch.length1 += n;
                    patch.length2 += n;
                    match patch.diffs.last_mut() {
                        Some(last) if last.op == Operation::Equal => last.text.push_str(&rest),
                        _ => patch.diffs.push(Diff::equal(rest)),
                    }
                }

                if !empty {
                    patches.insert(x, patch);
                    x += 1;
                }
            }
        }
    }
}

/// True if no char of any run deleted by `patch` is deleted from, or has
/// text inserted into it, in the source-to-found script `found`.
/// Lengths must match the diffs, and no window may start further than the
/// match distance past the longest text the list could produce.
fn validate(base: &str, patches: &[Patch], distance: usize) -> Result<(), PatchError> {
    let limit = patches
        .iter()
        .fold(char_len(base).saturating_add(distance), |limit, patch| {
            limit.saturating_add(patch.length2)
        });
    for (index, patch) in patches.iter().enumerate() {
        let consistent = patch.length1 == char_len(&patch.source())
            && patch.length2 == char_len(&patch.target())
            && patch.start1 <= limit
            && patch.start2 <= limit;
        if !consistent {
            log::debug!("patch {index} rejected as malformed");
            return Err(PatchError::Malformed { index });
        }
    }
    Ok(())
}

fn deletions_intact(patch: &[Diff], found: &[Diff]) -> bool {
    let mut pos = 0;
    for diff in patch {
        let len = diff.len();
        match diff.op {
            Operation::Insert => {}
            Operation::Equal => pos += len,
            Operation::Delete => {
                if !run_intact(found, pos, pos + len) {
                    return false;
                }
                pos += len;
            }
        }
    }
    true
}

fn run_intact(found: &[Diff], start: usize, end: usize) -> bool {
    let mut pos = 0;
    for diff in found {
        if pos >= end {
            break;
        }
        let len = diff.len();
        match diff.op {
            Operation::Equal => pos += len,
            Operation::Delete => {
                if pos < end && pos + len > start {
                    return false;
                }
                pos += len;
            }
            Operation::Insert => {
                if pos > start && pos < end {
                    return false;
                }
            }
        }
    }
    true
}

fn strip_padding(source: &[char]) -> String {
    source
        .iter()
        .filter(|&&c| !('\u{1}'..='\u{4}').contains(&c))
        .collect()
}
