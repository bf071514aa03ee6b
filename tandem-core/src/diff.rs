//! Character diff engine.
//!
//! Produces a minimal edit script between two texts using Myers'
//! middle-snake bisection, with a line-level pre-pass for long inputs and
//! the usual family of cleanup passes to make the script readable. The
//! engine is deterministic: there is no deadline, so the same inputs always
//! yield the same script.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::text::{self, char_len, chars, collect, common_overlap, common_prefix, common_suffix};

/// Both texts must be longer than this for the line-level pre-pass to run.
const LINE_MODE_THRESHOLD: usize = 100;

/// Cost of an empty edit operation in terms of edit characters.
pub const EDIT_COST: usize = 4;

/// Kind of a diff operation. Wire codes are Delete = -1, Equal = 0, Insert = 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Delete,
    Equal,
    Insert,
}

impl Operation {
    pub fn code(self) -> i8 {
        match self {
            Operation::Delete => -1,
            Operation::Equal => 0,
            Operation::Insert => 1,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            -1 => Some(Operation::Delete),
            0 => Some(Operation::Equal),
            1 => Some(Operation::Insert),
            _ => None,
        }
    }

    fn sign(self) -> char {
        match self {
            Operation::Delete => '-',
            Operation::Equal => ' ',
            Operation::Insert => '+',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown diff operation code {0}")]
pub struct UnknownOperation(pub i8);

/// One run of an edit script.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "(i8, String)", try_from = "(i8, String)")]
pub struct Diff {
    pub op: Operation,
    pub text: String,
}

impl Diff {
    pub fn new(op: Operation, text: impl Into<String>) -> Self {
        Self { op, text: text.into() }
    }

    pub fn equal(text: impl Into<String>) -> Self {
        Self::new(Operation::Equal, text)
    }

    pub fn insert(text: impl Into<String>) -> Self {
        Self::new(Operation::Insert, text)
    }

    pub fn delete(text: impl Into<String>) -> Self {
        Self::new(Operation::Delete, text)
    }

    /// Length of the run in chars.
    pub fn len(&self) -> usize {
        char_len(&self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl From<Diff> for (i8, String) {
    fn from(diff: Diff) -> Self {
        (diff.op.code(), diff.text)
    }
}

impl TryFrom<(i8, String)> for Diff {
    type Error = UnknownOperation;

    fn try_from((code, text): (i8, String)) -> Result<Self, Self::Error> {
        Operation::from_code(code)
            .map(|op| Diff { op, text })
            .ok_or(UnknownOperation(code))
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.sign(), self.text)
    }
}

/// Edit script from `a` to `b`, semantically cleaned.
///
/// Either side being absent yields an empty script.
pub fn diff(a: Option<&str>, b: Option<&str>) -> Vec<Diff> {
    match (a, b) {
        (Some(a), Some(b)) => diff_text(a, b),
        _ => Vec::new(),
    }
}

/// Edit script between two present texts, semantically cleaned.
pub fn diff_text(a: &str, b: &str) -> Vec<Diff> {
    let mut diffs = diff_main(a, b, true);
    cleanup_semantic(&mut diffs);
    diffs
}

/// Raw minimal edit script, merged but not semantically cleaned.
///
/// `checklines` enables the line-level pre-pass for long texts.
pub fn diff_main(a: &str, b: &str, checklines: bool) -> Vec<Diff> {
    diff_chars(&chars(a), &chars(b), checklines)
}

pub(crate) fn diff_chars(a: &[char], b: &[char], checklines: bool) -> Vec<Diff> {
    if a == b {
        return if a.is_empty() {
            Vec::new()
        } else {
            vec![Diff::equal(collect(a))]
        };
    }

    let prefix = common_prefix(a, b);
    let (head, a, b) = (&a[..prefix], &a[prefix..], &b[prefix..]);
    let suffix = common_suffix(a, b);
    let (tail, a, b) = (
        &a[a.len() - suffix..],
        &a[..a.len() - suffix],
        &b[..b.len() - suffix],
    );

    let mut diffs = compute(a, b, checklines);
    if !head.is_empty() {
        diffs.insert(0, Diff::equal(collect(head)));
    }
    if !tail.is_empty() {
        diffs.push(Diff::equal(collect(tail)));
    }
    cleanup_merge(&mut diffs);
    diffs
}

/// Diff two texts that share no common prefix or suffix.
fn compute(a: &[char], b: &[char], checklines: bool) -> Vec<Diff> {
    if a.is_empty() {
        return vec![Diff::insert(collect(b))];
    }
    if b.is_empty() {
        return vec![Diff::delete(collect(a))];
    }

    let (long, short) = if a.len() > b.len() { (a, b) } else { (b, a) };
    if let Some(i) = text::find(long, short, 0) {
        // Shorter text sits inside the longer one.
        let op = if a.len() > b.len() {
            Operation::Delete
        } else {
            Operation::Insert
        };
        return vec![
            Diff::new(op, collect(&long[..i])),
            Diff::equal(collect(short)),
            Diff::new(op, collect(&long[i + short.len()..])),
        ];
    }
    if short.len() == 1 {
        // Single char that is not contained in the other side.
        return vec![Diff::delete(collect(a)), Diff::insert(collect(b))];
    }

    if checklines && a.len() > LINE_MODE_THRESHOLD && b.len() > LINE_MODE_THRESHOLD {
        return line_mode(a, b);
    }
    bisect(a, b)
}

/// Myers' middle snake: find the split point and recurse on both halves.
fn bisect(a: &[char], b: &[char]) -> Vec<Diff> {
    let (len1, len2) = (a.len() as isize, b.len() as isize);
    let max_d = (len1 + len2 + 1) / 2;
    let v_offset = max_d;
    let v_length = 2 * max_d;
    let mut v1 = vec![-1isize; v_length as usize];
    let mut v2 = vec![-1isize; v_length as usize];
    v1[(v_offset + 1) as usize] = 0;
    v2[(v_offset + 1) as usize] = 0;
    let delta = len1 - len2;
    // With an odd delta the front path collides with the reverse path.
    let front = delta % 2 != 0;
    let (mut k1start, mut k1end, mut k2start, mut k2end) = (0isize, 0isize, 0isize, 0isize);

    for d in 0..max_d {
        let mut k1 = -d + k1start;
        while k1 <= d - k1end {
            let k1_offset = (v_offset + k1) as usize;
            let mut x1 = if k1 == -d || (k1 != d && v1[k1_offset - 1] < v1[k1_offset + 1]) {
                v1[k1_offset + 1]
            } else {
                v1[k1_offset - 1] + 1
            };
            let mut y1 = x1 - k1;
            while x1 < len1 && y1 < len2 && a[x1 as usize] == b[y1 as usize] {
                x1 += 1;
                y1 += 1;
            }
            v1[k1_offset] = x1;
            if x1 > len1 {
                k1end += 2;
            } else if y1 > len2 {
                k1start += 2;
            } else if front {
                let k2_offset = v_offset + delta - k1;
                if k2_offset >= 0 && k2_offset < v_length && v2[k2_offset as usize] != -1 {
                    let x2 = len1 - v2[k2_offset as usize];
                    if x1 >= x2 {
                        return bisect_split(a, b, x1 as usize, y1 as usize);
                    }
                }
            }
            k1 += 2;
        }

        let mut k2 = -d + k2start;
        while k2 <= d - k2end {
            let k2_offset = (v_offset + k2) as usize;
            let mut x2 = if k2 == -d || (k2 != d && v2[k2_offset - 1] < v2[k2_offset + 1]) {
                v2[k2_offset + 1]
            } else {
                v2[k2_offset - 1] + 1
            };
            let mut y2 = x2 - k2;
            while x2 < len1
                && y2 < len2
                && a[(len1 - x2 - 1) as usize] == b[(len2 - y2 - 1) as usize]
            {
                x2 += 1;
                y2 += 1;
            }
            v2[k2_offset] = x2;
            if x2 > len1 {
                k2end += 2;
            } else if y2 > len2 {
                k2start += 2;
            } else if !front {
                let k1_offset = v_offset + delta - k2;
                if k1_offset >= 0 && k1_offset < v_length && v1[k1_offset as usize] != -1 {
                    let x1 = v1[k1_offset as usize];
                    let y1 = v_offset + x1 - k1_offset;
                    if x1 >= len1 - x2 {
                        return bisect_split(a, b, x1 as usize, y1 as usize);
                    }
                }
            }
            k2 += 2;
        }
    }

    // No commonality at all.
    vec![Diff::delete(collect(a)), Diff::insert(collect(b))]
}

fn bisect_split(a: &[char], b: &[char], x: usize, y: usize) -> Vec<Diff> {
    let mut diffs = diff_chars(&a[..x], &b[..y], false);
    diffs.extend(diff_chars(&a[x..], &b[y..], false));
    diffs
}

/// Diff line by line first, then rediff the replaced blocks char by char.
fn line_mode(a: &[char], b: &[char]) -> Vec<Diff> {
    let mut table = LineTable::default();
    let encoded_a = table.encode(a);
    let encoded_b = table.encode(b);

    let mut diffs = diff_chars(&encoded_a, &encoded_b, false);
    for diff in &mut diffs {
        diff.text = table.decode(&diff.text);
    }
    cleanup_semantic(&mut diffs);

    // Trailing sentinel flushes the last replacement block.
    diffs.push(Diff::equal(String::new()));
    let mut pointer = 0;
    let (mut count_delete, mut count_insert) = (0, 0);
    let (mut text_delete, mut text_insert) = (String::new(), String::new());
    while pointer < diffs.len() {
        match diffs[pointer].op {
            Operation::Insert => {
                count_insert += 1;
                text_insert.push_str(&diffs[pointer].text);
            }
            Operation::Delete => {
                count_delete += 1;
                text_delete.push_str(&diffs[pointer].text);
            }
            Operation::Equal => {
                if count_delete >= 1 && count_insert >= 1 {
                    let start = pointer - count_delete - count_insert;
                    let block = diff_chars(&chars(&text_delete), &chars(&text_insert), false);
                    let block_len = block.len();
                    diffs.splice(start..pointer, block);
                    pointer = start + block_len;
                }
                count_delete = 0;
                count_insert = 0;
                text_delete.clear();
                text_insert.clear();
            }
        }
        pointer += 1;
    }
    diffs.pop();
    diffs
}

/// Maps each distinct line to a single symbol char.
#[derive(Default)]
struct LineTable {
    lines: Vec<Vec<char>>,
    index: HashMap<Vec<char>, char>,
}

impl LineTable {
    /// Symbols skip the surrogate gap, so this many lines fit.
    const CAPACITY: usize = 0x10_0000;

    fn symbol(index: usize) -> Option<char> {
        let index = u32::try_from(index).ok()?;
        let code = if index < 0xD800 { index } else { index + 0x800 };
        char::from_u32(code)
    }

    fn encode(&mut self, text: &[char]) -> Vec<char> {
        let mut encoded = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let mut end = text[start..]
                .iter()
                .position(|&c| c == '\n')
                .map_or(text.len(), |i| start + i + 1);
            if self.lines.len() + 1 >= Self::CAPACITY {
                // Out of symbols: the remainder becomes one line.
                end = text.len();
            }
            let line = text[start..end].to_vec();
            let symbol = match self.index.get(&line) {
                Some(&symbol) => symbol,
                None => {
                    // Index 0 is never handed out.
                    let Some(symbol) = Self::symbol(self.lines.len() + 1) else {
                        break;
                    };
                    self.lines.push(line.clone());
                    self.index.insert(line, symbol);
                    symbol
                }
            };
            encoded.push(symbol);
            start = end;
        }
        encoded
    }

    fn decode(&self, encoded: &str) -> String {
        let mut text = String::new();
        for symbol in encoded.chars() {
            let code = symbol as usize;
            let index = if code < 0xD800 { code } else { code - 0x800 };
            if let Some(line) = index.checked_sub(1).and_then(|i| self.lines.get(i)) {
                text.extend(line.iter());
            }
        }
        text
    }
}

/// Reorder and merge like edit sections; merge equalities.
///
/// Any edit section can move as long as it doesn't cross an equality.
pub fn cleanup_merge(diffs: &mut Vec<Diff>) {
    diffs.push(Diff::equal(String::new()));
    let mut pointer = 0;
    let (mut count_delete, mut count_insert) = (0usize, 0usize);
    let (mut text_delete, mut text_insert): (Vec<char>, Vec<char>) = (Vec::new(), Vec::new());

    while pointer < diffs.len() {
        match diffs[pointer].op {
            Operation::Insert => {
                count_insert += 1;
                text_insert.extend(diffs[pointer].text.chars());
                pointer += 1;
            }
            Operation::Delete => {
                count_delete += 1;
                text_delete.extend(diffs[pointer].text.chars());
                pointer += 1;
            }
            Operation::Equal => {
                let edits = count_delete + count_insert;
                let lone_empty = edits == 1 && text_delete.is_empty() && text_insert.is_empty();
                if edits > 1 || lone_empty {
                    let start = pointer - edits;
                    if count_delete != 0 && count_insert != 0 {
                        let common = common_prefix(&text_insert, &text_delete);
                        if common != 0 {
                            let head = collect(&text_insert[..common]);
                            if start > 0 && diffs[start - 1].op == Operation::Equal {
                                diffs[start - 1].text.push_str(&head);
                            } else {
                                diffs.insert(0, Diff::equal(head));
                                pointer += 1;
                            }
                            text_insert.drain(..common);
                            text_delete.drain(..common);
                        }
                        let common = common_suffix(&text_insert, &text_delete);
                        if common != 0 {
                            let tail = collect(&text_insert[text_insert.len() - common..]);
                            diffs[pointer].text.insert_str(0, &tail);
                            text_insert.truncate(text_insert.len() - common);
                            text_delete.truncate(text_delete.len() - common);
                        }
                    }
                    let start = pointer - edits;
                    let mut merged = Vec::with_capacity(2);
                    if !text_delete.is_empty() {
                        merged.push(Diff::delete(collect(&text_delete)));
                    }
                    if !text_insert.is_empty() {
                        merged.push(Diff::insert(collect(&text_insert)));
                    }
                    let merged_len = merged.len();
                    diffs.splice(start..pointer, merged);
                    pointer = start + merged_len + 1;
                } else if pointer != 0 && diffs[pointer - 1].op == Operation::Equal {
                    let text = std::mem::take(&mut diffs[pointer].text);
                    diffs[pointer - 1].text.push_str(&text);
                    diffs.remove(pointer);
                } else {
                    pointer += 1;
                }
                count_delete = 0;
                count_insert = 0;
                text_delete.clear();
                text_insert.clear();
            }
        }
    }
    if diffs.last().is_some_and(|d| d.text.is_empty()) {
        diffs.pop();
    }

    // Second pass: slide single edits surrounded by equalities sideways to
    // eliminate an equality, e.g. A<ins>BA</ins>C -> <ins>AB</ins>AC.
    let mut changes = false;
    let mut pointer = 1;
    while pointer + 1 < diffs.len() {
        if diffs[pointer - 1].op == Operation::Equal && diffs[pointer + 1].op == Operation::Equal {
            let prev = chars(&diffs[pointer - 1].text);
            let edit = chars(&diffs[pointer].text);
            let next = chars(&diffs[pointer + 1].text);
            if edit.ends_with(&prev) {
                let mut shifted = prev.clone();
                shifted.extend_from_slice(&edit[..edit.len() - prev.len()]);
                let mut following = prev;
                following.extend_from_slice(&next);
                diffs[pointer].text = collect(&shifted);
                diffs[pointer + 1].text = collect(&following);
                diffs.remove(pointer - 1);
                changes = true;
            } else if edit.starts_with(&next) {
                diffs[pointer - 1].text.push_str(&collect(&next));
                let mut shifted = edit[next.len()..].to_vec();
                shifted.extend_from_slice(&next);
                diffs[pointer].text = collect(&shifted);
                diffs.remove(pointer + 1);
                changes = true;
            }
        }
        pointer += 1;
    }
    if changes {
        cleanup_merge(diffs);
    }
}

/// Eliminate semantically trivial equalities, align edits to natural
/// boundaries, and pull overlaps out of delete/insert pairs.
pub fn cleanup_semantic(diffs: &mut Vec<Diff>) {
    let mut changes = false;
    let mut equalities: Vec<usize> = Vec::new();
    let mut last_equality: Option<String> = None;
    let mut pointer: isize = 0;
    // Edit lengths before and after the last equality.
    let (mut insertions1, mut deletions1) = (0usize, 0usize);
    let (mut insertions2, mut deletions2) = (0usize, 0usize);

    while (pointer as usize) < diffs.len() {
        let p = pointer as usize;
        if diffs[p].op == Operation::Equal {
            equalities.push(p);
            insertions1 = insertions2;
            deletions1 = deletions2;
            insertions2 = 0;
            deletions2 = 0;
            last_equality = Some(diffs[p].text.clone());
        } else {
            let len = diffs[p].len();
            if diffs[p].op == Operation::Insert {
                insertions2 += len;
            } else {
                deletions2 += len;
            }
            let eliminate = match &last_equality {
                Some(equality) if !equality.is_empty() => {
                    let len = char_len(equality);
                    len <= insertions1.max(deletions1) && len <= insertions2.max(deletions2)
                }
                _ => false,
            };
            if eliminate {
                if let (Some(equality), Some(&index)) = (last_equality.take(), equalities.last()) {
                    // Split the equality into a delete and an insert.
                    diffs.insert(index, Diff::delete(equality));
                    diffs[index + 1].op = Operation::Insert;
                    equalities.pop();
                    equalities.pop();
                    pointer = equalities.last().map_or(-1, |&i| i as isize);
                    insertions1 = 0;
                    deletions1 = 0;
                    insertions2 = 0;
                    deletions2 = 0;
                    changes = true;
                }
            }
        }
        pointer += 1;
    }

    if changes {
        cleanup_merge(diffs);
    }
    cleanup_semantic_lossless(diffs);

    // Extract overlaps between adjacent deletions and insertions, e.g.
    // <del>abcxxx</del><ins>xxxdef</ins> -> <del>abc</del>xxx<ins>def</ins>.
    let mut pointer = 1;
    while pointer < diffs.len() {
        if diffs[pointer - 1].op == Operation::Delete && diffs[pointer].op == Operation::Insert {
            let deletion = chars(&diffs[pointer - 1].text);
            let insertion = chars(&diffs[pointer].text);
            let overlap1 = common_overlap(&deletion, &insertion);
            let overlap2 = common_overlap(&insertion, &deletion);
            if overlap1 >= overlap2 {
                if overlap1 * 2 >= deletion.len() || overlap1 * 2 >= insertion.len() {
                    diffs.insert(pointer, Diff::equal(collect(&insertion[..overlap1])));
                    diffs[pointer - 1].text = collect(&deletion[..deletion.len() - overlap1]);
                    diffs[pointer + 1].text = collect(&insertion[overlap1..]);
                    pointer += 1;
                }
            } else if overlap2 * 2 >= deletion.len() || overlap2 * 2 >= insertion.len() {
                // Reverse overlap: swap the pair around the shared text.
                diffs.insert(pointer, Diff::equal(collect(&deletion[..overlap2])));
                diffs[pointer - 1] = Diff::insert(collect(&insertion[..insertion.len() - overlap2]));
                diffs[pointer + 1] = Diff::delete(collect(&deletion[overlap2..]));
                pointer += 1;
            }
            pointer += 1;
        }
        pointer += 1;
    }
}

/// Shift single edits surrounded by equalities so they line up with word,
/// line or blank-line boundaries. e.g. `The c<ins>at c</ins>ame.` becomes
/// `The <ins>cat </ins>came.`
pub fn cleanup_semantic_lossless(diffs: &mut Vec<Diff>) {
    let mut pointer = 1;
    while pointer + 1 < diffs.len() {
        if diffs[pointer - 1].op == Operation::Equal && diffs[pointer + 1].op == Operation::Equal {
            let mut equality1 = chars(&diffs[pointer - 1].text);
            let mut edit = chars(&diffs[pointer].text);
            let mut equality2 = chars(&diffs[pointer + 1].text);

            // Shift the edit as far left as possible.
            let offset = common_suffix(&equality1, &edit);
            if offset > 0 {
                let common = edit[edit.len() - offset..].to_vec();
                equality1.truncate(equality1.len() - offset);
                let mut shifted = common.clone();
                shifted.extend_from_slice(&edit[..edit.len() - offset]);
                edit = shifted;
                let mut following = common;
                following.extend_from_slice(&equality2);
                equality2 = following;
            }

            // Step right one char at a time, keeping the best fit.
            let mut best_equality1 = equality1.clone();
            let mut best_edit = edit.clone();
            let mut best_equality2 = equality2.clone();
            let mut best_score = semantic_score(&equality1, &edit) + semantic_score(&edit, &equality2);
            while !edit.is_empty() && !equality2.is_empty() && edit[0] == equality2[0] {
                equality1.push(edit.remove(0));
                edit.push(equality2.remove(0));
                let score = semantic_score(&equality1, &edit) + semantic_score(&edit, &equality2);
                // >= favours trailing over leading whitespace on edits.
                if score >= best_score {
                    best_score = score;
                    best_equality1 = equality1.clone();
                    best_edit = edit.clone();
                    best_equality2 = equality2.clone();
                }
            }

            if collect(&best_equality1) != diffs[pointer - 1].text {
                if best_equality1.is_empty() {
                    diffs.remove(pointer - 1);
                    pointer -= 1;
                } else {
                    diffs[pointer - 1].text = collect(&best_equality1);
                }
                diffs[pointer].text = collect(&best_edit);
                if best_equality2.is_empty() {
                    diffs.remove(pointer + 1);
                    pointer = pointer.saturating_sub(1);
                } else {
                    diffs[pointer + 1].text = collect(&best_equality2);
                }
            }
        }
        pointer += 1;
    }
}

/// Score how well the boundary between `one` and `two` falls on a logical
/// break: 6 (edge of text) down to 0 (mid-word).
fn semantic_score(one: &[char], two: &[char]) -> u8 {
    let (Some(&char1), Some(&char2)) = (one.last(), two.first()) else {
        return 6;
    };
    let non_alphanumeric1 = !char1.is_ascii_alphanumeric();
    let non_alphanumeric2 = !char2.is_ascii_alphanumeric();
    let whitespace1 = non_alphanumeric1 && char1.is_whitespace();
    let whitespace2 = non_alphanumeric2 && char2.is_whitespace();
    let line_break1 = whitespace1 && (char1 == '\r' || char1 == '\n');
    let line_break2 = whitespace2 && (char2 == '\r' || char2 == '\n');
    let blank_line1 = line_break1 && ends_with_blank_line(one);
    let blank_line2 = line_break2 && starts_with_blank_line(two);

    if blank_line1 || blank_line2 {
        5
    } else if line_break1 || line_break2 {
        4
    } else if non_alphanumeric1 && !whitespace1 && whitespace2 {
        // End of sentence.
        3
    } else if whitespace1 || whitespace2 {
        2
    } else if non_alphanumeric1 || non_alphanumeric2 {
        1
    } else {
        0
    }
}

fn ends_with_blank_line(text: &[char]) -> bool {
    text.ends_with(&['\n', '\n']) || text.ends_with(&['\n', '\r', '\n'])
}

fn starts_with_blank_line(text: &[char]) -> bool {
    let rest = text.strip_prefix(&['\r']).unwrap_or(text);
    let Some(rest) = rest.strip_prefix(&['\n']) else {
        return false;
    };
    let rest = rest.strip_prefix(&['\r']).unwrap_or(rest);
    rest.first() == Some(&'\n')
}

/// Eliminate operationally trivial equalities: short equalities wedged
/// between edits cost more to keep than to fold into the edits.
pub fn cleanup_efficiency(diffs: &mut Vec<Diff>) {
    let mut changes = false;
    let mut equalities: Vec<usize> = Vec::new();
    let mut last_equality: Option<String> = None;
    let mut pointer: isize = 0;
    // Whether there is an insertion/deletion before/after the last equality.
    let (mut pre_ins, mut pre_del, mut post_ins, mut post_del) = (false, false, false, false);

    while (pointer as usize) < diffs.len() {
        let p = pointer as usize;
        if diffs[p].op == Operation::Equal {
            if diffs[p].len() < EDIT_COST && (post_ins || post_del) {
                equalities.push(p);
                pre_ins = post_ins;
                pre_del = post_del;
                last_equality = Some(diffs[p].text.clone());
            } else {
                equalities.clear();
                last_equality = None;
            }
            post_ins = false;
            post_del = false;
        } else {
            if diffs[p].op == Operation::Delete {
                post_del = true;
            } else {
                post_ins = true;
            }
            // Five types to be split:
            // <ins>A</ins><del>B</del>XY<ins>C</ins><del>D</del>
            // <ins>A</ins>X<ins>C</ins><del>D</del>
            // <ins>A</ins><del>B</del>X<ins>C</ins>
            // <ins>A</del>X<ins>C</ins><del>D</del>
            // <ins>A</ins><del>B</del>X<del>C</del>
            let eliminate = match &last_equality {
                Some(equality) if !equality.is_empty() => {
                    let flags = [pre_ins, pre_del, post_ins, post_del]
                        .iter()
                        .filter(|&&f| f)
                        .count();
                    flags == 4 || (char_len(equality) < EDIT_COST / 2 && flags == 3)
                }
                _ => false,
            };
            if eliminate {
                if let (Some(equality), Some(&index)) = (last_equality.take(), equalities.last()) {
                    diffs.insert(index, Diff::delete(equality));
                    diffs[index + 1].op = Operation::Insert;
                    equalities.pop();
                    if pre_ins && pre_del {
                        // No changes made which could affect previous entry, keep going.
                        post_ins = true;
                        post_del = true;
                        equalities.clear();
                    } else {
                        equalities.pop();
                        pointer = equalities.last().map_or(-1, |&i| i as isize);
                        post_ins = false;
                        post_del = false;
                    }
                    changes = true;
                }
            }
        }
        pointer += 1;
    }

    if changes {
        cleanup_merge(diffs);
    }
}

/// Source text of an edit script (Equal + Delete runs).
pub fn source_text(diffs: &[Diff]) -> String {
    diffs
        .iter()
        .filter(|d| d.op != Operation::Insert)
        .map(|d| d.text.as_str())
        .collect()
}

/// Target text of an edit script (Equal + Insert runs).
pub fn target_text(diffs: &[Diff]) -> String {
    diffs
        .iter()
        .filter(|d| d.op != Operation::Delete)
        .map(|d| d.text.as_str())
        .collect()
}

/// Translate a char offset in the source text into the target text.
/// Offsets inside a deletion map to the start of that deletion.
pub fn x_index(diffs: &[Diff], loc: usize) -> usize {
    let (mut chars1, mut chars2) = (0usize, 0usize);
    let (mut last_chars1, mut last_chars2) = (0usize, 0usize);
    let mut hit: Option<&Diff> = None;
    for diff in diffs {
        if diff.op != Operation::Insert {
            chars1 += diff.len();
        }
        if diff.op != Operation::Delete {
            chars2 += diff.len();
        }
        if chars1 > loc {
            hit = Some(diff);
            break;
        }
        last_chars1 = chars1;
        last_chars2 = chars2;
    }
    match hit {
        Some(diff) if diff.op == Operation::Delete => last_chars2,
        _ => last_chars2 + (loc - last_chars1),
    }
}

/// Levenshtein distance of an edit script: inserted, deleted or
/// substituted chars.
pub fn levenshtein(diffs: &[Diff]) -> usize {
    let mut distance = 0;
    let (mut insertions, mut deletions) = (0usize, 0usize);
    for diff in diffs {
        match diff.op {
            Operation::Insert => insertions += diff.len(),
            Operation::Delete => deletions += diff.len(),
            Operation::Equal => {
                distance += insertions.max(deletions);
                insertions = 0;
                deletions = 0;
            }
        }
    }
    distance + insertions.max(deletions)
}
