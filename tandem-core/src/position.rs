//! Cursor offset remapping through a patch list.

use crate::diff::Operation;
use crate::patch::Patch;

/// Map `pos` (in chars) in a patch list's source text to the equivalent
/// offset in its target text.
///
/// Offsets before a change keep their place, offsets after it move by the
/// change's net length, and offsets inside deleted text collapse to where
/// the deletion was. Insertions at the offset push it forward.
pub fn remap(pos: usize, patches: &[Patch]) -> usize {
    if pos == 0 {
        return 0;
    }
    let mut drift: isize = 0;
    for patch in patches {
        let current = (pos as isize + drift).max(0) as usize;
        if current < patch.start1 {
            break;
        }
        if current >= patch.start1.saturating_add(patch.length1) {
            drift += patch.length2 as isize - patch.length1 as isize;
            continue;
        }
        return remap_within(patch, current - patch.start1);
    }
    (pos as isize + drift).max(0) as usize
}

fn remap_within(patch: &Patch, offset: usize) -> usize {
    let mut remaining = offset;
    let mut target = patch.start2;
    for diff in &patch.diffs {
        let len = diff.len();
        match diff.op {
            Operation::Equal => {
                if remaining < len {
                    return target + remaining;
                }
                remaining -= len;
                target += len;
            }
            Operation::Delete => {
                if remaining < len {
                    return target;
                }
                remaining -= len;
            }
            Operation::Insert => target += len,
        }
    }
    target + remaining
}
