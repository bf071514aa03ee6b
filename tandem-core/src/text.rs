//! Char-indexed string helpers.
//!
//! Every offset in the engine counts Unicode scalar values, so the
//! algorithms work on `&[char]` and only convert back to `String` at the
//! edges.

pub(crate) fn chars(text: &str) -> Vec<char> {
    text.chars().collect()
}

pub(crate) fn collect(chars: &[char]) -> String {
    chars.iter().collect()
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Substring by char range, clamped to the text bounds.
pub(crate) fn clamped(text: &[char], start: usize, end: usize) -> &[char] {
    let end = end.min(text.len());
    let start = start.min(end);
    &text[start..end]
}

pub(crate) fn common_prefix(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

pub(crate) fn common_suffix(a: &[char], b: &[char]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// First occurrence of `needle` starting at or after `from`.
pub(crate) fn find(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    let from = from.min(haystack.len());
    if needle.is_empty() {
        return Some(from);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

/// Last occurrence of `needle` starting at or before `from`.
pub(crate) fn rfind(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    let last = from.min(haystack.len() - needle.len());
    (0..=last)
        .rev()
        .find(|&i| haystack[i..i + needle.len()] == *needle)
}

/// Length of the longest suffix of `a` that is a prefix of `b`.
pub(crate) fn common_overlap(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (a, b) = if a.len() > b.len() {
        (&a[a.len() - b.len()..], b)
    } else {
        (a, &b[..a.len()])
    };
    let n = a.len();
    if a == b {
        return n;
    }

    let mut best = 0;
    let mut length = 1;
    while length <= n {
        let Some(found) = find(b, &a[n - length..], 0) else {
            return best;
        };
        length += found;
        if found == 0 || a[n - length..] == b[..length] {
            best = length;
            length += 1;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Vec<char> {
        chars(s)
    }

    #[test]
    fn test_affixes() {
        assert_eq!(common_prefix(&c("abc"), &c("xyz")), 0);
        assert_eq!(common_prefix(&c("1234abcdef"), &c("1234xyz")), 4);
        assert_eq!(common_suffix(&c("abcdef1234"), &c("xyz1234")), 4);
        assert_eq!(common_suffix(&c("1234"), &c("xyz1234")), 4);
    }

    #[test]
    fn test_overlap() {
        assert_eq!(common_overlap(&c(""), &c("abcd")), 0);
        assert_eq!(common_overlap(&c("abc"), &c("abcd")), 3);
        assert_eq!(common_overlap(&c("123456"), &c("abcd")), 0);
        assert_eq!(common_overlap(&c("123456xxx"), &c("xxxabcd")), 3);
        assert_eq!(common_overlap(&c("fi"), &c("\u{fb01}i")), 0);
    }

    #[test]
    fn test_find_and_rfind() {
        let hay = c("abcabc");
        assert_eq!(find(&hay, &c("bc"), 0), Some(1));
        assert_eq!(find(&hay, &c("bc"), 2), Some(4));
        assert_eq!(find(&hay, &c("zz"), 0), None);
        assert_eq!(rfind(&hay, &c("bc"), 6), Some(4));
        assert_eq!(rfind(&hay, &c("bc"), 3), Some(1));
        assert_eq!(find(&hay, &[], 9), Some(6));
        assert_eq!(rfind(&hay, &[], 9), Some(6));
    }

    #[test]
    fn test_clamped() {
        let text = c("hello");
        assert_eq!(collect(clamped(&text, 1, 3)), "el");
        assert_eq!(collect(clamped(&text, 3, 99)), "lo");
        assert_eq!(collect(clamped(&text, 7, 99)), "");
    }
}
