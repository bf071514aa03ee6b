//! Bounded approximate string search (bitap).
//!
//! Locates the best match for a short pattern near an expected offset,
//! trading edit errors against distance from that offset.

use std::collections::HashMap;

use crate::text::{self, chars};

/// Tuning for [`find`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// 0.0 accepts only perfect matches, 1.0 accepts anything.
    pub threshold: f64,
    /// How far from the expected offset a match may drift before it is
    /// scored as a complete mismatch. 0 requires the exact offset.
    pub distance: usize,
    /// Longest pattern the bitap bit vectors can hold.
    pub max_bits: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            distance: 1000,
            max_bits: 32,
        }
    }
}

/// Best location of `pattern` in `text` near `loc`, in chars.
pub fn find(text: &str, pattern: &str, loc: usize, config: &MatchConfig) -> Option<usize> {
    find_chars(&chars(text), &chars(pattern), loc, config)
}

pub(crate) fn find_chars(
    text: &[char],
    pattern: &[char],
    loc: usize,
    config: &MatchConfig,
) -> Option<usize> {
    let loc = loc.min(text.len());
    if text == pattern {
        return Some(0);
    }
    if text.is_empty() {
        return None;
    }
    if loc + pattern.len() <= text.len() && text[loc..loc + pattern.len()] == *pattern {
        return Some(loc);
    }
    bitap(text, pattern, loc, config)
}

fn bitap(text: &[char], pattern: &[char], loc: usize, config: &MatchConfig) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > config.max_bits.min(64) {
        log::debug!("pattern of {} chars exceeds the match window", pattern.len());
        return None;
    }

    let alphabet = alphabet(pattern);
    let score = |errors: usize, x: usize| -> f64 {
        let accuracy = errors as f64 / pattern.len() as f64;
        let proximity = loc.abs_diff(x);
        if config.distance == 0 {
            return if proximity == 0 { accuracy } else { 1.0 };
        }
        accuracy + proximity as f64 / config.distance as f64
    };

    // Tighten the threshold with any exact hits on either side.
    let mut threshold = config.threshold;
    if let Some(hit) = text::find(text, pattern, loc) {
        threshold = threshold.min(score(0, hit));
        if let Some(hit) = text::rfind(text, pattern, loc + pattern.len()) {
            threshold = threshold.min(score(0, hit));
        }
    }

    let match_mask: u64 = 1 << (pattern.len() - 1);
    let mut best_loc = None;
    let mut bin_max = pattern.len() + text.len();
    let mut last_rd: Vec<u64> = Vec::new();

    for d in 0..pattern.len() {
        // Binary search for how far from `loc` we can stray at this error
        // level.
        let mut bin_min = 0;
        let mut bin_mid = bin_max;
        while bin_min < bin_mid {
            if score(d, loc + bin_mid) <= threshold {
                bin_min = bin_mid;
            } else {
                bin_max = bin_mid;
            }
            bin_mid = (bin_max - bin_min) / 2 + bin_min;
        }
        bin_max = bin_mid;

        let mut start = (loc as isize - bin_mid as isize + 1).max(1) as usize;
        let finish = (loc + bin_mid).min(text.len()) + pattern.len();

        let mut rd = vec![0u64; finish + 2];
        rd[finish + 1] = (1u64 << d) - 1;
        let mut j = finish;
        while j >= start {
            let char_match = text
                .get(j - 1)
                .and_then(|c| alphabet.get(c))
                .copied()
                .unwrap_or(0);
            let exact = ((rd[j + 1] << 1) | 1) & char_match;
            rd[j] = if d == 0 {
                exact
            } else {
                let previous = |i: usize| last_rd.get(i).copied().unwrap_or(0);
                exact | (((previous(j + 1) | previous(j)) << 1) | 1) | previous(j + 1)
            };
            if rd[j] & match_mask != 0 {
                let candidate = score(d, j - 1);
                if candidate <= threshold {
                    threshold = candidate;
                    best_loc = Some(j - 1);
                    if j - 1 > loc {
                        // Past the expected spot: don't look further right
                        // than the mirror image of this hit.
                        start = (2 * loc as isize - (j - 1) as isize).max(1) as usize;
                    } else {
                        break;
                    }
                }
            }
            j -= 1;
        }

        // No hope for a better match at greater error levels.
        if score(d + 1, loc) > threshold {
            break;
        }
        last_rd = rd;
    }
    best_loc
}

/// Bit mask of positions for every char of the pattern.
fn alphabet(pattern: &[char]) -> HashMap<char, u64> {
    let mut masks = HashMap::new();
    for (i, &c) in pattern.iter().enumerate() {
        *masks.entry(c).or_insert(0) |= 1u64 << (pattern.len() - i - 1);
    }
    masks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: f64, distance: usize) -> MatchConfig {
        MatchConfig {
            threshold,
            distance,
            ..MatchConfig::default()
        }
    }

    #[test]
    fn test_alphabet() {
        let masks = alphabet(&chars("abc"));
        assert_eq!(masks[&'a'], 4);
        assert_eq!(masks[&'b'], 2);
        assert_eq!(masks[&'c'], 1);

        let masks = alphabet(&chars("abcaba"));
        assert_eq!(masks[&'a'], 37);
        assert_eq!(masks[&'b'], 18);
        assert_eq!(masks[&'c'], 8);
    }

    #[test]
    fn test_exact_shortcuts() {
        let cfg = MatchConfig::default();
        assert_eq!(find("abcdef", "abcdef", 1000, &cfg), Some(0));
        assert_eq!(find("", "abcdef", 1, &cfg), None);
        assert_eq!(find("abcdef", "", 3, &cfg), Some(3));
        assert_eq!(find("abcdef", "de", 3, &cfg), Some(3));
    }

    #[test]
    fn test_bitap_exact_and_fuzzy() {
        let cfg = config(0.5, 100);
        assert_eq!(find("abcdefghijk", "fgh", 5, &cfg), Some(5));
        assert_eq!(find("abcdefghijk", "fgh", 0, &cfg), Some(5));
        assert_eq!(find("abcdefghijk", "efxhi", 0, &cfg), Some(4));
        assert_eq!(find("abcdefghijk", "cdefxyhijk", 5, &cfg), Some(2));
        assert_eq!(find("abcdefghijk", "bxy", 1, &cfg), None);
        assert_eq!(find("123456789xx0", "3456789x0", 2, &cfg), Some(2));
        assert_eq!(find("abcdef", "xxabc", 4, &cfg), Some(0));
        assert_eq!(find("abcdef", "defyy", 4, &cfg), Some(3));
        assert_eq!(find("abcdef", "xabcdefy", 0, &cfg), Some(0));
    }

    #[test]
    fn test_bitap_threshold() {
        assert_eq!(find("abcdefghijk", "efxyhi", 1, &config(0.4, 100)), Some(4));
        assert_eq!(find("abcdefghijk", "efxyhi", 1, &config(0.3, 100)), None);
        assert_eq!(find("abcdefghijk", "bcdef", 1, &config(0.0, 100)), Some(1));
    }

    #[test]
    fn test_bitap_multiple_hits_prefers_nearest() {
        let cfg = config(0.5, 100);
        assert_eq!(find("abcdexyzabcde", "abccde", 3, &cfg), Some(0));
        assert_eq!(find("abcdexyzabcde", "abccde", 5, &cfg), Some(8));
    }

    #[test]
    fn test_bitap_distance() {
        let strict = config(0.5, 10);
        assert_eq!(
            find("abcdefghijklmnopqrstuvwxyz", "abcdefg", 24, &strict),
            None
        );
        assert_eq!(
            find("abcdefghijklmnopqrstuvwxyz", "abcdxxefg", 1, &strict),
            Some(0)
        );
        let loose = config(0.5, 1000);
        assert_eq!(
            find("abcdefghijklmnopqrstuvwxyz", "abcdefg", 24, &loose),
            Some(0)
        );
    }

    #[test]
    fn test_unicode_pattern() {
        let cfg = MatchConfig::default();
        assert_eq!(find("naïve café au lait", "café", 4, &cfg), Some(6));
        assert_eq!(find("naïve café au lait", "lait", 14, &cfg), Some(14));
    }
}
