//! Three-way text merge.

use crate::patch::{apply, make_patches};

/// Replay the changes from `ancestor` to `yours` onto `mine`.
///
/// Returns `None` when any of those changes cannot be applied cleanly.
pub fn merge(mine: &str, ancestor: &str, yours: &str) -> Option<String> {
    let patches = make_patches(ancestor, yours);
    match apply(mine, &patches) {
        Ok(merged) => Some(merged),
        Err(err) => {
            log::debug!("merge refused: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_disjoint_lines() {
        assert_eq!(
            merge("foo\nbar\nbaz2\n", "foo\nbar\nbaz\n", "foo1\nbar\nbaz\n"),
            Some("foo1\nbar\nbaz2\n".to_string())
        );
    }

    #[test]
    fn test_merge_conflict() {
        assert_eq!(merge("baz", "foo", "bar"), None);
    }

    #[test]
    fn test_merge_no_change_on_their_side() {
        assert_eq!(merge("mine", "base", "base"), Some("mine".to_string()));
    }
}
