//! End-to-end scenarios for the diff/patch/merge engine.

use tandem_core::{
    apply, diff, make_patches, merge, remap, Changeset, Diff, Document, Hash, Patch, PatchError,
};

const PLAYGROUND: &str = "//: Playground - noun: a place where people can play

import Cocoa

var str = \"Hello, playground\"
";

#[test]
fn test_diff_scenario() {
    assert_eq!(
        diff(Some("foo2bar"), Some("foobar")),
        vec![Diff::equal("foo"), Diff::delete("2"), Diff::equal("bar")]
    );
    assert!(diff(None, Some("foobar")).is_empty());
}

#[test]
fn test_patch_scenario() {
    let patches = make_patches("foo2bar", "foobar");
    let rendered: String = patches.iter().map(Patch::to_string).collect();
    assert_eq!(rendered, "@@ -1,7 +1,6 @@\n foo\n-2\n bar\n");
    assert_eq!(apply("foo2bar", &patches), Ok("foobar".to_string()));
}

#[test]
fn test_merge_scenarios() {
    assert_eq!(
        merge("foo\nbar\nbaz2\n", "foo\nbar\nbaz\n", "foo1\nbar\nbaz\n"),
        Some("foo1\nbar\nbaz2\n".to_string())
    );
    assert_eq!(merge("baz", "foo", "bar"), None);
}

#[test]
fn test_diverged_applies_fail() {
    let cases = [
        (
            "The quick brown fox jumps over the lazy dog",
            "The quick brown leopard jumps over the lazy dog",
            "The quick brown horse jumps over the lazy dog",
        ),
        ("initial", "server", "client"),
        ("foo", "server", "client"),
        (
            "The quick brown fox jumps over the lazy dog",
            "The quick brown leopard jumps over the lazy dog",
            "The quick thing likes the lazy dog",
        ),
        ("foo", "foobar", PLAYGROUND),
    ];
    for (source, target, other) in cases {
        let patches = make_patches(source, target);
        assert!(
            apply(other, &patches).is_err(),
            "{source:?} -> {target:?} should not apply to {other:?}"
        );
    }
}

#[test]
fn test_failed_apply_reports_patch() {
    let patches = make_patches("foo", "bar");
    match apply("baz", &patches) {
        Err(PatchError::NoMatch { index, .. }) | Err(PatchError::Diverged { index, .. }) => {
            assert_eq!(index, 0)
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(text) => panic!("unexpected success: {text:?}"),
    }
}

#[test]
fn test_document_round_trip_through_changeset() {
    let before = Document::new(PLAYGROUND);
    let after = Document::new(PLAYGROUND.replace("Hello, playground", "Hello, tandem"));
    let changes = Changeset::new(&before, &after);
    assert_eq!(changes.apply(&before), Ok(after.clone()));
    assert_eq!(after.hash(), &Hash::of(after.text()));
}

#[test]
fn test_concurrent_line_edits_merge() {
    let ancestor = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\n";
    let mine = "one\ntwo\nTHREE\nfour\nfive\nsix\nseven\neight\n";
    let yours = "one\ntwo\nthree\nfour\nfive\nsix\nSEVEN\neight\n";
    assert_eq!(
        merge(mine, ancestor, yours),
        Some("one\ntwo\nTHREE\nfour\nfive\nsix\nSEVEN\neight\n".to_string())
    );
}

#[test]
fn test_long_texts_use_line_mode() {
    let before: String = (0..200).map(|i| format!("line number {i}\n")).collect();
    let after = before
        .replace("line number 17\n", "line seventeen\n")
        .replace("line number 150\n", "");
    let patches = make_patches(&before, &after);
    assert_eq!(apply(&before, &patches), Ok(after.clone()));

    let pos = before.find("line number 199").unwrap();
    let moved = after.find("line number 199").unwrap();
    assert_eq!(remap(pos, &patches), moved);
}

#[test]
fn test_unicode_offsets() {
    let before = "naïve café ☕ au lait";
    let after = "naïve café ☕☕ au lait";
    let patches = make_patches(before, after);
    assert_eq!(apply(before, &patches), Ok(after.to_string()));
    // Offset of "au" in chars.
    let au = before.chars().position(|c| c == 'u').unwrap() - 1;
    assert_eq!(remap(au, &patches), au + 1);
}

#[test]
fn test_changeset_serializes_diff_codes() {
    let changes = Changeset::new(&Document::new("foo2bar"), &Document::new("foobar"));
    let bytes = bincode::serde::encode_to_vec(&changes, bincode::config::standard()).unwrap();
    let (decoded, _): (Changeset, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
    assert_eq!(decoded, changes);

    let diff = Diff::delete("2");
    let bytes = bincode::serde::encode_to_vec(&diff, bincode::config::standard()).unwrap();
    let (raw, _): ((i8, String), usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
    assert_eq!(raw, (-1, "2".to_string()));
}
