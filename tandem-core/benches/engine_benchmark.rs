use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tandem_core::{apply, diff_text, make_patches, remap, Changeset, Document};

fn sample(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("fn item_{i}() -> usize {{ {i} * 2 }}\n"))
        .collect()
}

fn bench_diff_small(c: &mut Criterion) {
    c.bench_function("diff_sentence", |b| {
        b.iter(|| {
            black_box(diff_text(
                black_box("The quick brown fox jumps over the lazy dog."),
                black_box("That quick brown fox jumped over a lazy dog."),
            ))
        })
    });
}

fn bench_diff_lines(c: &mut Criterion) {
    let before = sample(500);
    let after = before.replace("item_250", "renamed_250").replace("item_10()", "item_ten()");

    c.bench_function("diff_500_lines", |b| {
        b.iter(|| black_box(diff_text(black_box(&before), black_box(&after))))
    });
}

fn bench_make_and_apply(c: &mut Criterion) {
    let before = sample(200);
    let after = before.replace("item_100", "item_one_hundred");
    let patches = make_patches(&before, &after);

    c.bench_function("make_patches_200_lines", |b| {
        b.iter(|| black_box(make_patches(black_box(&before), black_box(&after))))
    });

    c.bench_function("apply_exact_200_lines", |b| {
        b.iter(|| black_box(apply(black_box(&before), black_box(&patches))))
    });

    let drifted = format!("// header added locally\n{before}");
    c.bench_function("apply_relocated_200_lines", |b| {
        b.iter(|| black_box(apply(black_box(&drifted), black_box(&patches))))
    });
}

fn bench_remap(c: &mut Criterion) {
    let before = Document::new(sample(200));
    let after = Document::new(before.text().replace("item_3()", "item_three()"));
    let changes = Changeset::new(&before, &after);
    let len = before.len();

    c.bench_function("remap_every_offset_200_lines", |b| {
        b.iter(|| {
            for pos in (0..len).step_by(7) {
                black_box(remap(pos, changes.patches()));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_diff_small,
    bench_diff_lines,
    bench_make_and_apply,
    bench_remap,
);
criterion_main!(benches);
