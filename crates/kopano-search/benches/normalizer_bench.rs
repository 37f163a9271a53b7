//! Criterion benchmarks for the restriction normaliser's extraction
//! walk, over restrictions of increasing conjunct count.

use std::collections::BTreeSet;
use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use kopano_core::proptag::well_known::PR_SUBJECT;
use kopano_core::restriction::{FuzzyLevel, Restriction};
use kopano_search::normalizer::normalize_restriction;

fn build_restriction(conjuncts: usize) -> Restriction {
    let children = (0..conjuncts)
        .map(|i| Restriction::Content {
            prop: PR_SUBJECT,
            value: format!("term-{i}"),
            fuzzy: FuzzyLevel::substring_ignore_case(),
        })
        .collect();
    Restriction::And(children)
}

fn bench_normalize_small(c: &mut Criterion) {
    let restriction = build_restriction(4);
    c.bench_function("normalize_restriction_4_conjuncts", |b| {
        b.iter(|| black_box(normalize_restriction(black_box(&restriction), &BTreeSet::new())));
    });
}

fn bench_normalize_large(c: &mut Criterion) {
    let restriction = build_restriction(200);
    c.bench_function("normalize_restriction_200_conjuncts", |b| {
        b.iter(|| black_box(normalize_restriction(black_box(&restriction), &BTreeSet::new())));
    });
}

criterion_group!(benches, bench_normalize_small, bench_normalize_large);
criterion_main!(benches);
