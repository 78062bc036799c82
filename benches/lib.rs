use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches_fit,
    fit::bench_shared_intercept,
    fit::bench_lorentzian_peaks
);
criterion_main!(benches_fit);
