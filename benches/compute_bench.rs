use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use danci_amas::amas::config::BayesianOptimizerConfig;
use danci_amas::amas::optimization::BayesianOptimizer;
use danci_amas::compute::matrix::{cholesky_decompose, cholesky_rank1_update, identity_scaled};
use danci_amas::compute::BanditModel;

fn spd_matrix(d: usize) -> Vec<f64> {
    let mut a = identity_scaled(d, d as f64);
    for i in 0..d {
        for j in 0..d {
            a[i * d + j] += 1.0 / (1.0 + (i as f64 - j as f64).abs());
        }
    }
    a
}

fn bench_cholesky_decompose(c: &mut Criterion) {
    let mut group = c.benchmark_group("cholesky_decompose");
    for d in [10, 22, 50] {
        let a = spd_matrix(d);
        group.bench_with_input(BenchmarkId::from_parameter(d), &d, |b, &d| {
            b.iter(|| cholesky_decompose(black_box(&a), d, 1.0))
        });
    }
    group.finish();
}

fn bench_rank1_update(c: &mut Criterion) {
    let d = 22;
    let l = cholesky_decompose(&spd_matrix(d), d, 1.0);
    let x: Vec<f64> = (0..d).map(|i| i as f64 * 0.1).collect();

    c.bench_function("cholesky_rank1_update_22", |b| {
        b.iter(|| {
            let mut work = l.clone();
            black_box(cholesky_rank1_update(&mut work, black_box(&x), d, 1e-6));
            work
        })
    });
}

fn bench_linucb_select(c: &mut Criterion) {
    let d = 22;
    let mut model = BanditModel::new(d, 0.3, 1.0);
    for step in 0..50 {
        let feature: Vec<f64> = (0..d).map(|i| ((step * 7 + i) % 11) as f64 / 10.0).collect();
        let _ = model.update(&feature, if step % 3 == 0 { 1.0 } else { -0.5 });
    }
    let candidates: Vec<Vec<f64>> = (0..20)
        .map(|arm| (0..d).map(|i| ((arm + i) % 5) as f64 / 5.0).collect())
        .collect();

    c.bench_function("linucb_select_22x20", |b| {
        b.iter(|| model.select(black_box(&candidates)))
    });
}

fn bench_bayesian_suggest(c: &mut Criterion) {
    let mut optimizer = BayesianOptimizer::new(BayesianOptimizerConfig {
        seed: Some(1),
        ..Default::default()
    });
    for _ in 0..12 {
        let point = optimizer.suggest_next();
        let score = 1.0 - point.iter().map(|v| (v - 0.5).powi(2)).sum::<f64>();
        let _ = optimizer.record_evaluation(&point, score);
    }

    c.bench_function("bayesian_suggest_12_obs", |b| {
        b.iter(|| black_box(optimizer.suggest_batch(1)))
    });
}

criterion_group!(
    benches,
    bench_cholesky_decompose,
    bench_rank1_update,
    bench_linucb_select,
    bench_bayesian_suggest
);
criterion_main!(benches);
