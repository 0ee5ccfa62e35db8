use std::collections::BTreeMap;

use proptest::prelude::*;

use danci_amas::amas::config::{AcquisitionKind, BayesianOptimizerConfig};
use danci_amas::amas::optimization::bayesian::{
    BayesianOptimizer, BayesianOptimizerState, BestPoint, Observation, OptimizerError,
    ParamBound, OPTIMIZER_STATE_VERSION,
};

fn one_dim(seed: u64, acquisition: AcquisitionKind) -> BayesianOptimizer {
    BayesianOptimizer::new(BayesianOptimizerConfig {
        param_space: vec![ParamBound::new("x", 0.0, 1.0)],
        acquisition,
        seed: Some(seed),
        ..Default::default()
    })
}

fn objective(x: f64) -> f64 {
    -(x - 0.7) * (x - 0.7)
}

#[test]
fn finds_quadratic_peak_with_ucb() {
    for seed in [1, 2, 3] {
        let mut optimizer = one_dim(seed, AcquisitionKind::Ucb);
        for _ in 0..20 {
            let x = optimizer.suggest_next();
            optimizer.record_evaluation(&x, objective(x[0])).unwrap();
        }
        let best = optimizer.best().unwrap();
        assert!((best.params[0] - 0.7).abs() < 0.3, "seed {seed}: best {:?}", best.params);
    }
}

#[test]
fn finds_quadratic_peak_with_ei() {
    let mut optimizer = one_dim(11, AcquisitionKind::Ei);
    for _ in 0..20 {
        let x = optimizer.suggest_next();
        optimizer.record_evaluation(&x, objective(x[0])).unwrap();
    }
    assert!((optimizer.best().unwrap().params[0] - 0.7).abs() < 0.3);
}

#[test]
fn record_evaluation_checks_dimensions() {
    let mut optimizer = BayesianOptimizer::default();
    let err = optimizer.record_evaluation(&[1.0, 0.05], 0.5).unwrap_err();
    assert_eq!(err, OptimizerError::DimensionMismatch { expected: 4, actual: 2 });
    assert_eq!(optimizer.evaluation_count(), 0);
}

#[test]
fn ties_keep_the_first_best() {
    let mut optimizer = one_dim(5, AcquisitionKind::Ucb);
    optimizer.record_evaluation(&[0.2], 1.0).unwrap();
    optimizer.record_evaluation(&[0.8], 1.0).unwrap();
    assert_eq!(optimizer.best().unwrap().params, vec![0.2]);
    optimizer.record_evaluation(&[0.5], 1.5).unwrap();
    assert_eq!(optimizer.best().unwrap().params, vec![0.5]);
}

#[test]
fn acquisitions_are_one_without_data() {
    let optimizer = one_dim(1, AcquisitionKind::Ucb);
    assert_eq!(optimizer.compute_ucb(&[0.3]), 1.0);
    assert_eq!(optimizer.compute_ei(&[0.3]), 1.0);
    let prior = optimizer.posterior(&[0.3]);
    assert_eq!(prior.mean, 0.0);
    assert!((prior.std - 1.0).abs() < 1e-12);
}

#[test]
fn duplicate_observations_stay_finite() {
    let mut optimizer = one_dim(1, AcquisitionKind::Ei);
    for _ in 0..25 {
        optimizer.record_evaluation(&[0.4], 0.3).unwrap();
    }
    for x in [0.0, 0.4, 0.41, 1.0] {
        let post = optimizer.posterior(&[x]);
        assert!(post.mean.is_finite() && post.std.is_finite());
        assert!(optimizer.compute_ucb(&[x]).is_finite());
        assert!(optimizer.compute_ei(&[x]).is_finite());
    }
}

#[test]
fn suggest_batch_does_not_record() {
    let mut optimizer = one_dim(9, AcquisitionKind::Ucb);
    for x in [0.1, 0.5, 0.9, 0.3, 0.7] {
        optimizer.record_evaluation(&[x], objective(x)).unwrap();
    }
    let batch = optimizer.suggest_batch(4);
    assert_eq!(batch.len(), 4);
    assert_eq!(optimizer.evaluation_count(), 5);
    assert!(batch.iter().all(|p| (0.0..=1.0).contains(&p[0])));
    assert!(batch.windows(2).any(|w| w[0] != w[1]));
}

#[test]
fn should_stop_at_budget() {
    let mut optimizer = BayesianOptimizer::new(BayesianOptimizerConfig {
        param_space: vec![ParamBound::new("x", 0.0, 1.0)],
        max_evaluations: 3,
        seed: Some(1),
        ..Default::default()
    });
    for i in 0..3 {
        assert!(!optimizer.should_stop());
        optimizer.record_evaluation(&[i as f64 / 3.0], 0.0).unwrap();
    }
    assert!(optimizer.should_stop());
}

#[test]
fn state_round_trip_and_best_rebuild() {
    let mut optimizer = one_dim(3, AcquisitionKind::Ucb);
    optimizer.record_evaluation(&[0.1], 0.2).unwrap();
    optimizer.record_evaluation(&[0.6], 0.9).unwrap();

    let mut state = optimizer.state();
    assert_eq!(state.version, OPTIMIZER_STATE_VERSION);
    state.best = None;

    let mut restored = one_dim(4, AcquisitionKind::Ucb);
    restored.set_state(Some(state));
    assert_eq!(restored.evaluation_count(), 2);
    assert_eq!(
        restored.best(),
        Some(&BestPoint {
            params: vec![0.6],
            value: 0.9
        })
    );
}

#[test]
fn unusable_state_leaves_optimizer_empty() {
    let mut optimizer = one_dim(3, AcquisitionKind::Ucb);
    optimizer.record_evaluation(&[0.1], 0.2).unwrap();

    optimizer.set_state(None);
    assert_eq!(optimizer.evaluation_count(), 0);

    optimizer.set_state(Some(BayesianOptimizerState {
        version: OPTIMIZER_STATE_VERSION + 7,
        observations: vec![Observation {
            params: vec![0.5],
            value: 1.0,
            timestamp: 0,
        }],
        best: None,
    }));
    assert_eq!(optimizer.evaluation_count(), 0);
    assert!(optimizer.best().is_none());

    optimizer.restore_from_json(&serde_json::json!({ "observations": 12 }));
    assert_eq!(optimizer.evaluation_count(), 0);
    optimizer.restore_from_json(&serde_json::Value::Null);
    assert_eq!(optimizer.evaluation_count(), 0);
}

#[test]
fn object_conversion_defaults_to_midpoint() {
    let optimizer = BayesianOptimizer::default();
    let mut named = BTreeMap::new();
    named.insert("alpha".to_string(), 1.4);
    let params = optimizer.object_to_params(&named);
    assert_eq!(params[0], 1.4);
    assert!((params[1] - 0.11).abs() < 1e-12);
    assert!((params[3] - 0.5).abs() < 1e-12);

    let back = optimizer.params_to_object(&params);
    assert_eq!(back["alpha"], 1.4);
    assert_eq!(back.len(), 4);
}

fn arb_space() -> impl Strategy<Value = Vec<ParamBound>> {
    prop::collection::vec(
        (-10.0f64..10.0, 0.0f64..5.0, proptest::option::of(0.01f64..2.0)),
        1..4,
    )
    .prop_map(|dims| {
        dims.into_iter()
            .enumerate()
            .map(|(i, (min, width, step))| {
                // a zero width yields a degenerate min == max dimension
                let width = if width < 0.5 { 0.0 } else { width };
                match step {
                    Some(step) => ParamBound::with_step(format!("p{i}"), min, min + width, step),
                    None => ParamBound::new(format!("p{i}"), min, min + width),
                }
            })
            .collect()
    })
}

fn on_grid(bound: &ParamBound, v: f64) -> bool {
    match bound.step {
        Some(step) => {
            let k = (v - bound.min) / step;
            (k - k.round()).abs() < 1e-6
        }
        None => true,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn suggestions_respect_bounds_and_steps(space in arb_space(), seed in 0u64..1000, rounds in 1usize..10) {
        let mut optimizer = BayesianOptimizer::new(BayesianOptimizerConfig {
            param_space: space.clone(),
            initial_samples: 3,
            candidate_count: 64,
            seed: Some(seed),
            ..Default::default()
        });
        for round in 0..rounds {
            let point = optimizer.suggest_next();
            prop_assert_eq!(point.len(), space.len());
            for (bound, &v) in space.iter().zip(point.iter()) {
                prop_assert!(v >= bound.min && v <= bound.max, "{} outside {:?}", v, bound);
                prop_assert!(on_grid(bound, v), "{} off grid {:?}", v, bound);
            }
            optimizer.record_evaluation(&point, (round as f64).sin()).unwrap();
        }
    }
}
