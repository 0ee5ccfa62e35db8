use std::collections::BTreeMap;

use serde_json::json;

use danci_amas::compute::router::default_operations;
use danci_amas::compute::task::{
    BAYESIAN_SUGGEST, CHOLESKY_DECOMPOSE, CHOLESKY_RANK1_UPDATE, LINUCB_SELECT,
};
use danci_amas::compute::{Complexity, OperationConfig, RouteDecision, RouteOptions, SmartRouter};

fn op(complexity: Complexity, threshold: Option<usize>) -> OperationConfig {
    OperationConfig {
        complexity,
        threshold,
        force_route: None,
        description: String::new(),
    }
}

#[test]
fn unconfigured_operation_follows_native_availability() {
    let router = SmartRouter::new();
    assert_eq!(router.decide("x", RouteOptions::default()), RouteDecision::Native);
    assert_eq!(
        router.decide("x", RouteOptions::native_unavailable()),
        RouteDecision::InProcess
    );
}

#[test]
fn unavailable_native_overrides_thresholds() {
    let router = SmartRouter::new();
    let options = RouteOptions {
        data_size: Some(10_000),
        native_available: Some(false),
    };
    assert_eq!(router.decide(CHOLESKY_DECOMPOSE, options), RouteDecision::InProcess);
}

#[test]
fn missing_size_falls_back_to_complexity() {
    let router = SmartRouter::new();
    assert_eq!(
        router.decide(CHOLESKY_RANK1_UPDATE, RouteOptions::default()),
        RouteDecision::InProcess
    );
    assert_eq!(
        router.decide(CHOLESKY_DECOMPOSE, RouteOptions::default()),
        RouteDecision::Native
    );
    assert_eq!(
        router.decide(BAYESIAN_SUGGEST, RouteOptions::with_size(0)),
        RouteDecision::Native
    );
}

#[test]
fn forced_in_process_always_wins() {
    let router = SmartRouter::new();
    router.register_operation(
        "pinned",
        OperationConfig {
            force_route: Some(RouteDecision::InProcess),
            ..op(Complexity::High, Some(1))
        },
    );
    assert_eq!(
        router.decide("pinned", RouteOptions::with_size(1_000_000)),
        RouteDecision::InProcess
    );
}

#[test]
fn helpers_agree_with_decide() {
    let router = SmartRouter::new();
    assert!(router.should_use_native(CHOLESKY_DECOMPOSE, RouteOptions::with_size(400)));
    assert!(router.should_run_in_process(CHOLESKY_DECOMPOSE, RouteOptions::with_size(4)));
}

#[test]
fn stats_are_opt_in_and_counted_per_operation() {
    let router = SmartRouter::new();
    router.decide(LINUCB_SELECT, RouteOptions::with_size(1));
    assert!(!router.stats_enabled());
    assert!(router.get_stats().is_none());

    router.enable_stats(true);
    router.decide(LINUCB_SELECT, RouteOptions::with_size(1));
    router.decide(LINUCB_SELECT, RouteOptions::with_size(500));
    router.decide(CHOLESKY_DECOMPOSE, RouteOptions::with_size(500));

    let stats = router.get_stats().unwrap();
    assert_eq!(stats.total.native, 2);
    assert_eq!(stats.total.in_process, 1);
    assert_eq!(stats.by_operation[LINUCB_SELECT].total(), 2);
    assert_eq!(stats.by_operation[CHOLESKY_DECOMPOSE].native, 1);

    router.reset_stats();
    let stats = router.get_stats().unwrap();
    assert_eq!(stats.total.total(), 0);
    assert!(stats.by_operation.is_empty());

    router.enable_stats(false);
    assert!(router.get_stats().is_none());
}

#[test]
fn explain_does_not_touch_stats() {
    let router = SmartRouter::new();
    router.enable_stats(true);
    let text = router.explain_decision(BAYESIAN_SUGGEST, RouteOptions::default());
    assert!(text.starts_with("bayesian_suggest: native"));
    assert_eq!(router.get_stats().unwrap().total.total(), 0);
}

#[test]
fn decide_batch_covers_every_operation() {
    let router = SmartRouter::new();
    let decisions = router.decide_batch(
        &[CHOLESKY_DECOMPOSE, CHOLESKY_RANK1_UPDATE, "unknown"],
        RouteOptions::with_size(200),
    );
    assert_eq!(decisions.len(), 3);
    assert_eq!(decisions[CHOLESKY_DECOMPOSE], RouteDecision::Native);
    assert_eq!(decisions[CHOLESKY_RANK1_UPDATE], RouteDecision::InProcess);
    assert_eq!(decisions["unknown"], RouteDecision::Native);
}

#[test]
fn registry_edits_and_reset() {
    let router = SmartRouter::new();
    router.register_operation("custom", op(Complexity::Low, None));
    assert_eq!(router.decide("custom", RouteOptions::default()), RouteDecision::InProcess);
    assert!(router.operation("custom").is_some());

    assert!(router.unregister_operation(CHOLESKY_DECOMPOSE));
    assert!(!router.unregister_operation(CHOLESKY_DECOMPOSE));

    router.reset_to_defaults();
    assert!(router.operation("custom").is_none());
    assert_eq!(router.export_config(), default_operations());
}

#[test]
fn import_merges_or_replaces() {
    let router = SmartRouter::new();
    let mut incoming = BTreeMap::new();
    incoming.insert("extra".to_string(), op(Complexity::High, Some(10)));

    router.import_config(incoming.clone(), true);
    let merged = router.export_config();
    assert_eq!(merged.len(), default_operations().len() + 1);

    router.import_config(incoming, false);
    let replaced = router.export_config();
    assert_eq!(replaced.len(), 1);
    assert!(replaced.contains_key("extra"));
}

#[test]
fn json_import_reads_exported_shape() {
    let router = SmartRouter::new();
    let value = json!({
        "matrix_inverse": { "complexity": "high", "threshold": 36, "description": "inverse" },
        "tiny": { "complexity": "low", "forceRoute": "in_process" }
    });
    assert_eq!(router.import_config_json(&value, true).unwrap(), 2);
    assert_eq!(
        router.decide("matrix_inverse", RouteOptions::with_size(36)),
        RouteDecision::Native
    );
    assert_eq!(router.operation("tiny").unwrap().force_route, Some(RouteDecision::InProcess));

    let exported = serde_json::to_value(router.export_config()).unwrap();
    let copy = SmartRouter::with_operations(BTreeMap::new());
    copy.import_config_json(&exported, false).unwrap();
    assert_eq!(copy.export_config(), router.export_config());
}

#[test]
fn malformed_json_import_leaves_registry_alone() {
    let router = SmartRouter::new();
    let before = router.export_config();
    let value = json!({ "broken": { "complexity": "extreme" } });
    assert!(router.import_config_json(&value, false).is_err());
    assert_eq!(router.export_config(), before);
}
