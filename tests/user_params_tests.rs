use std::collections::HashMap;
use std::sync::Arc;

use danci_amas::amas::config::UserParamsConfig;
use danci_amas::amas::optimization::default_user_param_space;
use danci_amas::amas::params::{
    ParamsFeedback, UserParams, UserParamsManager, UserParamsPatch, UserParamsState,
    ALPHA_BOUNDS, USER_PARAMS_STATE_VERSION,
};

fn manager_without_rate_limit() -> UserParamsManager {
    UserParamsManager::new(UserParamsConfig {
        min_update_interval_ms: 0,
        ..Default::default()
    })
}

fn good_feedback() -> ParamsFeedback {
    ParamsFeedback {
        accuracy: 0.9,
        fatigue_change: -0.1,
        motivation_change: 0.05,
        reward: 0.4,
    }
}

#[test]
fn unseen_user_gets_defaults_without_being_created() {
    let manager = UserParamsManager::default();
    assert_eq!(manager.get_params("ghost"), UserParams::default());
    assert!(!manager.contains_user("ghost"));
}

#[test]
fn returned_params_are_a_copy() {
    let manager = UserParamsManager::default();
    manager.set_params("u1", &UserParamsPatch {
        alpha: Some(1.5),
        ..Default::default()
    });
    let mut copy = manager.get_params("u1");
    copy.alpha = 0.0;
    assert_eq!(copy.alpha, 0.0);
    assert_eq!(manager.get_params("u1").alpha, 1.5);
}

#[test]
fn set_params_clamps_and_creates_user() {
    let manager = UserParamsManager::default();
    let params = manager.set_params(
        "u1",
        &UserParamsPatch {
            alpha: Some(10.0),
            fatigue_k: Some(f64::NEG_INFINITY),
            motivation_rho: Some(f64::NAN),
            optimal_difficulty: None,
        },
    );
    assert_eq!(params.alpha, ALPHA_BOUNDS.1);
    assert_eq!(params.fatigue_k, 0.02);
    assert_eq!(params.motivation_rho, 0.9);
    assert_eq!(params.optimal_difficulty, 0.5);
    assert!(manager.contains_user("u1"));
}

#[test]
fn reset_and_remove() {
    let manager = UserParamsManager::default();
    manager.set_params("u1", &UserParamsPatch {
        alpha: Some(0.4),
        ..Default::default()
    });
    manager.reset_params("u1");
    assert_eq!(manager.get_params("u1").alpha, 1.0);
    assert!(manager.remove_user("u1"));
    assert!(!manager.remove_user("u1"));
}

#[test]
fn batch_update_applies_each_patch() {
    let manager = UserParamsManager::default();
    let mut patches = HashMap::new();
    patches.insert("a".to_string(), UserParamsPatch {
        alpha: Some(0.5),
        ..Default::default()
    });
    patches.insert("b".to_string(), UserParamsPatch {
        optimal_difficulty: Some(0.7),
        ..Default::default()
    });
    assert_eq!(manager.batch_update(&patches), 2);
    assert_eq!(manager.get_params("a").alpha, 0.5);
    assert_eq!(manager.get_params("b").optimal_difficulty, 0.7);
}

#[test]
fn export_import_round_trip() {
    let source = manager_without_rate_limit();
    for (i, user) in ["a", "b", "c"].iter().enumerate() {
        source.set_params(user, &UserParamsPatch {
            alpha: Some(0.5 + i as f64 * 0.3),
            ..Default::default()
        });
        source.update_params_at(user, &good_feedback(), i as i64);
    }

    let target = UserParamsManager::default();
    assert_eq!(target.import_all(source.export_all()), 3);
    for user in ["a", "b", "c"] {
        assert_eq!(target.get_params(user), source.get_params(user));
        assert_eq!(target.get_performance(user), source.get_performance(user));
    }
}

#[test]
fn invalid_import_leaves_existing_state() {
    let manager = UserParamsManager::default();
    manager.set_params("u1", &UserParamsPatch {
        alpha: Some(1.7),
        ..Default::default()
    });

    let mut wrong_version = manager.export_user("u1").unwrap();
    wrong_version.version = USER_PARAMS_STATE_VERSION + 1;
    wrong_version.params.alpha = 0.5;
    assert!(!manager.import_user("u1", wrong_version));

    let mut out_of_bounds = UserParamsState::default();
    out_of_bounds.params.alpha = 99.0;
    assert!(!manager.import_user("u1", out_of_bounds));

    assert!(!manager.import_user_json("u1", &serde_json::json!({ "version": 1, "params": "nope" })));
    assert_eq!(manager.get_params("u1").alpha, 1.7);
}

#[test]
fn import_user_json_accepts_exported_snapshot() {
    let manager = UserParamsManager::default();
    manager.set_params("u1", &UserParamsPatch {
        fatigue_k: Some(0.1),
        ..Default::default()
    });
    let json = serde_json::to_value(manager.export_user("u1").unwrap()).unwrap();

    let other = UserParamsManager::default();
    assert!(other.import_user_json("u2", &json));
    assert_eq!(other.get_params("u2").fatigue_k, 0.1);
}

#[test]
fn stats_summary_aggregates_users() {
    let manager = UserParamsManager::default();
    manager.set_params("a", &UserParamsPatch {
        alpha: Some(0.5),
        ..Default::default()
    });
    manager.set_params("b", &UserParamsPatch {
        alpha: Some(1.5),
        ..Default::default()
    });
    let stats = manager.stats_summary();
    assert_eq!(stats.user_count, 2);
    assert!((stats.alpha.mean - 1.0).abs() < 1e-9);
    assert!((stats.alpha.std - 0.5).abs() < 1e-9);
    assert!((stats.avg_optimal_difficulty - 0.5).abs() < 1e-9);
}

#[test]
fn empty_manager_reports_zero_stats() {
    let stats = UserParamsManager::default().stats_summary();
    assert_eq!(stats.user_count, 0);
    assert_eq!(stats.total_updates, 0);
}

#[test]
fn auto_adjust_can_be_disabled() {
    let manager = UserParamsManager::new(UserParamsConfig {
        min_update_interval_ms: 0,
        enable_auto_adjust: false,
        ..Default::default()
    });
    for t in 0..100 {
        manager.update_params_at("u", &good_feedback(), t);
    }
    let params = manager.get_params("u");
    assert_eq!(params.optimal_difficulty, 0.5);
    assert_eq!(params.update_count, 100);
}

#[test]
fn rising_fatigue_raises_fatigue_k() {
    let manager = manager_without_rate_limit();
    let tiring = ParamsFeedback {
        accuracy: 0.7,
        fatigue_change: 0.3,
        motivation_change: 0.0,
        reward: 0.0,
    };
    for t in 0..20 {
        manager.update_params_at("u", &tiring, t);
    }
    assert!(manager.get_params("u").fatigue_k > 0.05);
}

#[test]
fn apply_optimized_maps_dimensions_by_name() {
    let manager = UserParamsManager::default();
    let space = default_user_param_space();
    let params = manager.apply_optimized("u", &[1.2, 0.08, 0.7, 0.65], &space);
    assert_eq!(params.alpha, 1.2);
    assert_eq!(params.fatigue_k, 0.08);
    assert_eq!(params.motivation_rho, 0.7);
    assert_eq!(params.optimal_difficulty, 0.65);
}

#[test]
fn concurrent_updates_and_cleanup_never_tear_state() {
    let manager = Arc::new(UserParamsManager::new(UserParamsConfig {
        min_update_interval_ms: 0,
        max_users: 8,
        ..Default::default()
    }));

    let mut handles = Vec::new();
    for worker in 0..4 {
        let manager = Arc::clone(&manager);
        handles.push(std::thread::spawn(move || {
            for i in 0..200 {
                let user = format!("user-{}", (worker * 200 + i) % 16);
                manager.update_params(&user, &good_feedback());
                let params = manager.get_params(&user);
                assert!(params.alpha.is_finite() && params.optimal_difficulty <= 0.8);
                if i % 50 == 0 {
                    manager.cleanup();
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    manager.cleanup();
    assert!(manager.user_count() <= 8);
}

#[tokio::test]
async fn async_variants_match_sync_behaviour() {
    let manager = manager_without_rate_limit();
    let params = manager
        .set_params_async("u", &UserParamsPatch {
            optimal_difficulty: Some(0.3),
            ..Default::default()
        })
        .await;
    assert_eq!(params.optimal_difficulty, 0.3);
    assert!(manager.update_params_async("u", &good_feedback()).await);
    assert_eq!(manager.get_params_async("u").await.update_count, 1);
    assert_eq!(manager.cleanup_async().await, 0);
}
