use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use danci_amas::amas::config::BayesianOptimizerConfig;
use danci_amas::amas::decision::{DecisionContext, DecisionPolicy, FatigueBasedPolicy};
use danci_amas::amas::optimization::{BayesianOptimizer, MultiObjectiveOptimizer};
use danci_amas::amas::params::{ParamsFeedback, UserParamsManager};
use danci_amas::amas::types::{DifficultyLevel, LearningObjectives, RawSessionMetrics, UserState};
use danci_amas::compute::task::{BayesianSuggestPayload, LinUCBUpdatePayload};
use danci_amas::compute::{
    execute_routed, BanditModel, ComputePool, ComputePoolManager, ComputeResult, ComputeTask,
    SmartRouter,
};
use danci_amas::config::Config;
use danci_amas::logging::init_tracing;

const BANDIT_FEATURES: usize = 4;

fn difficulty_value(level: DifficultyLevel) -> f64 {
    match level {
        DifficultyLevel::Easy => 0.3,
        DifficultyLevel::Mid => 0.5,
        DifficultyLevel::Hard => 0.7,
    }
}

async fn next_suggestion(
    router: &SmartRouter,
    pool: Option<&ComputePool>,
    optimizer: &mut BayesianOptimizer,
    config: &BayesianOptimizerConfig,
) -> Vec<f64> {
    let task = ComputeTask::BayesianSuggest(BayesianSuggestPayload {
        config: config.clone(),
        state: Some(optimizer.state()),
        count: 1,
    });
    match execute_routed(router, pool, task).await {
        Ok(ComputeResult::BayesianSuggest(mut points)) if !points.is_empty() => points.swap_remove(0),
        Ok(other) => {
            warn!(result = other.kind(), "Unexpected suggestion result, suggesting locally");
            optimizer.suggest_next()
        }
        Err(err) => {
            warn!(error = %err, "Routed suggestion failed, suggesting locally");
            optimizer.suggest_next()
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let sim = config.simulation.clone();
    info!(
        users = sim.users,
        events_per_user = sim.events_per_user,
        seed = sim.seed,
        "amas-sim starting"
    );

    let params = UserParamsManager::new(config.amas.user_params.clone());
    let router = SmartRouter::new();
    router.enable_stats(true);
    let pools = ComputePoolManager::new();
    let pool = match pools.get_or_init(Some(config.amas.compute_pool.clone())) {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!(error = %err, "Compute pool unavailable, running everything in process");
            None
        }
    };

    let policy = FatigueBasedPolicy::new();
    let objectives = LearningObjectives::default();
    let mut rng = ChaCha8Rng::seed_from_u64(sim.seed);
    let mut bandit = BanditModel::new(BANDIT_FEATURES, 0.3, 1.0);
    let mut optimizer = BayesianOptimizer::new(BayesianOptimizerConfig {
        seed: Some(sim.seed),
        ..config.amas.bayesian.clone()
    });
    let mut point = optimizer.suggest_next();
    let mut context: Option<DecisionContext> = None;
    let clock_start = Utc::now().timestamp_millis();

    for user in 0..sim.users {
        let user_id = format!("sim-user-{user}");
        let user_params = params.apply_optimized(&user_id, &point, optimizer.param_space());
        let ability: f64 = rng.gen_range(0.45..0.95);

        let mut state = UserState::default();
        let mut elapsed_ms = 0.0_f64;
        let mut correct_count = 0usize;

        for _ in 0..sim.events_per_user {
            let strategy = policy.decide(&state, context.as_ref());
            let difficulty = difficulty_value(strategy.difficulty);
            let p_correct = (ability - (difficulty - user_params.optimal_difficulty).max(0.0)
                - 0.3 * state.fatigue)
                .clamp(0.05, 0.98);
            let correct = rng.gen_bool(p_correct);
            let response_time_ms = rng.gen_range(1500.0..6000.0) * (1.0 + state.fatigue);
            elapsed_ms += response_time_ms;
            if correct {
                correct_count += 1;
            }

            let fatigue_before = state.fatigue;
            let motivation_before = state.motivation;
            state.fatigue = (state.fatigue + user_params.fatigue_k * (1.0 - state.fatigue)).clamp(0.0, 1.0);
            state.attention = (1.0 - 0.6 * state.fatigue).clamp(0.0, 1.0);
            let outcome = if correct { 1.0 } else { -1.0 };
            state.motivation = (user_params.motivation_rho * state.motivation
                + (1.0 - user_params.motivation_rho) * outcome)
                .clamp(-1.0, 1.0);

            let reward = if correct { 1.0 } else { -0.5 };
            let now = clock_start + elapsed_ms as i64;
            params.update_params_at(
                &user_id,
                &ParamsFeedback {
                    accuracy: if correct { 1.0 } else { 0.0 },
                    fatigue_change: state.fatigue - fatigue_before,
                    motivation_change: state.motivation - motivation_before,
                    reward,
                },
                now,
            );

            let task = ComputeTask::LinUCBUpdate(LinUCBUpdatePayload {
                model: bandit.clone(),
                feature: vec![state.attention, state.fatigue, state.motivation, difficulty],
                reward,
            });
            match execute_routed(&router, pool.as_deref(), task).await {
                Ok(ComputeResult::LinUCBUpdate(model)) => bandit = model,
                Ok(other) => warn!(result = other.kind(), "Unexpected bandit update result"),
                Err(err) => warn!(error = %err, "Bandit update skipped"),
            }
        }

        let events = sim.events_per_user.max(1) as f64;
        let performance = params.get_performance(&user_id).unwrap_or_default();
        let raw = RawSessionMetrics {
            accuracy: correct_count as f64 / events,
            response_time_ms: elapsed_ms / events,
            retention: performance.recent_accuracy,
            review_success: correct_count as f64 / events,
            stability: 1.0 - state.fatigue,
            words_per_minute: if elapsed_ms > 0.0 { events / (elapsed_ms / 60_000.0) } else { 0.0 },
            time_utilization: state.attention,
            cognitive_load: state.fatigue,
        };
        let evaluation = MultiObjectiveOptimizer::evaluate_strategy(&raw, &state, &objectives, elapsed_ms);
        info!(
            user_id = %user_id,
            aggregated = evaluation.metrics.aggregated_score,
            constraints_satisfied = evaluation.constraints_satisfied,
            violations = evaluation.constraint_violations.len(),
            "Session evaluated"
        );
        context = evaluation
            .suggested_adjustments
            .clone()
            .map(DecisionContext::with_adjustments);

        if let Err(err) = optimizer.record_evaluation(&point, evaluation.metrics.aggregated_score) {
            warn!(error = %err, "Optimizer rejected session score");
        }
        if optimizer.should_stop() {
            info!(evaluations = optimizer.evaluation_count(), "Optimizer budget exhausted");
            break;
        }

        let suggest_config = BayesianOptimizerConfig {
            seed: Some(sim.seed.wrapping_add(user as u64 + 1)),
            ..config.amas.bayesian.clone()
        };
        point = next_suggestion(&router, pool.as_deref(), &mut optimizer, &suggest_config).await;
    }

    if let Some(best) = optimizer.best() {
        info!(
            score = best.value,
            params = ?optimizer.params_to_object(&best.params),
            "Best parameters found"
        );
    }
    let summary = params.stats_summary();
    info!(
        users = summary.user_count,
        avg_accuracy = summary.avg_recent_accuracy,
        avg_difficulty = summary.avg_optimal_difficulty,
        total_updates = summary.total_updates,
        "User params summary"
    );
    if let Some(stats) = router.get_stats() {
        info!(
            native = stats.total.native,
            in_process = stats.total.in_process,
            "Routing summary"
        );
    }
    let pool_stats = pools.stats();
    info!(
        completed = pool_stats.completed,
        failed = pool_stats.failed,
        avg_run_ms = pool_stats.run_time_ms,
        "Compute pool summary"
    );

    drop(pool);
    pools.destroy();
    info!("amas-sim finished");
}
