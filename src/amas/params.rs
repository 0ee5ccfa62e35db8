use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::amas::config::UserParamsConfig;
use crate::amas::optimization::bayesian::ParamBound;

pub const USER_PARAMS_STATE_VERSION: u32 = 1;

pub const ALPHA_BOUNDS: (f64, f64) = (0.3, 2.0);
pub const FATIGUE_K_BOUNDS: (f64, f64) = (0.02, 0.2);
pub const MOTIVATION_RHO_BOUNDS: (f64, f64) = (0.6, 0.95);
pub const OPTIMAL_DIFFICULTY_BOUNDS: (f64, f64) = (0.2, 0.8);

/// Clamps into `bounds`. Infinities snap to the matching bound, NaN keeps
/// `prior` (or the midpoint when the prior itself is unusable).
pub fn clamp_param(value: f64, bounds: (f64, f64), prior: f64) -> f64 {
    let (min, max) = bounds;
    if value.is_nan() {
        return if prior.is_finite() {
            prior.clamp(min, max)
        } else {
            (min + max) / 2.0
        };
    }
    value.clamp(min, max)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParams {
    pub alpha: f64,
    pub fatigue_k: f64,
    pub motivation_rho: f64,
    pub optimal_difficulty: f64,
    pub update_count: u64,
    pub last_updated: i64,
}

impl Default for UserParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            fatigue_k: 0.05,
            motivation_rho: 0.9,
            optimal_difficulty: 0.5,
            update_count: 0,
            last_updated: 0,
        }
    }
}

impl UserParams {
    pub fn set_alpha(&mut self, value: f64) {
        self.alpha = clamp_param(value, ALPHA_BOUNDS, self.alpha);
    }

    pub fn set_fatigue_k(&mut self, value: f64) {
        self.fatigue_k = clamp_param(value, FATIGUE_K_BOUNDS, self.fatigue_k);
    }

    pub fn set_motivation_rho(&mut self, value: f64) {
        self.motivation_rho = clamp_param(value, MOTIVATION_RHO_BOUNDS, self.motivation_rho);
    }

    pub fn set_optimal_difficulty(&mut self, value: f64) {
        self.optimal_difficulty =
            clamp_param(value, OPTIMAL_DIFFICULTY_BOUNDS, self.optimal_difficulty);
    }

    pub fn apply_patch(&mut self, patch: &UserParamsPatch) {
        if let Some(v) = patch.alpha {
            self.set_alpha(v);
        }
        if let Some(v) = patch.fatigue_k {
            self.set_fatigue_k(v);
        }
        if let Some(v) = patch.motivation_rho {
            self.set_motivation_rho(v);
        }
        if let Some(v) = patch.optimal_difficulty {
            self.set_optimal_difficulty(v);
        }
    }

    fn within_bounds(&self) -> bool {
        let inside = |v: f64, (min, max): (f64, f64)| v.is_finite() && v >= min && v <= max;
        inside(self.alpha, ALPHA_BOUNDS)
            && inside(self.fatigue_k, FATIGUE_K_BOUNDS)
            && inside(self.motivation_rho, MOTIVATION_RHO_BOUNDS)
            && inside(self.optimal_difficulty, OPTIMAL_DIFFICULTY_BOUNDS)
    }

    /// Named view matching `default_user_param_space()` dimension names.
    pub fn to_named(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("alpha".to_string(), self.alpha),
            ("fatigueK".to_string(), self.fatigue_k),
            ("motivationRho".to_string(), self.motivation_rho),
            ("optimalDifficulty".to_string(), self.optimal_difficulty),
        ])
    }
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParamsPatch {
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub fatigue_k: Option<f64>,
    #[serde(default)]
    pub motivation_rho: Option<f64>,
    #[serde(default)]
    pub optimal_difficulty: Option<f64>,
}

impl UserParamsPatch {
    pub fn from_named(values: &BTreeMap<String, f64>) -> Self {
        let pick = |names: &[&str]| names.iter().find_map(|n| values.get(*n).copied());
        Self {
            alpha: pick(&["alpha"]),
            fatigue_k: pick(&["fatigueK", "fatigue_k"]),
            motivation_rho: pick(&["motivationRho", "motivation_rho"]),
            optimal_difficulty: pick(&["optimalDifficulty", "optimal_difficulty"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPerformance {
    pub recent_accuracy: f64,
    pub fatigue_slope: f64,
    pub motivation_trend: f64,
    pub recent_reward: f64,
    pub sample_count: u64,
}

impl Default for UserPerformance {
    fn default() -> Self {
        Self {
            recent_accuracy: 0.7,
            fatigue_slope: 0.0,
            motivation_trend: 0.0,
            recent_reward: 0.0,
            sample_count: 0,
        }
    }
}

impl UserPerformance {
    fn is_finite(&self) -> bool {
        self.recent_accuracy.is_finite()
            && self.fatigue_slope.is_finite()
            && self.motivation_trend.is_finite()
            && self.recent_reward.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParamsState {
    pub version: u32,
    pub params: UserParams,
    pub performance: UserPerformance,
}

impl Default for UserParamsState {
    fn default() -> Self {
        Self {
            version: USER_PARAMS_STATE_VERSION,
            params: UserParams::default(),
            performance: UserPerformance::default(),
        }
    }
}

impl UserParamsState {
    pub fn is_valid(&self) -> bool {
        self.version == USER_PARAMS_STATE_VERSION
            && self.params.within_bounds()
            && self.performance.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsFeedback {
    pub accuracy: f64,
    pub fatigue_change: f64,
    pub motivation_change: f64,
    pub reward: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamStat {
    pub mean: f64,
    pub std: f64,
}

impl ParamStat {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: variance.max(0.0).sqrt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParamsStats {
    pub user_count: usize,
    pub alpha: ParamStat,
    pub fatigue_k: ParamStat,
    pub motivation_rho: ParamStat,
    pub optimal_difficulty: ParamStat,
    pub avg_recent_accuracy: f64,
    pub avg_optimal_difficulty: f64,
    pub total_updates: u64,
}

struct UserEntry {
    state: UserParamsState,
    last_feedback_at: Option<i64>,
    last_access: AtomicI64,
}

impl UserEntry {
    fn new(state: UserParamsState, now: i64) -> Self {
        Self {
            state,
            last_feedback_at: None,
            last_access: AtomicI64::new(now),
        }
    }

    fn touch(&self, now: i64) {
        self.last_access.fetch_max(now, Ordering::Relaxed);
    }
}

/// One EMA step; `None` when the step would not be finite.
fn ema_step(current: f64, observed: f64, alpha: f64) -> Option<f64> {
    let delta = alpha * (observed - current);
    let next = current + delta;
    (delta.is_finite() && next.is_finite()).then_some(next)
}

/// Owns per-user hyperparameters and adapts them from answer feedback.
///
/// All methods take `&self`; a single `RwLock` guards the map so `cleanup`
/// never observes a half-written user.
pub struct UserParamsManager {
    config: UserParamsConfig,
    users: RwLock<HashMap<String, UserEntry>>,
}

impl Default for UserParamsManager {
    fn default() -> Self {
        Self::new(UserParamsConfig::default())
    }
}

impl UserParamsManager {
    pub fn new(config: UserParamsConfig) -> Self {
        Self {
            config: config.validated(),
            users: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &UserParamsConfig {
        &self.config
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.users.read().contains_key(user_id)
    }

    pub fn get_params(&self, user_id: &str) -> UserParams {
        let users = self.users.read();
        match users.get(user_id) {
            Some(entry) => {
                entry.touch(now_ms());
                entry.state.params.clone()
            }
            None => UserParams::default(),
        }
    }

    pub fn get_performance(&self, user_id: &str) -> Option<UserPerformance> {
        self.users
            .read()
            .get(user_id)
            .map(|entry| entry.state.performance.clone())
    }

    pub fn set_params(&self, user_id: &str, patch: &UserParamsPatch) -> UserParams {
        self.set_params_at(user_id, patch, now_ms())
    }

    pub fn set_params_at(&self, user_id: &str, patch: &UserParamsPatch, now: i64) -> UserParams {
        let mut users = self.users.write();
        let entry = users
            .entry(user_id.to_string())
            .or_insert_with(|| UserEntry::new(UserParamsState::default(), now));
        entry.state.params.apply_patch(patch);
        entry.state.params.last_updated = now;
        entry.touch(now);
        entry.state.params.clone()
    }

    /// Feeds one answer's feedback into the user's EMAs. Returns `false` when
    /// the update was dropped by the rate limiter or every value was non-finite.
    pub fn update_params(&self, user_id: &str, feedback: &ParamsFeedback) -> bool {
        self.update_params_at(user_id, feedback, now_ms())
    }

    pub fn update_params_at(&self, user_id: &str, feedback: &ParamsFeedback, now: i64) -> bool {
        let mut users = self.users.write();
        let entry = users
            .entry(user_id.to_string())
            .or_insert_with(|| UserEntry::new(UserParamsState::default(), now));
        entry.touch(now);

        if let Some(last) = entry.last_feedback_at {
            if now.saturating_sub(last) < self.config.min_update_interval_ms {
                debug!(user_id = %user_id, "Params update inside min interval, dropped");
                return false;
            }
        }

        let perf = &mut entry.state.performance;
        let updates = [
            (
                &mut perf.recent_accuracy,
                feedback.accuracy,
                self.config.accuracy_alpha,
            ),
            (
                &mut perf.fatigue_slope,
                feedback.fatigue_change,
                self.config.fatigue_alpha,
            ),
            (
                &mut perf.motivation_trend,
                feedback.motivation_change,
                self.config.motivation_alpha,
            ),
            (
                &mut perf.recent_reward,
                feedback.reward,
                self.config.reward_alpha,
            ),
        ];

        let mut applied = 0;
        for (current, observed, alpha) in updates {
            match ema_step(*current, observed, alpha) {
                Some(next) => {
                    *current = next;
                    applied += 1;
                }
                None => {
                    warn!(user_id = %user_id, observed, "Rejected non-finite feedback value");
                }
            }
        }

        if applied == 0 {
            return false;
        }

        perf.sample_count += 1;
        entry.last_feedback_at = Some(now);

        let state = &mut entry.state;
        if self.config.enable_auto_adjust {
            self.auto_adjust(state);
        }
        state.params.update_count += 1;
        state.params.last_updated = now;
        true
    }

    fn auto_adjust(&self, state: &mut UserParamsState) {
        let cfg = &self.config;
        let perf = &state.performance;
        let params = &mut state.params;

        if perf.fatigue_slope < cfg.fast_recovery_threshold
            && perf.recent_accuracy > cfg.high_accuracy_threshold
        {
            params.set_optimal_difficulty(params.optimal_difficulty + cfg.difficulty_step);
        } else if perf.recent_accuracy < cfg.low_accuracy_threshold {
            params.set_optimal_difficulty(params.optimal_difficulty - cfg.difficulty_step);
        }

        if perf.fatigue_slope > cfg.fatigue_rise_threshold {
            params.set_fatigue_k(params.fatigue_k + cfg.fatigue_k_step);
        } else if perf.fatigue_slope < cfg.fast_recovery_threshold {
            params.set_fatigue_k(params.fatigue_k - cfg.fatigue_k_step);
        }

        if perf.motivation_trend < -0.05 {
            params.set_motivation_rho(params.motivation_rho - cfg.motivation_rho_step);
        } else if perf.motivation_trend > 0.05 {
            params.set_motivation_rho(params.motivation_rho + cfg.motivation_rho_step);
        }

        if perf.recent_reward < cfg.low_reward_threshold {
            params.set_alpha(params.alpha + cfg.alpha_step);
        } else if perf.recent_reward > cfg.high_reward_threshold {
            params.set_alpha(params.alpha - cfg.alpha_step);
        }
    }

    /// Writes an optimizer point back into the user's params by dimension name.
    pub fn apply_optimized(&self, user_id: &str, values: &[f64], space: &[ParamBound]) -> UserParams {
        let named: BTreeMap<String, f64> = space
            .iter()
            .zip(values.iter())
            .map(|(bound, &v)| (bound.name.clone(), v))
            .collect();
        self.set_params(user_id, &UserParamsPatch::from_named(&named))
    }

    pub fn reset_params(&self, user_id: &str) {
        let now = now_ms();
        let mut users = self.users.write();
        users.insert(user_id.to_string(), UserEntry::new(UserParamsState::default(), now));
    }

    pub fn remove_user(&self, user_id: &str) -> bool {
        self.users.write().remove(user_id).is_some()
    }

    pub fn batch_update(&self, patches: &HashMap<String, UserParamsPatch>) -> usize {
        let now = now_ms();
        for (user_id, patch) in patches {
            self.set_params_at(user_id, patch, now);
        }
        patches.len()
    }

    pub fn export_user(&self, user_id: &str) -> Option<UserParamsState> {
        self.users.read().get(user_id).map(|entry| entry.state.clone())
    }

    pub fn export_all(&self) -> HashMap<String, UserParamsState> {
        self.users
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.state.clone()))
            .collect()
    }

    /// Replaces one user's state. Invalid snapshots are rejected without touching
    /// any existing state.
    pub fn import_user(&self, user_id: &str, state: UserParamsState) -> bool {
        if !state.is_valid() {
            warn!(user_id = %user_id, version = state.version, "Rejected invalid user params state");
            return false;
        }
        let now = now_ms();
        self.users
            .write()
            .insert(user_id.to_string(), UserEntry::new(state, now));
        true
    }

    pub fn import_user_json(&self, user_id: &str, value: &serde_json::Value) -> bool {
        match serde_json::from_value::<UserParamsState>(value.clone()) {
            Ok(state) => self.import_user(user_id, state),
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Malformed user params snapshot");
                false
            }
        }
    }

    /// Imports every valid snapshot and returns how many were accepted.
    pub fn import_all(&self, states: HashMap<String, UserParamsState>) -> usize {
        let now = now_ms();
        let mut users = self.users.write();
        let mut imported = 0;
        for (user_id, state) in states {
            if state.is_valid() {
                users.insert(user_id, UserEntry::new(state, now));
                imported += 1;
            } else {
                warn!(user_id = %user_id, "Skipped invalid user params state during import");
            }
        }
        imported
    }

    pub fn stats_summary(&self) -> UserParamsStats {
        let users = self.users.read();
        if users.is_empty() {
            return UserParamsStats::default();
        }

        let states: Vec<&UserParamsState> = users.values().map(|e| &e.state).collect();
        let collect = |f: fn(&UserParamsState) -> f64| states.iter().map(|s| f(s)).collect::<Vec<_>>();

        let difficulty = ParamStat::from_values(&collect(|s| s.params.optimal_difficulty));
        let accuracy = ParamStat::from_values(&collect(|s| s.performance.recent_accuracy));

        UserParamsStats {
            user_count: states.len(),
            alpha: ParamStat::from_values(&collect(|s| s.params.alpha)),
            fatigue_k: ParamStat::from_values(&collect(|s| s.params.fatigue_k)),
            motivation_rho: ParamStat::from_values(&collect(|s| s.params.motivation_rho)),
            optimal_difficulty: difficulty,
            avg_recent_accuracy: accuracy.mean,
            avg_optimal_difficulty: difficulty.mean,
            total_updates: states.iter().map(|s| s.params.update_count).sum(),
        }
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(now_ms())
    }

    /// Drops users idle for longer than the TTL, then trims the least recently
    /// accessed users until at most `max_users` remain.
    pub fn cleanup_at(&self, now: i64) -> usize {
        let mut users = self.users.write();
        let before = users.len();
        let ttl = self.config.ttl_ms;

        users.retain(|_, entry| now.saturating_sub(entry.last_access.load(Ordering::Relaxed)) <= ttl);
        let expired = before - users.len();

        let mut evicted = 0;
        if users.len() > self.config.max_users {
            let mut by_access: Vec<(String, i64)> = users
                .iter()
                .map(|(id, entry)| (id.clone(), entry.last_access.load(Ordering::Relaxed)))
                .collect();
            by_access.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let excess = users.len() - self.config.max_users;
            for (id, _) in by_access.into_iter().take(excess) {
                users.remove(&id);
                evicted += 1;
            }
        }

        if expired + evicted > 0 {
            info!(expired, evicted, remaining = users.len(), "User params cleanup");
        }
        expired + evicted
    }

    pub async fn get_params_async(&self, user_id: &str) -> UserParams {
        self.get_params(user_id)
    }

    pub async fn set_params_async(&self, user_id: &str, patch: &UserParamsPatch) -> UserParams {
        self.set_params(user_id, patch)
    }

    pub async fn update_params_async(&self, user_id: &str, feedback: &ParamsFeedback) -> bool {
        self.update_params(user_id, feedback)
    }

    pub async fn cleanup_async(&self) -> usize {
        self.cleanup()
    }
}
