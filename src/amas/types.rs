use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Easy,
    #[default]
    Mid,
    Hard,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Mid => "mid",
            Self::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "easy" => Self::Easy,
            "hard" => Self::Hard,
            _ => Self::Mid,
        }
    }

    pub fn easier(&self) -> Self {
        match self {
            Self::Hard => Self::Mid,
            _ => Self::Easy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveProfile {
    pub mem: f64,
    pub speed: f64,
    #[serde(default = "default_stability")]
    pub stability: f64,
}

fn default_stability() -> f64 {
    0.5
}

impl Default for CognitiveProfile {
    fn default() -> Self {
        Self {
            mem: 0.5,
            speed: 0.5,
            stability: 0.5,
        }
    }
}

/// Cognitive snapshot the policies read: attention, fatigue, cognition, motivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    #[serde(rename = "A")]
    pub attention: f64,
    #[serde(rename = "F")]
    pub fatigue: f64,
    #[serde(rename = "C")]
    pub cognitive: CognitiveProfile,
    #[serde(rename = "M")]
    pub motivation: f64,
}

impl Default for UserState {
    fn default() -> Self {
        Self {
            attention: 0.7,
            fatigue: 0.0,
            cognitive: CognitiveProfile::default(),
            motivation: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub interval_scale: f64,
    pub new_ratio: f64,
    pub difficulty: DifficultyLevel,
    pub batch_size: i32,
    pub hint_level: i32,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            interval_scale: 1.0,
            new_ratio: 0.2,
            difficulty: DifficultyLevel::Mid,
            batch_size: 8,
            hint_level: 1,
        }
    }
}

impl StrategyParams {
    /// Overlays the fields an evaluation asked to change, keeping everything in range.
    pub fn apply_adjustments(&self, adjustments: &StrategyAdjustments) -> Self {
        let mut result = self.clone();
        if let Some(difficulty) = adjustments.difficulty {
            result.difficulty = difficulty;
        }
        if let Some(scale) = adjustments.interval_scale {
            result.interval_scale = scale.clamp(0.5, 1.5);
        }
        if let Some(ratio) = adjustments.new_ratio {
            result.new_ratio = ratio.clamp(0.05, 0.5);
        }
        if let Some(batch) = adjustments.batch_size {
            result.batch_size = batch.clamp(5, 16);
        }
        if let Some(hint) = adjustments.hint_level {
            result.hint_level = hint.clamp(0, 2);
        }
        result
    }
}

/// Partial strategy override suggested by the multi-objective evaluator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StrategyAdjustments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<DifficultyLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint_level: Option<i32>,
}

impl StrategyAdjustments {
    pub fn is_empty(&self) -> bool {
        self.difficulty.is_none()
            && self.interval_scale.is_none()
            && self.new_ratio.is_none()
            && self.batch_size.is_none()
            && self.hint_level.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    Exam,
    #[default]
    Daily,
    Travel,
    Custom,
}

impl LearningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exam => "exam",
            Self::Daily => "daily",
            Self::Travel => "travel",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exam" => Some(Self::Exam),
            "daily" => Some(Self::Daily),
            "travel" => Some(Self::Travel),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryObjective {
    Accuracy,
    #[default]
    Retention,
    Efficiency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningObjectives {
    pub mode: LearningMode,
    pub primary_objective: PrimaryObjective,
    pub weight_short_term: f64,
    pub weight_long_term: f64,
    pub weight_efficiency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_accuracy: Option<f64>,
    /// Minutes per day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_daily_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_retention: Option<f64>,
}

impl Default for LearningObjectives {
    fn default() -> Self {
        crate::amas::optimization::MultiObjectiveOptimizer::preset_mode(LearningMode::Daily)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiObjectiveMetrics {
    pub short_term_score: f64,
    pub long_term_score: f64,
    pub efficiency_score: f64,
    pub aggregated_score: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintViolation {
    pub constraint: String,
    pub expected: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintCheck {
    pub satisfied: bool,
    pub violations: Vec<ConstraintViolation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveEvaluation {
    pub metrics: MultiObjectiveMetrics,
    pub constraints_satisfied: bool,
    pub constraint_violations: Vec<ConstraintViolation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_adjustments: Option<StrategyAdjustments>,
}

/// Raw session signals fed into `MultiObjectiveOptimizer::evaluate_strategy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSessionMetrics {
    pub accuracy: f64,
    pub response_time_ms: f64,
    pub retention: f64,
    pub review_success: f64,
    pub stability: f64,
    pub words_per_minute: f64,
    pub time_utilization: f64,
    pub cognitive_load: f64,
}

impl Default for RawSessionMetrics {
    fn default() -> Self {
        Self {
            accuracy: 0.7,
            response_time_ms: 3000.0,
            retention: 0.7,
            review_success: 0.7,
            stability: 0.5,
            words_per_minute: 4.0,
            time_utilization: 0.7,
            cognitive_load: 0.7,
        }
    }
}
