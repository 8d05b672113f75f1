use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningPhase {
    Observing,
    Suggesting,
    Autonomous,
}

impl LearningPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningPhase::Observing => "observing",
            LearningPhase::Suggesting => "suggesting",
            LearningPhase::Autonomous => "autonomous",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "observing" => Some(LearningPhase::Observing),
            "suggesting" => Some(LearningPhase::Suggesting),
            "autonomous" => Some(LearningPhase::Autonomous),
            _ => None,
        }
    }

    /// Patterns surface (spawn predictions) only past observing.
    pub fn surfaces_patterns(&self) -> bool {
        !matches!(self, LearningPhase::Observing)
    }

    pub fn auto_executes(&self) -> bool {
        matches!(self, LearningPhase::Autonomous)
    }
}

/// Per (room, domain) trust state. Only the phase machine and an explicit
/// reset may mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningPhaseState {
    pub room_id: String,
    pub domain: String,
    pub phase: LearningPhase,
    pub confidence_score: f64,
    pub confirmed_count: i64,
    pub rejected_count: i64,
    pub updated_at: i64,
}

/// Global learning-speed preset; scales every scope's promotion thresholds,
/// never the transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningSpeed {
    Careful,
    Normal,
    Fast,
}

impl LearningSpeed {
    pub fn threshold_scale(&self) -> f64 {
        match self {
            LearningSpeed::Careful => 1.5,
            LearningSpeed::Normal => 1.0,
            LearningSpeed::Fast => 0.6,
        }
    }
}

impl Default for LearningSpeed {
    fn default() -> Self {
        LearningSpeed::Normal
    }
}
