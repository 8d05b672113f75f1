use serde::{Deserialize, Serialize};

use super::pattern::RejectionReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Pending,
    Confirmed,
    Rejected,
    Executed,
    Undone,
    Ignored,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Pending => "pending",
            PredictionStatus::Confirmed => "confirmed",
            PredictionStatus::Rejected => "rejected",
            PredictionStatus::Executed => "executed",
            PredictionStatus::Undone => "undone",
            PredictionStatus::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PredictionStatus::Pending),
            "confirmed" => Some(PredictionStatus::Confirmed),
            "rejected" => Some(PredictionStatus::Rejected),
            "executed" => Some(PredictionStatus::Executed),
            "undone" => Some(PredictionStatus::Undone),
            "ignored" => Some(PredictionStatus::Ignored),
            _ => None,
        }
    }

    /// Pending predictions accept user decisions; executed ones can still
    /// be undone. Everything else is settled.
    pub fn is_open(&self) -> bool {
        matches!(self, PredictionStatus::Pending)
    }
}

/// The user-facing instance of a suggested or active pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: i64,
    pub pattern_id: i64,
    pub status: PredictionStatus,
    /// Confidence of the pattern at the moment the prediction was opened.
    pub confidence: f64,
    pub rejection_reason: Option<RejectionReason>,
    pub created_at: i64,
    pub decided_at: Option<i64>,
}
