use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    TimeBased,
    EventChain,
    Correlation,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::TimeBased => "time_based",
            PatternType::EventChain => "event_chain",
            PatternType::Correlation => "correlation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "time_based" => Some(PatternType::TimeBased),
            "event_chain" => Some(PatternType::EventChain),
            "correlation" => Some(PatternType::Correlation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternStatus {
    Observed,
    Suggested,
    Active,
    Disabled,
    Rejected,
    Insight,
}

impl PatternStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternStatus::Observed => "observed",
            PatternStatus::Suggested => "suggested",
            PatternStatus::Active => "active",
            PatternStatus::Disabled => "disabled",
            PatternStatus::Rejected => "rejected",
            PatternStatus::Insight => "insight",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "observed" => Some(PatternStatus::Observed),
            "suggested" => Some(PatternStatus::Suggested),
            "active" => Some(PatternStatus::Active),
            "disabled" => Some(PatternStatus::Disabled),
            "rejected" => Some(PatternStatus::Rejected),
            "insight" => Some(PatternStatus::Insight),
            _ => None,
        }
    }

    /// Legal transitions. Disabled/rejected are reachable from any status;
    /// promotion only moves observed→suggested→active. Reactivation is the
    /// only path out of rejected.
    pub fn can_transition_to(&self, next: PatternStatus) -> bool {
        use PatternStatus::*;
        if *self == next {
            return true;
        }
        match next {
            Disabled | Rejected => true,
            Suggested => matches!(self, Observed | Rejected),
            Active => matches!(self, Suggested),
            Observed => matches!(self, Rejected),
            Insight => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekdayFilter {
    Weekdays,
    Weekends,
    All,
}

impl WeekdayFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeekdayFilter::Weekdays => "weekdays",
            WeekdayFilter::Weekends => "weekends",
            WeekdayFilter::All => "all",
        }
    }

    /// Whether the filter admits a day; holidays count as weekend days.
    pub fn applies_on(&self, weekendish: bool) -> bool {
        match self {
            WeekdayFilter::Weekdays => !weekendish,
            WeekdayFilter::Weekends => weekendish,
            WeekdayFilter::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Coincidence,
    Unwanted,
    WrongDetection,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Coincidence => "coincidence",
            RejectionReason::Unwanted => "unwanted",
            RejectionReason::WrongDetection => "wrong_detection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "coincidence" => Some(RejectionReason::Coincidence),
            "unwanted" => Some(RejectionReason::Unwanted),
            "wrong_detection" => Some(RejectionReason::WrongDetection),
            _ => None,
        }
    }

    /// Unwanted / wrong-detection rejections suppress equivalent patterns
    /// from being re-mined; a coincidence does not.
    pub fn suppresses_remining(&self) -> bool {
        !matches!(self, RejectionReason::Coincidence)
    }
}

/// Type-specific payload, stored as a JSON blob in the patterns table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PatternData {
    // Time-based
    pub avg_hour: Option<u32>,
    pub avg_minute: Option<u32>,
    pub time_window_min: Option<u32>,
    pub weekday_filter: Option<WeekdayFilter>,
    pub sun_relative_elevation: Option<f64>,
    pub distinct_days: Option<u32>,

    // Event-chain / correlation
    pub avg_delay_sec: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: i64,
    pub pattern_type: PatternType,
    pub room_id: String,
    pub domain: String,
    pub entity_id: String,
    pub target_state: String,
    /// Empty for time-based patterns.
    pub trigger_entity: String,
    pub trigger_state: String,
    pub pattern_data: PatternData,
    pub confidence: f64,
    pub match_count: i64,
    pub status: PatternStatus,
    pub test_mode: bool,
    pub rejection_reason: Option<RejectionReason>,
    pub last_observed: i64,
    pub created_at: i64,
}
