use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
    Off,
    Inherit,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
            Sensitivity::Off => "off",
            Sensitivity::Inherit => "inherit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Sensitivity::Low),
            "medium" => Some(Sensitivity::Medium),
            "high" => Some(Sensitivity::High),
            "off" => Some(Sensitivity::Off),
            "inherit" => Some(Sensitivity::Inherit),
            _ => None,
        }
    }

    /// Sigma multiplier for value-deviation checks. Lower sensitivity
    /// tolerates wider excursions.
    pub fn sigma_multiplier(&self) -> Option<f64> {
        match self {
            Sensitivity::Low => Some(4.0),
            Sensitivity::Medium => Some(3.0),
            Sensitivity::High => Some(2.0),
            Sensitivity::Off => None,
            Sensitivity::Inherit => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    Offline,
    Stuck,
    ValueDeviation,
    Frequency,
    PatternDeviation,
}

impl DetectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionType::Offline => "offline",
            DetectionType::Stuck => "stuck",
            DetectionType::ValueDeviation => "value_deviation",
            DetectionType::Frequency => "frequency",
            DetectionType::PatternDeviation => "pattern_deviation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "offline" => Some(DetectionType::Offline),
            "stuck" => Some(DetectionType::Stuck),
            "value_deviation" => Some(DetectionType::ValueDeviation),
            "frequency" => Some(DetectionType::Frequency),
            "pattern_deviation" => Some(DetectionType::PatternDeviation),
            _ => None,
        }
    }

    pub fn all() -> [DetectionType; 5] {
        [
            DetectionType::Offline,
            DetectionType::Stuck,
            DetectionType::ValueDeviation,
            DetectionType::Frequency,
            DetectionType::PatternDeviation,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalySeverity::Low => "low",
            AnomalySeverity::Medium => "medium",
            AnomalySeverity::High => "high",
            AnomalySeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(AnomalySeverity::Low),
            "medium" => Some(AnomalySeverity::Medium),
            "high" => Some(AnomalySeverity::High),
            "critical" => Some(AnomalySeverity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReaction {
    Log,
    Push,
    PushTts,
    PushTtsAction,
}

impl AnomalyReaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyReaction::Log => "log",
            AnomalyReaction::Push => "push",
            AnomalyReaction::PushTts => "push_tts",
            AnomalyReaction::PushTtsAction => "push_tts_action",
        }
    }

    pub fn notifies(&self) -> bool {
        !matches!(self, AnomalyReaction::Log)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyScope {
    Global,
    Room,
    Domain,
    Device,
}

impl AnomalyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyScope::Global => "global",
            AnomalyScope::Room => "room",
            AnomalyScope::Domain => "domain",
            AnomalyScope::Device => "device",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(AnomalyScope::Global),
            "room" => Some(AnomalyScope::Room),
            "domain" => Some(AnomalyScope::Domain),
            "device" => Some(AnomalyScope::Device),
            _ => None,
        }
    }
}

/// Per-severity reaction configuration, each with an optional debounce so a
/// quickly self-resolving condition produces nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionConfig {
    pub low: AnomalyReaction,
    pub medium: AnomalyReaction,
    pub high: AnomalyReaction,
    pub critical: AnomalyReaction,
    pub debounce_secs: u64,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            low: AnomalyReaction::Log,
            medium: AnomalyReaction::Push,
            high: AnomalyReaction::PushTts,
            critical: AnomalyReaction::PushTtsAction,
            debounce_secs: 60,
        }
    }
}

impl ReactionConfig {
    pub fn for_severity(&self, severity: AnomalySeverity) -> AnomalyReaction {
        match severity {
            AnomalySeverity::Low => self.low,
            AnomalySeverity::Medium => self.medium,
            AnomalySeverity::High => self.high,
            AnomalySeverity::Critical => self.critical,
        }
    }
}

/// Scoped anomaly configuration document. `Inherit` sensitivity on any
/// non-global scope defers resolution to the parent scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub scope: AnomalyScope,
    /// Room id, domain name or entity id depending on scope; empty for global.
    pub scope_key: String,
    pub sensitivity: Sensitivity,
    pub detection_types: HashSet<DetectionType>,
    pub reactions: ReactionConfig,
    pub offline_timeout_secs: u64,
    pub stuck_timeout_secs: u64,
    pub value_min: Option<f64>,
    pub value_max: Option<f64>,
    pub battery_floor: f64,
    pub whitelisted: bool,
    pub pause_until: Option<i64>,
}

impl AnomalyConfig {
    pub fn global_default() -> Self {
        Self {
            scope: AnomalyScope::Global,
            scope_key: String::new(),
            sensitivity: Sensitivity::Medium,
            detection_types: DetectionType::all().into_iter().collect(),
            reactions: ReactionConfig::default(),
            offline_timeout_secs: 24 * 3600,
            stuck_timeout_secs: 6 * 3600,
            value_min: None,
            value_max: None,
            battery_floor: 15.0,
            whitelisted: false,
            pause_until: None,
        }
    }

    pub fn inherit_for(scope: AnomalyScope, scope_key: &str) -> Self {
        Self {
            scope,
            scope_key: scope_key.to_string(),
            sensitivity: Sensitivity::Inherit,
            ..Self::global_default()
        }
    }
}

/// Extended detector settings that apply engine-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEngineSettings {
    pub enabled: bool,
    /// Seconds of history a baseline must span before deviations fire.
    pub baseline_learning_secs: u64,
    pub vacation_mode: bool,
    pub paused_until: Option<i64>,
}

impl Default for AnomalyEngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            baseline_learning_secs: 7 * 24 * 3600,
            vacation_mode: false,
            paused_until: None,
        }
    }
}

/// A persisted anomaly finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: i64,
    pub entity_id: String,
    pub detection_type: DetectionType,
    pub severity: AnomalySeverity,
    pub message: String,
    pub observed_value: Option<f64>,
    pub expected_low: Option<f64>,
    pub expected_high: Option<f64>,
    pub detected_at: i64,
    pub resolved_at: Option<i64>,
}
