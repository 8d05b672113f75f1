use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse time-of-day bucket attached to every state event at ingest time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Night,
    Morning,
    Forenoon,
    Afternoon,
    Evening,
    LateEvening,
}

impl TimeBucket {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=5 => TimeBucket::Night,
            6..=8 => TimeBucket::Morning,
            9..=11 => TimeBucket::Forenoon,
            12..=16 => TimeBucket::Afternoon,
            17..=20 => TimeBucket::Evening,
            _ => TimeBucket::LateEvening,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::Night => "night",
            TimeBucket::Morning => "morning",
            TimeBucket::Forenoon => "forenoon",
            TimeBucket::Afternoon => "afternoon",
            TimeBucket::Evening => "evening",
            TimeBucket::LateEvening => "late_evening",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "night" => Some(TimeBucket::Night),
            "morning" => Some(TimeBucket::Morning),
            "forenoon" => Some(TimeBucket::Forenoon),
            "afternoon" => Some(TimeBucket::Afternoon),
            "evening" => Some(TimeBucket::Evening),
            "late_evening" => Some(TimeBucket::LateEvening),
            _ => None,
        }
    }
}

/// A stored, immutable device state change with its ingest-time context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    pub id: i64,
    pub entity_id: String,
    pub old_state: String,
    pub new_state: String,
    pub attributes: HashMap<String, serde_json::Value>,
    pub timestamp: i64,
    pub time_bucket: TimeBucket,
    pub persons_home: Vec<String>,
}

/// An incoming state change before it has been written to the history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStateEvent {
    pub entity_id: String,
    pub old_state: Option<String>,
    pub new_state: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    pub timestamp: i64,
    #[serde(default)]
    pub persons_home: Vec<String>,
}

impl NewStateEvent {
    /// Missing states default to "unknown" rather than failing ingestion.
    pub fn old_state_or_unknown(&self) -> &str {
        self.old_state.as_deref().unwrap_or("unknown")
    }

    pub fn new_state_or_unknown(&self) -> &str {
        self.new_state.as_deref().unwrap_or("unknown")
    }

    /// HA entity ids are "<domain>.<object_id>".
    pub fn domain(&self) -> &str {
        entity_domain(&self.entity_id)
    }

    /// Numeric reading, if the new state parses as one.
    pub fn numeric_value(&self) -> Option<f64> {
        self.new_state.as_deref().and_then(|s| s.parse::<f64>().ok())
    }
}

pub fn entity_domain(entity_id: &str) -> &str {
    entity_id.split('.').next().unwrap_or("unknown")
}

/// Pure sensors cannot be actuated; a correlation between two of them is an
/// insight, not an actionable pattern.
pub fn is_sensor_entity(entity_id: &str) -> bool {
    matches!(entity_domain(entity_id), "sensor" | "binary_sensor")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_bucket_boundaries() {
        assert_eq!(TimeBucket::from_hour(0), TimeBucket::Night);
        assert_eq!(TimeBucket::from_hour(6), TimeBucket::Morning);
        assert_eq!(TimeBucket::from_hour(9), TimeBucket::Forenoon);
        assert_eq!(TimeBucket::from_hour(12), TimeBucket::Afternoon);
        assert_eq!(TimeBucket::from_hour(17), TimeBucket::Evening);
        assert_eq!(TimeBucket::from_hour(21), TimeBucket::LateEvening);
        assert_eq!(TimeBucket::from_hour(23), TimeBucket::LateEvening);
    }

    #[test]
    fn entity_domain_parsing() {
        assert_eq!(entity_domain("light.living_room"), "light");
        assert_eq!(entity_domain("binary_sensor.front_door"), "binary_sensor");
        assert_eq!(entity_domain("garbage"), "garbage");
        assert!(is_sensor_entity("sensor.outdoor_temp"));
        assert!(!is_sensor_entity("light.hallway"));
    }
}
