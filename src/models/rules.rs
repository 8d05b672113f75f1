use serde::{Deserialize, Serialize};

/// A user-authored trigger → action rule. Entities referenced here are
/// excluded from automatic mining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualRule {
    pub id: i64,
    pub trigger_entity: String,
    pub trigger_state: String,
    pub action_entity: String,
    pub action_service: String,
    pub delay_secs: Option<u64>,
    pub is_active: bool,
    pub execution_count: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewManualRule {
    pub trigger_entity: String,
    pub trigger_state: String,
    pub action_entity: String,
    pub action_service: String,
    pub delay_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    Entity,
    Room,
    Domain,
}

impl ExclusionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionKind::Entity => "entity",
            ExclusionKind::Room => "room",
            ExclusionKind::Domain => "domain",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entity" => Some(ExclusionKind::Entity),
            "room" => Some(ExclusionKind::Room),
            "domain" => Some(ExclusionKind::Domain),
            _ => None,
        }
    }
}

/// A pair that must never be mined together. The pair is unordered; storage
/// normalizes (a, b) with a <= b so duplicates are detectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternExclusion {
    pub id: i64,
    pub kind: ExclusionKind,
    pub first: String,
    pub second: String,
    pub created_at: i64,
}

impl PatternExclusion {
    pub fn normalized_pair(first: &str, second: &str) -> (String, String) {
        if first <= second {
            (first.to_string(), second.to_string())
        } else {
            (second.to_string(), first.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_pair_is_order_insensitive() {
        let a = PatternExclusion::normalized_pair("light.b", "sensor.a");
        let b = PatternExclusion::normalized_pair("sensor.a", "light.b");
        assert_eq!(a, b);
    }
}
