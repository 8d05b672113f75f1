use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    Suggested,
    Accepted,
}

impl SceneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneStatus::Suggested => "suggested",
            SceneStatus::Accepted => "accepted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            // "detected" is the legacy spelling the dashboard still sends.
            "suggested" | "detected" => Some(SceneStatus::Suggested),
            "accepted" => Some(SceneStatus::Accepted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneSource {
    Manual,
    Snapshot,
    Detected,
}

impl SceneSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneSource::Manual => "manual",
            SceneSource::Snapshot => "snapshot",
            SceneSource::Detected => "detected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(SceneSource::Manual),
            "snapshot" => Some(SceneSource::Snapshot),
            "detected" => Some(SceneSource::Detected),
            _ => None,
        }
    }
}

/// One member of a scene, applied in list order when activating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMember {
    pub entity_id: String,
    pub target_state: String,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub room_id: Option<String>,
    pub members: Vec<SceneMember>,
    pub cron_schedule: Option<String>,
    pub action_delay_seconds: u64,
    pub status: SceneStatus,
    pub source: SceneSource,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScene {
    pub name: String,
    pub icon: Option<String>,
    pub room_id: Option<String>,
    pub members: Vec<SceneMember>,
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub action_delay_seconds: u64,
}
