use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::anomaly::AnomalySeverity;

/// Closed set of notification types. Producer and dispatcher agree on this
/// enum; free-form strings are never routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PatternSuggestion,
    Anomaly,
    Conflict,
    SceneSuggestion,
    Digest,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::PatternSuggestion => "pattern_suggestion",
            NotificationType::Anomaly => "anomaly",
            NotificationType::Conflict => "conflict",
            NotificationType::SceneSuggestion => "scene_suggestion",
            NotificationType::Digest => "digest",
            NotificationType::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pattern_suggestion" => Some(NotificationType::PatternSuggestion),
            "anomaly" => Some(NotificationType::Anomaly),
            "conflict" => Some(NotificationType::Conflict),
            "scene_suggestion" => Some(NotificationType::SceneSuggestion),
            "digest" => Some(NotificationType::Digest),
            "system" => Some(NotificationType::System),
            _ => None,
        }
    }

    pub fn all() -> [NotificationType; 6] {
        [
            NotificationType::PatternSuggestion,
            NotificationType::Anomaly,
            NotificationType::Conflict,
            NotificationType::SceneSuggestion,
            NotificationType::Digest,
            NotificationType::System,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Delivered,
    Suppressed,
    RateLimited,
    Failed,
    Digest,
    Pending,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Delivered => "delivered",
            DeliveryState::Suppressed => "suppressed",
            DeliveryState::RateLimited => "rate_limited",
            DeliveryState::Failed => "failed",
            DeliveryState::Digest => "digest",
            DeliveryState::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delivered" => Some(DeliveryState::Delivered),
            "suppressed" => Some(DeliveryState::Suppressed),
            "rate_limited" => Some(DeliveryState::RateLimited),
            "failed" => Some(DeliveryState::Failed),
            "digest" => Some(DeliveryState::Digest),
            "pending" => Some(DeliveryState::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub notification_type: NotificationType,
    pub severity: AnomalySeverity,
    pub title: String,
    pub message: String,
    pub person: Option<String>,
    pub channel: Option<String>,
    pub delivery_state: DeliveryState,
    pub read: bool,
    /// How many raw events were folded into this notification by grouping.
    pub group_count: i64,
    pub created_at: i64,
}

/// Per-type toggles shown on the basic settings page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSetting {
    pub enabled: bool,
    pub sound: bool,
    /// Max individually delivered notifications of this type per hour.
    pub rate_limit_per_hour: u32,
}

impl Default for TypeSetting {
    fn default() -> Self {
        Self {
            enabled: true,
            sound: true,
            rate_limit_per_hour: 6,
        }
    }
}

/// "HH:MM"–"HH:MM" local-time window; crossing midnight is allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietWindow {
    pub start: String,
    pub end: String,
}

impl Default for QuietWindow {
    fn default() -> Self {
        Self {
            start: "22:00".to_string(),
            end: "07:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub types: HashMap<NotificationType, TypeSetting>,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_weekday: QuietWindow,
    pub quiet_hours_weekend: QuietWindow,
    /// Critical notifications bypass quiet hours and DND.
    pub critical_override: bool,
    pub dnd: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        let mut types = HashMap::new();
        for t in NotificationType::all() {
            types.insert(t, TypeSetting::default());
        }
        Self {
            types,
            quiet_hours_enabled: true,
            quiet_hours_weekday: QuietWindow::default(),
            quiet_hours_weekend: QuietWindow {
                start: "23:00".to_string(),
                end: "09:00".to_string(),
            },
            critical_override: true,
            dnd: false,
        }
    }
}

impl NotificationSettings {
    pub fn type_setting(&self, t: NotificationType) -> TypeSetting {
        self.types.get(&t).cloned().unwrap_or_default()
    }
}

/// Extended dispatcher settings: escalation, grouping, digests, channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedNotificationSettings {
    pub group_window_secs: u64,
    pub escalation_enabled: bool,
    /// Unread push notifications escalate to TTS after this delay.
    pub escalation_delay_secs: u64,
    pub digest_enabled: bool,
    /// "HH:MM" local delivery time of the daily digest.
    pub digest_time: String,
    /// person → ordered channel preference, first is primary.
    pub person_channels: HashMap<String, Vec<String>>,
}

impl Default for ExtendedNotificationSettings {
    fn default() -> Self {
        Self {
            group_window_secs: 300,
            escalation_enabled: false,
            escalation_delay_secs: 900,
            digest_enabled: false,
            digest_time: "08:00".to_string(),
            person_channels: HashMap::new(),
        }
    }
}
