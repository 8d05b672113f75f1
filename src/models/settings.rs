use serde::{Deserialize, Serialize};

use super::anomaly::AnomalyEngineSettings;
use super::learning::LearningSpeed;
use super::notification::{ExtendedNotificationSettings, NotificationSettings};

/// Versioned, explicitly-scoped engine settings document, stored as
/// settings.json under the data dir. Each section round-trips with serde
/// and falls back to its Default independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub version: String,
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub mining: MiningSettings,
    #[serde(default)]
    pub learning_speed: LearningSpeed,
    #[serde(default)]
    pub anomaly: AnomalyEngineSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub notifications_extended: ExtendedNotificationSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            general: GeneralSettings::default(),
            storage: StorageSettings::default(),
            mining: MiningSettings::default(),
            learning_speed: LearningSpeed::default(),
            anomaly: AnomalyEngineSettings::default(),
            notifications: NotificationSettings::default(),
            notifications_extended: ExtendedNotificationSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// IANA timezone of the household, e.g. "Europe/Berlin".
    pub timezone: String,
    /// Location for solar-elevation computation.
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            timezone: "Europe/Berlin".to_string(),
            latitude: 52.52,
            longitude: 13.405,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub retention_days: i64,
    pub auto_cleanup: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            retention_days: 60,
            auto_cleanup: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiningPreset {
    Cautious,
    Normal,
    Aggressive,
}

impl Default for MiningPreset {
    fn default() -> Self {
        MiningPreset::Normal
    }
}

/// Mining knobs. The preset sets all three tuned fields at once; advanced
/// users may pin any field individually via the override options.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MiningSettings {
    pub preset: MiningPreset,
    pub chain_window_sec_override: Option<u64>,
    pub min_sequence_count_override: Option<u32>,
    pub min_confidence_override: Option<f64>,
    pub min_occurrences_override: Option<u32>,
    pub min_distinct_days_override: Option<u32>,
}

/// Fully resolved mining parameters after preset + overrides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiningParams {
    pub chain_window_sec: u64,
    pub min_sequence_count: u32,
    pub min_confidence: f64,
    pub min_occurrences: u32,
    pub min_distinct_days: u32,
}

impl MiningSettings {
    pub fn resolve(&self) -> MiningParams {
        let (chain_window_sec, min_sequence_count, min_confidence) = match self.preset {
            MiningPreset::Cautious => (60, 6, 0.8),
            MiningPreset::Normal => (120, 4, 0.7),
            MiningPreset::Aggressive => (300, 3, 0.55),
        };
        MiningParams {
            chain_window_sec: self.chain_window_sec_override.unwrap_or(chain_window_sec),
            min_sequence_count: self.min_sequence_count_override.unwrap_or(min_sequence_count),
            min_confidence: self.min_confidence_override.unwrap_or(min_confidence),
            min_occurrences: self.min_occurrences_override.unwrap_or(5),
            min_distinct_days: self.min_distinct_days_override.unwrap_or(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_scales_all_tuned_fields() {
        let cautious = MiningSettings {
            preset: MiningPreset::Cautious,
            ..Default::default()
        }
        .resolve();
        let aggressive = MiningSettings {
            preset: MiningPreset::Aggressive,
            ..Default::default()
        }
        .resolve();
        assert!(cautious.chain_window_sec < aggressive.chain_window_sec);
        assert!(cautious.min_sequence_count > aggressive.min_sequence_count);
        assert!(cautious.min_confidence > aggressive.min_confidence);
    }

    #[test]
    fn overrides_pin_individual_fields() {
        let params = MiningSettings {
            preset: MiningPreset::Normal,
            min_confidence_override: Some(0.9),
            ..Default::default()
        }
        .resolve();
        assert_eq!(params.min_confidence, 0.9);
        assert_eq!(params.chain_window_sec, 120);
    }

    #[test]
    fn settings_document_requires_version() {
        // A document without a version field must not deserialize.
        let missing: Result<EngineSettings, _> = serde_json::from_str("{}");
        assert!(missing.is_err());
        let ok: Result<EngineSettings, _> =
            serde_json::from_str(r#"{"version":"1.0.0"}"#);
        assert!(ok.is_ok());
    }
}
