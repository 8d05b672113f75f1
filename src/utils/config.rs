use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use crate::models::EngineSettings;

const ENV_DATA_DIR: &str = "MINDHOME_DATA_DIR";

pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Data dir resolution: env override, else ./data.
pub fn resolve_data_dir() -> PathBuf {
    std::env::var(ENV_DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config").join("settings.json")
}

pub fn load_settings(data_dir: &Path) -> Result<EngineSettings> {
    let path = settings_path(data_dir);
    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        parse_settings(&content)
    } else {
        Ok(EngineSettings::default())
    }
}

/// Settings documents are versioned; anything without a version field is
/// rejected before a single value is applied.
pub fn parse_settings(content: &str) -> Result<EngineSettings> {
    let settings: EngineSettings = serde_json::from_str(content)
        .map_err(|e| anyhow!("invalid settings document: {}", e))?;
    if settings.version.trim().is_empty() {
        return Err(anyhow!("settings document has an empty version field"));
    }
    Ok(settings)
}

pub fn save_settings(data_dir: &Path, settings: &EngineSettings) -> Result<()> {
    let path = settings_path(data_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(&path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_without_version_is_rejected() {
        assert!(parse_settings("{}").is_err());
        assert!(parse_settings(r#"{"version":""}"#).is_err());
        assert!(parse_settings(r#"{"version":"1.0.0"}"#).is_ok());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = EngineSettings::default();
        settings.storage.retention_days = 30;
        save_settings(dir.path(), &settings).unwrap();
        let loaded = load_settings(dir.path()).unwrap();
        assert_eq!(loaded.storage.retention_days, 30);
    }
}
