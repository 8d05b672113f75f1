use crate::api::{ApiResult, EngineError};
use crate::models::EngineSettings;
use crate::state::AppState;
use crate::utils::config;

pub async fn get(state: &AppState) -> ApiResult<EngineSettings> {
    Ok(state.settings()?)
}

/// Replaces the settings document atomically. Services pick the change up
/// on their next pass, no restart needed.
pub async fn update(state: &AppState, settings: EngineSettings) -> ApiResult<EngineSettings> {
    if settings.version.trim().is_empty() {
        return Err(EngineError::Validation(
            "settings version must not be empty".to_string(),
        ));
    }
    if settings.general.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(EngineError::Validation(format!(
            "unknown timezone '{}'",
            settings.general.timezone
        )));
    }
    if let Some(conf) = settings.mining.min_confidence_override {
        if !(0.0..=1.0).contains(&conf) {
            return Err(EngineError::Validation(
                "min_confidence override must be between 0 and 1".to_string(),
            ));
        }
    }
    config::save_settings(&state.data_dir, &settings)?;
    log::info!("[Settings] Settings document updated");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;

    #[tokio::test]
    async fn update_roundtrips_through_disk() {
        let ts = test_support::app_state();
        let mut settings = ts.state.settings().unwrap();
        settings.mining.min_confidence_override = Some(0.75);
        update(&ts.state, settings).await.unwrap();
        let reread = get(&ts.state).await.unwrap();
        assert_eq!(reread.mining.min_confidence_override, Some(0.75));
    }

    #[tokio::test]
    async fn bogus_timezone_is_rejected() {
        let ts = test_support::app_state();
        let mut settings = ts.state.settings().unwrap();
        settings.general.timezone = "Mars/Olympus_Mons".to_string();
        let err = update(&ts.state, settings).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
