use crate::api::{clamp_limit, page, page_in_memory, ApiResult, EngineError, Paginated};
use crate::database;
use crate::models::{Anomaly, AnomalyConfig, AnomalyEngineSettings, AnomalyScope};
use crate::state::AppState;

pub async fn list(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<Anomaly>> {
    let conn = state.conn()?;
    let limit = clamp_limit(limit);
    let rows = database::anomaly::list_anomalies(&conn, limit, offset.unwrap_or(0))?;
    Ok(page(rows, limit))
}

/// The global detector configuration; created on first read.
pub async fn get_settings(state: &AppState) -> ApiResult<AnomalyConfig> {
    let conn = state.conn()?;
    let config = database::anomaly::get_config(&conn, AnomalyScope::Global, "")?
        .unwrap_or_else(AnomalyConfig::global_default);
    Ok(config)
}

pub async fn update_settings(state: &AppState, config: AnomalyConfig) -> ApiResult<AnomalyConfig> {
    if config.scope != AnomalyScope::Global {
        return Err(EngineError::Validation(
            "global settings must carry the global scope".to_string(),
        ));
    }
    let conn = state.conn()?;
    database::anomaly::put_config(&conn, &config)?;
    Ok(config)
}

pub async fn get_extended_settings(state: &AppState) -> ApiResult<AnomalyEngineSettings> {
    Ok(state.settings()?.anomaly)
}

pub async fn update_extended_settings(
    state: &AppState,
    extended: AnomalyEngineSettings,
) -> ApiResult<AnomalyEngineSettings> {
    let mut settings = state.settings()?;
    settings.anomaly = extended.clone();
    crate::utils::config::save_settings(&state.data_dir, &settings)?;
    Ok(extended)
}

pub async fn list_device_settings(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<AnomalyConfig>> {
    let conn = state.conn()?;
    Ok(page_in_memory(database::anomaly::list_device_configs(&conn)?, limit, offset))
}

pub async fn get_device_settings(state: &AppState, entity_id: &str) -> ApiResult<AnomalyConfig> {
    let conn = state.conn()?;
    let config = database::anomaly::get_config(&conn, AnomalyScope::Device, entity_id)?
        .unwrap_or_else(|| AnomalyConfig::inherit_for(AnomalyScope::Device, entity_id));
    Ok(config)
}

pub async fn update_device_settings(
    state: &AppState,
    entity_id: &str,
    mut config: AnomalyConfig,
) -> ApiResult<AnomalyConfig> {
    if entity_id.is_empty() {
        return Err(EngineError::Validation("entity_id must not be empty".to_string()));
    }
    config.scope = AnomalyScope::Device;
    config.scope_key = entity_id.to_string();
    let conn = state.conn()?;
    database::anomaly::put_config(&conn, &config)?;
    Ok(config)
}

/// Pauses all detection until the given timestamp; a past timestamp
/// resumes immediately.
pub async fn pause(state: &AppState, until: i64) -> ApiResult<AnomalyEngineSettings> {
    let mut settings = state.settings()?;
    settings.anomaly.paused_until = Some(until);
    crate::utils::config::save_settings(&state.data_dir, &settings)?;
    Ok(settings.anomaly)
}

/// Drops learned baselines for one entity, or all of them.
pub async fn reset_baseline(state: &AppState, entity_id: Option<&str>) -> ApiResult<usize> {
    let conn = state.conn()?;
    let dropped = database::anomaly::reset_baselines(&conn, entity_id)?;
    log::info!(
        "[Anomaly] Baselines reset ({}): {} dropped",
        entity_id.unwrap_or("all"),
        dropped
    );
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sensitivity;
    use crate::state::test_support;

    #[tokio::test]
    async fn global_settings_default_and_roundtrip() {
        let ts = test_support::app_state();
        let config = get_settings(&ts.state).await.unwrap();
        assert_eq!(config.sensitivity, Sensitivity::Medium);

        let mut updated = config;
        updated.sensitivity = Sensitivity::High;
        update_settings(&ts.state, updated).await.unwrap();
        let reread = get_settings(&ts.state).await.unwrap();
        assert_eq!(reread.sensitivity, Sensitivity::High);
    }

    #[tokio::test]
    async fn device_settings_get_defaults_to_inherit() {
        let ts = test_support::app_state();
        let config = get_device_settings(&ts.state, "sensor.kitchen").await.unwrap();
        assert_eq!(config.sensitivity, Sensitivity::Inherit);
        assert_eq!(config.scope_key, "sensor.kitchen");
    }

    #[tokio::test]
    async fn device_update_forces_scope_fields() {
        let ts = test_support::app_state();
        let mut config = AnomalyConfig::global_default();
        config.scope_key = "something.else".to_string();
        let saved = update_device_settings(&ts.state, "sensor.kitchen", config)
            .await
            .unwrap();
        assert_eq!(saved.scope, AnomalyScope::Device);
        assert_eq!(saved.scope_key, "sensor.kitchen");
    }

    #[tokio::test]
    async fn wrong_scope_on_global_update_is_rejected() {
        let ts = test_support::app_state();
        let mut config = AnomalyConfig::global_default();
        config.scope = AnomalyScope::Device;
        let err = update_settings(&ts.state, config).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
