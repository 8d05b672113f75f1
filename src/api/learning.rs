use crate::api::{page_in_memory, ApiResult, EngineError, Paginated};
use crate::database;
use crate::models::LearningPhaseState;
use crate::services::learning;
use crate::state::AppState;

pub async fn list_phases(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<LearningPhaseState>> {
    let conn = state.conn()?;
    Ok(page_in_memory(database::learning::list_phases(&conn)?, limit, offset))
}

pub async fn get_phase(
    state: &AppState,
    room_id: &str,
    domain: &str,
) -> ApiResult<LearningPhaseState> {
    let conn = state.conn()?;
    Ok(database::learning::get_or_create_phase(&conn, room_id, domain)?)
}

/// Drops everything learned for the scope and returns it to observing.
pub async fn reset_scope(state: &AppState, room_id: &str, domain: &str) -> ApiResult<()> {
    if room_id.is_empty() || domain.is_empty() {
        return Err(EngineError::Validation(
            "room_id and domain must not be empty".to_string(),
        ));
    }
    let conn = state.conn()?;
    learning::reset_scope(&conn, room_id, domain)?;
    log::info!("[Learning] Scope {}/{} reset by user", room_id, domain);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LearningPhase;
    use crate::state::test_support;

    #[tokio::test]
    async fn get_phase_starts_scopes_in_observing() {
        let ts = test_support::app_state();
        let phase = get_phase(&ts.state, "kitchen", "light").await.unwrap();
        assert_eq!(phase.phase, LearningPhase::Observing);
        assert_eq!(list_phases(&ts.state, None, None).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn reset_rejects_empty_scope() {
        let ts = test_support::app_state();
        let err = reset_scope(&ts.state, "", "light").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
