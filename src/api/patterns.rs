use crate::api::{clamp_limit, page, ApiResult, EngineError, Paginated};
use crate::database::{self, patterns::PatternKey};
use crate::models::{Pattern, PatternStatus, PredictionStatus, RejectionReason};
use crate::services;
use crate::state::AppState;

pub async fn list(
    state: &AppState,
    status: Option<PatternStatus>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<Pattern>> {
    let conn = state.conn()?;
    let limit = clamp_limit(limit);
    let rows = database::patterns::list_patterns(&conn, status, limit, offset.unwrap_or(0))?;
    Ok(page(rows, limit))
}

pub async fn list_rejected(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<Pattern>> {
    list(state, Some(PatternStatus::Rejected), limit, offset).await
}

pub async fn get(state: &AppState, id: i64) -> ApiResult<Pattern> {
    let conn = state.conn()?;
    database::patterns::get_pattern(&conn, id)?
        .ok_or_else(|| EngineError::not_found("pattern", id))
}

fn key_of(pattern: &Pattern) -> PatternKey {
    PatternKey {
        pattern_type: pattern.pattern_type,
        entity_id: pattern.entity_id.clone(),
        target_state: pattern.target_state.clone(),
        trigger_entity: pattern.trigger_entity.clone(),
        trigger_state: pattern.trigger_state.clone(),
    }
}

/// Rejects a pattern directly from the pattern list. Idempotent; reasons
/// other than coincidence also suppress re-mining of the same fingerprint.
pub async fn reject(state: &AppState, id: i64, reason: RejectionReason) -> ApiResult<Pattern> {
    let conn = state.conn()?;
    let current = database::patterns::get_pattern(&conn, id)?
        .ok_or_else(|| EngineError::not_found("pattern", id))?;
    if current.status == PatternStatus::Rejected {
        return Ok(current);
    }

    let tx = conn.unchecked_transaction()?;
    let updated =
        database::patterns::transition_status_in(&tx, id, PatternStatus::Rejected, Some(reason))?;
    if let Some(prediction) = database::predictions::open_prediction_for_pattern(&tx, id)? {
        database::predictions::settle_prediction(
            &tx,
            prediction.id,
            PredictionStatus::Rejected,
            Some(reason),
        )?;
    }
    if reason.suppresses_remining() {
        database::patterns::add_suppression(&tx, &key_of(&updated))?;
    }
    database::learning::record_decision(&tx, &updated.room_id, &updated.domain, false)?;
    tx.commit()?;
    Ok(updated)
}

/// Brings a rejected pattern back into observation and lifts its
/// suppression fingerprint.
pub async fn reactivate(state: &AppState, id: i64) -> ApiResult<Pattern> {
    let conn = state.conn()?;
    let current = database::patterns::get_pattern(&conn, id)?
        .ok_or_else(|| EngineError::not_found("pattern", id))?;
    if current.status == PatternStatus::Observed {
        return Ok(current);
    }
    if current.status != PatternStatus::Rejected {
        return Err(EngineError::Conflict(format!(
            "pattern {} is {}, only rejected patterns can be reactivated",
            id,
            current.status.as_str()
        )));
    }
    let tx = conn.unchecked_transaction()?;
    let updated =
        database::patterns::transition_status_in(&tx, id, PatternStatus::Observed, None)?;
    database::patterns::clear_suppression(&tx, &key_of(&updated))?;
    tx.commit()?;
    Ok(updated)
}

pub async fn set_test_mode(state: &AppState, id: i64, test_mode: bool) -> ApiResult<Pattern> {
    let conn = state.conn()?;
    database::patterns::set_test_mode(&conn, id, test_mode)
        .map_err(|_| EngineError::not_found("pattern", id))?;
    database::patterns::get_pattern(&conn, id)?
        .ok_or_else(|| EngineError::not_found("pattern", id))
}

/// On-demand mining pass over the full history window.
pub async fn analyze(state: &AppState) -> ApiResult<services::miner::MiningReport> {
    let report = services::miner::run_analysis(state)?;
    Ok(report)
}
