use std::collections::HashMap;

use crate::api::{clamp_limit, page, ApiResult, EngineError, Paginated};
use crate::database::{self, patterns::PatternKey};
use crate::models::{Pattern, PatternStatus, Prediction, PredictionStatus, RejectionReason};
use crate::services::confidence::UNDO_DISCOUNT;
use crate::state::AppState;
use crate::utils::ha::HaClient;

pub async fn list(
    state: &AppState,
    status: Option<PredictionStatus>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<Prediction>> {
    let conn = state.conn()?;
    let limit = clamp_limit(limit);
    let rows = database::predictions::list_predictions(&conn, status, limit, offset.unwrap_or(0))?;
    Ok(page(rows, limit))
}

fn load(state: &AppState, id: i64) -> ApiResult<(Prediction, Pattern)> {
    let conn = state.conn()?;
    let prediction = database::predictions::get_prediction(&conn, id)?
        .ok_or_else(|| EngineError::not_found("prediction", id))?;
    let pattern = database::patterns::get_pattern(&conn, prediction.pattern_id)?
        .ok_or_else(|| EngineError::not_found("pattern", prediction.pattern_id))?;
    Ok((prediction, pattern))
}

/// Accepts the suggestion: pattern goes active and the action runs once
/// right away. Re-confirming a settled prediction is a no-op.
pub async fn confirm(state: &AppState, id: i64, execute_now: bool) -> ApiResult<Prediction> {
    let (prediction, pattern) = load(state, id)?;
    if !prediction.status.is_open() {
        return Ok(prediction);
    }

    // Pattern promotion, settlement and the decision tally land together
    // or not at all.
    let settled = {
        let conn = state.conn()?;
        let tx = conn.unchecked_transaction()?;
        if pattern.status == PatternStatus::Suggested {
            database::patterns::transition_status_in(&tx, pattern.id, PatternStatus::Active, None)?;
        }
        let settled = database::predictions::settle_prediction(
            &tx,
            id,
            PredictionStatus::Confirmed,
            None,
        )?;
        database::learning::record_decision(&tx, &pattern.room_id, &pattern.domain, true)?;
        tx.commit()?;
        settled
    };

    if execute_now {
        let service = HaClient::service_for_state(&pattern.entity_id, &pattern.target_state);
        state
            .ha
            .call_service(&service, &pattern.entity_id, &HashMap::new())
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(e.to_string()))?;
    }
    Ok(settled)
}

pub async fn reject(state: &AppState, id: i64, reason: RejectionReason) -> ApiResult<Prediction> {
    let (prediction, pattern) = load(state, id)?;
    if !prediction.status.is_open() {
        return Ok(prediction);
    }

    let conn = state.conn()?;
    let tx = conn.unchecked_transaction()?;
    let settled = database::predictions::settle_prediction(
        &tx,
        id,
        PredictionStatus::Rejected,
        Some(reason),
    )?;
    database::patterns::transition_status_in(
        &tx,
        pattern.id,
        PatternStatus::Rejected,
        Some(reason),
    )?;
    if reason.suppresses_remining() {
        database::patterns::add_suppression(
            &tx,
            &PatternKey {
                pattern_type: pattern.pattern_type,
                entity_id: pattern.entity_id.clone(),
                target_state: pattern.target_state.clone(),
                trigger_entity: pattern.trigger_entity.clone(),
                trigger_state: pattern.trigger_state.clone(),
            },
        )?;
    }
    database::learning::record_decision(&tx, &pattern.room_id, &pattern.domain, false)?;
    tx.commit()?;
    Ok(settled)
}

/// Defers the decision without counting for or against the scope.
pub async fn ignore(state: &AppState, id: i64) -> ApiResult<Prediction> {
    let (prediction, _) = load(state, id)?;
    if !prediction.status.is_open() {
        return Ok(prediction);
    }
    let conn = state.conn()?;
    let settled =
        database::predictions::settle_prediction(&conn, id, PredictionStatus::Ignored, None)?;
    Ok(settled)
}

/// Reverses an autonomous execution. Valid only while the entity is still
/// in the post-action state; otherwise the undo has expired.
pub async fn undo(state: &AppState, id: i64) -> ApiResult<Prediction> {
    let (prediction, pattern) = load(state, id)?;
    match prediction.status {
        PredictionStatus::Undone => return Ok(prediction),
        PredictionStatus::Executed => {}
        other => {
            return Err(EngineError::Conflict(format!(
                "prediction {} is {}, only executed predictions can be undone",
                id,
                other.as_str()
            )))
        }
    }

    let live = state
        .ha
        .get_state(&pattern.entity_id)
        .await
        .map_err(|e| EngineError::UpstreamUnavailable(e.to_string()))?;
    if live.state != pattern.target_state {
        return Err(EngineError::UndoExpired(format!(
            "{} is now '{}', not '{}' anymore",
            pattern.entity_id, live.state, pattern.target_state
        )));
    }

    let reverse_state = match pattern.target_state.as_str() {
        "on" => "off",
        "off" => "on",
        "open" => "closed",
        "closed" => "open",
        "locked" => "unlocked",
        "unlocked" => "locked",
        other => {
            return Err(EngineError::Conflict(format!(
                "no reverse action for state '{}'",
                other
            )))
        }
    };
    let service = HaClient::service_for_state(&pattern.entity_id, reverse_state);
    state
        .ha
        .call_service(&service, &pattern.entity_id, &HashMap::new())
        .await
        .map_err(|e| EngineError::UpstreamUnavailable(e.to_string()))?;

    let conn = state.conn()?;
    let tx = conn.unchecked_transaction()?;
    let settled =
        database::predictions::settle_prediction(&tx, id, PredictionStatus::Undone, None)?;
    database::patterns::set_confidence(&tx, pattern.id, pattern.confidence * UNDO_DISCOUNT)?;
    tx.commit()?;
    Ok(settled)
}
