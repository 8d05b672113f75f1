use crate::api::{clamp_limit, page, ApiResult, EngineError, Paginated};
use crate::database;
use crate::models::{ExclusionKind, ManualRule, NewManualRule, PatternExclusion};
use crate::state::AppState;

pub async fn list_rules(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<ManualRule>> {
    let conn = state.conn()?;
    let limit = clamp_limit(limit);
    let rows = database::rules::list_rules(&conn, limit, offset.unwrap_or(0))?;
    Ok(page(rows, limit))
}

fn validate(rule: &NewManualRule) -> ApiResult<()> {
    if rule.trigger_entity.is_empty() || rule.action_entity.is_empty() {
        return Err(EngineError::Validation(
            "trigger and action entity must not be empty".to_string(),
        ));
    }
    if rule.trigger_entity == rule.action_entity {
        return Err(EngineError::Validation(
            "a rule must not trigger on its own action entity".to_string(),
        ));
    }
    if !rule.action_service.contains('.') {
        return Err(EngineError::Validation(
            "action_service must be 'domain.service'".to_string(),
        ));
    }
    Ok(())
}

pub async fn create_rule(state: &AppState, rule: NewManualRule) -> ApiResult<ManualRule> {
    validate(&rule)?;
    let conn = state.conn()?;
    Ok(database::rules::insert_rule(&conn, &rule)?)
}

pub async fn update_rule(state: &AppState, id: i64, rule: NewManualRule) -> ApiResult<ManualRule> {
    validate(&rule)?;
    let conn = state.conn()?;
    database::rules::get_rule(&conn, id)?
        .ok_or_else(|| EngineError::not_found("manual rule", id))?;
    Ok(database::rules::update_rule(&conn, id, &rule)?)
}

pub async fn delete_rule(state: &AppState, id: i64) -> ApiResult<()> {
    let conn = state.conn()?;
    if !database::rules::delete_rule(&conn, id)? {
        return Err(EngineError::not_found("manual rule", id));
    }
    Ok(())
}

pub async fn list_exclusions(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<PatternExclusion>> {
    let conn = state.conn()?;
    let limit = clamp_limit(limit);
    let rows = database::rules::list_exclusions(&conn, limit, offset.unwrap_or(0))?;
    Ok(page(rows, limit))
}

/// The pair is unordered; creating (a, b) after (b, a) is the same
/// exclusion and reported as a conflict.
pub async fn create_exclusion(
    state: &AppState,
    kind: ExclusionKind,
    first: &str,
    second: &str,
) -> ApiResult<PatternExclusion> {
    if first.is_empty() || second.is_empty() {
        return Err(EngineError::Validation(
            "both members of an exclusion must be set".to_string(),
        ));
    }
    if first == second {
        return Err(EngineError::Validation(
            "an exclusion needs two different members".to_string(),
        ));
    }
    let conn = state.conn()?;
    database::rules::insert_exclusion(&conn, kind, first, second)?.ok_or_else(|| {
        EngineError::Conflict(format!(
            "exclusion ({}, {}) already exists",
            first, second
        ))
    })
}

pub async fn delete_exclusion(state: &AppState, id: i64) -> ApiResult<()> {
    let conn = state.conn()?;
    if !database::rules::delete_exclusion(&conn, id)? {
        return Err(EngineError::not_found("exclusion", id));
    }
    Ok(())
}
