use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::database;
use crate::models::{
    ManualRule, NewStateEvent, Pattern, PatternStatus, PatternType,
    PredictionStatus, SceneStatus,
};
use crate::state::AppState;
use crate::utils::ha::HaClient;
use crate::utils::time as timeutil;

const TIME_TICK_SECS: u64 = 60;

/// Runs learned automations once their scope is autonomous: time patterns
/// on a minute tick, event chains and manual rules off the event stream.
/// The same tick also fires calendar triggers and scene cron schedules.
pub fn start_executor(state: AppState, mut event_rx: mpsc::Receiver<NewStateEvent>) {
    let tick_state = state.clone();
    tokio::spawn(async move {
        log::info!("[Executor] Automation executor started");
        let mut fired = HashMap::new();
        loop {
            tokio::time::sleep(Duration::from_secs(TIME_TICK_SECS)).await;
            match due_time_patterns(&tick_state) {
                Ok(due) => {
                    for pattern in due {
                        execute_pattern(&tick_state, &pattern).await;
                    }
                }
                Err(e) => log::error!("[Executor] Time tick failed: {}", e),
            }
            if let Err(e) = run_scene_schedules(&tick_state, &mut fired).await {
                log::error!("[Executor] Scene schedule tick failed: {}", e);
            }
        }
    });

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Err(e) = handle_trigger(&state, &event).await {
                log::error!("[Executor] Trigger handling failed: {}", e);
            }
        }
    });
}

fn scope_autonomous(
    conn: &Connection,
    room_map: &HashMap<String, String>,
    entity_id: &str,
) -> Result<bool> {
    let room = room_map
        .get(entity_id)
        .cloned()
        .unwrap_or_else(|| "unassigned".to_string());
    let domain = crate::models::entity_domain(entity_id).to_string();
    let phase = database::learning::get_or_create_phase(conn, &room, &domain)?;
    Ok(phase.phase.auto_executes())
}

/// Active time patterns in autonomous scopes whose window covers the
/// current local minute and that have not fired in this window yet.
fn due_time_patterns(state: &AppState) -> Result<Vec<Pattern>> {
    let conn = state.conn()?;
    let settings = state.settings()?;
    let tz = &settings.general.timezone;
    let now = chrono::Utc::now().timestamp();
    let minute = timeutil::minute_of_day(now, tz) as i64;
    let room_map = database::schedule::entity_room_map(&conn)?;

    let mut due = Vec::new();
    for pattern in database::patterns::list_by_statuses(&conn, &[PatternStatus::Active])? {
        if pattern.pattern_type != PatternType::TimeBased || pattern.test_mode {
            continue;
        }
        let (Some(hour), Some(min)) =
            (pattern.pattern_data.avg_hour, pattern.pattern_data.avg_minute)
        else {
            continue;
        };
        let half = pattern.pattern_data.time_window_min.unwrap_or(30) as i64 / 2;
        let center = hour as i64 * 60 + min as i64;
        if minute < center - half || minute > center + half {
            continue;
        }
        if let Some(filter) = pattern.pattern_data.weekday_filter {
            let date = timeutil::local_date(now, tz);
            let weekendish =
                timeutil::is_weekend_day(date) || database::schedule::is_holiday(&conn, date)?;
            if !filter.applies_on(weekendish) {
                continue;
            }
        }
        if !scope_autonomous(&conn, &room_map, &pattern.entity_id)? {
            continue;
        }
        let window_start = now - (minute - (center - half)).max(0) * 60;
        if database::predictions::executed_since(&conn, pattern.id, window_start)? {
            continue;
        }
        due.push(pattern);
    }
    Ok(due)
}

/// Calendar triggers and scene cron schedules due at the current local
/// minute. One-shot triggers are switched off as they are collected; the
/// `fired` map keeps a recurring source from firing twice in one minute.
fn due_scene_schedules(
    conn: &Connection,
    tz: &str,
    now: i64,
    fired: &mut HashMap<String, i64>,
) -> Result<Vec<(String, String)>> {
    let minute_stamp = now / 60;
    let mut due = Vec::new();

    for trigger in database::schedule::list_triggers(conn)? {
        if !trigger.is_active {
            continue;
        }
        if let Some(at) = trigger.at_timestamp {
            if at <= now {
                database::schedule::set_trigger_active(conn, trigger.id, false)?;
                due.push((trigger.scene_id.clone(), trigger.name.clone()));
            }
            continue;
        }
        let Some(daily) = trigger.daily_time.as_deref() else {
            continue;
        };
        let key = format!("trigger:{}", trigger.id);
        if timeutil::schedule_matches(daily, now, tz) && fired.get(&key) != Some(&minute_stamp) {
            fired.insert(key, minute_stamp);
            due.push((trigger.scene_id.clone(), trigger.name.clone()));
        }
    }

    for scene in database::scenes::list_scenes(conn, 500, 0)? {
        if scene.status != SceneStatus::Accepted {
            continue;
        }
        let Some(expr) = scene.cron_schedule.as_deref() else {
            continue;
        };
        let key = format!("scene:{}", scene.id);
        if timeutil::schedule_matches(expr, now, tz) && fired.get(&key) != Some(&minute_stamp) {
            fired.insert(key, minute_stamp);
            due.push((scene.id.clone(), scene.name.clone()));
        }
    }
    Ok(due)
}

async fn run_scene_schedules(state: &AppState, fired: &mut HashMap<String, i64>) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let due = {
        let conn = state.conn()?;
        let settings = state.settings()?;
        due_scene_schedules(&conn, &settings.general.timezone, now, fired)?
    };
    for (scene_id, source) in due {
        let scene = {
            let conn = state.conn()?;
            database::scenes::get_scene(&conn, &scene_id)?
        };
        let Some(scene) = scene else {
            log::warn!("[Executor] Scheduled scene {} no longer exists", scene_id);
            continue;
        };
        log::info!(
            "[Executor] Schedule '{}' activating scene '{}'",
            source,
            scene.name
        );
        if let Err(e) = crate::services::scenes::apply_members(state, &scene).await {
            log::warn!("[Executor] Scene '{}' activation failed: {}", scene.name, e);
        }
    }
    Ok(())
}

async fn execute_pattern(state: &AppState, pattern: &Pattern) {
    let service = HaClient::service_for_state(&pattern.entity_id, &pattern.target_state);
    log::info!(
        "[Executor] Running pattern {}: {} -> {}",
        pattern.id,
        pattern.entity_id,
        pattern.target_state
    );
    match state
        .ha
        .call_service(&service, &pattern.entity_id, &HashMap::new())
        .await
    {
        Ok(()) => {
            if let Err(e) = record_execution(state, pattern) {
                log::error!("[Executor] Failed to record execution: {}", e);
            }
        }
        Err(e) => log::warn!("[Executor] Pattern {} execution failed: {}", pattern.id, e),
    }
}

fn record_execution(state: &AppState, pattern: &Pattern) -> Result<()> {
    let conn = state.conn()?;
    database::predictions::insert_prediction(
        &conn,
        pattern.id,
        PredictionStatus::Executed,
        pattern.confidence,
    )?;
    Ok(())
}

async fn handle_trigger(state: &AppState, event: &NewStateEvent) -> Result<()> {
    let (chains, rules) = {
        let conn = state.conn()?;
        let room_map = database::schedule::entity_room_map(&conn)?;
        let chains = matching_chains(&conn, &room_map, event)?;
        let rules = matching_rules(&conn, event)?;
        (chains, rules)
    };

    for pattern in chains {
        let delay = pattern.pattern_data.avg_delay_sec.unwrap_or(0.0);
        let state = state.clone();
        tokio::spawn(async move {
            if delay > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
            execute_pattern(&state, &pattern).await;
        });
    }

    for rule in rules {
        let state = state.clone();
        tokio::spawn(async move {
            if let Some(delay) = rule.delay_secs {
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            execute_rule(&state, &rule).await;
        });
    }
    Ok(())
}

fn matching_chains(
    conn: &Connection,
    room_map: &HashMap<String, String>,
    event: &NewStateEvent,
) -> Result<Vec<Pattern>> {
    let new_state = event.new_state_or_unknown();
    let mut matches = Vec::new();
    for pattern in database::patterns::list_by_statuses(conn, &[PatternStatus::Active])? {
        if pattern.pattern_type != PatternType::EventChain
            || pattern.test_mode
            || pattern.trigger_entity != event.entity_id
            || pattern.trigger_state != new_state
        {
            continue;
        }
        if scope_autonomous(conn, room_map, &pattern.entity_id)? {
            matches.push(pattern);
        }
    }
    Ok(matches)
}

/// Manual rules fire in every phase; the user wrote them deliberately.
fn matching_rules(conn: &Connection, event: &NewStateEvent) -> Result<Vec<ManualRule>> {
    let new_state = event.new_state_or_unknown();
    let rules = database::rules::list_rules(conn, 500, 0)?
        .into_iter()
        .filter(|r| {
            r.is_active && r.trigger_entity == event.entity_id && r.trigger_state == new_state
        })
        .collect();
    Ok(rules)
}

async fn execute_rule(state: &AppState, rule: &ManualRule) {
    log::info!(
        "[Executor] Running rule {}: {} on {}",
        rule.id,
        rule.action_service,
        rule.action_entity
    );
    match state
        .ha
        .call_service(&rule.action_service, &rule.action_entity, &HashMap::new())
        .await
    {
        Ok(()) => {
            if let Err(e) = state
                .conn()
                .and_then(|conn| database::rules::bump_execution_count(&conn, rule.id))
            {
                log::error!("[Executor] Failed to record rule execution: {}", e);
            }
        }
        Err(e) => log::warn!("[Executor] Rule {} failed: {}", rule.id, e),
    }
}
