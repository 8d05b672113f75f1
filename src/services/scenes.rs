use anyhow::Result;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashSet};

use crate::database;
use crate::models::{
    is_sensor_entity, AnomalySeverity, NotificationType, SceneMember, SceneSource, StateEvent,
};
use crate::state::{AppState, DispatchEvent};
use crate::utils::time as timeutil;

/// Actuator changes this close together count as one activation burst.
const CO_ACTIVATION_WINDOW_SECS: i64 = 300;

/// Distinct bursts needed before a member set becomes a scene suggestion.
const MIN_BURSTS: usize = 4;

const SCENE_LOOKBACK_DAYS: i64 = 30;

/// Applies every member state in order, sleeping the configured delay
/// between service calls so slow devices settle before the next one.
pub async fn apply_members(state: &AppState, scene: &crate::models::Scene) -> Result<usize> {
    let mut applied = 0;
    for member in &scene.members {
        let service =
            crate::utils::ha::HaClient::service_for_state(&member.entity_id, &member.target_state);
        state
            .ha
            .call_service(&service, &member.entity_id, &member.attributes)
            .await?;
        applied += 1;
        if scene.action_delay_seconds > 0 && applied < scene.members.len() {
            tokio::time::sleep(std::time::Duration::from_secs(scene.action_delay_seconds)).await;
        }
    }
    Ok(applied)
}

pub fn run_scene_detection(state: &AppState) -> Result<()> {
    let conn = state.conn()?;
    let settings = state.settings()?;
    let now = chrono::Utc::now().timestamp();
    let events = database::events::get_events_in_range(
        &conn,
        now - SCENE_LOOKBACK_DAYS * 24 * 3600,
        now,
    )?;

    let created = detect_scenes(&conn, &events, &settings.general.timezone)?;
    for name in &created {
        let _ = state.dispatch_tx.try_send(DispatchEvent {
            notification_type: NotificationType::SceneSuggestion,
            severity: AnomalySeverity::Low,
            title: "Scene suggestion".to_string(),
            message: format!("Devices you often use together could become the scene '{}'", name),
            person: None,
        });
    }
    if !created.is_empty() {
        log::info!("[Scenes] {} new scene suggestions", created.len());
    }
    Ok(())
}

/// Groups actuator activations into bursts and suggests a scene for every
/// member set that recurs often enough. Returns the names of newly created
/// suggestions.
pub fn detect_scenes(
    conn: &Connection,
    events: &[StateEvent],
    timezone: &str,
) -> Result<Vec<String>> {
    // Burst segmentation: a gap larger than the window starts a new burst.
    let mut bursts: Vec<Vec<&StateEvent>> = Vec::new();
    for event in events {
        if is_sensor_entity(&event.entity_id) || event.new_state == "unknown" {
            continue;
        }
        match bursts.last_mut() {
            Some(burst)
                if event.timestamp - burst[0].timestamp <= CO_ACTIVATION_WINDOW_SECS =>
            {
                burst.push(event)
            }
            _ => bursts.push(vec![event]),
        }
    }

    // A burst's member set is each entity with its final state in the burst.
    let mut recurrence: BTreeMap<Vec<(String, String)>, (usize, HashSet<u32>)> = BTreeMap::new();
    for burst in &bursts {
        let mut members: BTreeMap<String, String> = BTreeMap::new();
        for event in burst {
            members.insert(event.entity_id.clone(), event.new_state.clone());
        }
        if members.len() < 2 {
            continue;
        }
        let key: Vec<(String, String)> = members.into_iter().collect();
        let entry = recurrence.entry(key).or_insert_with(|| (0, HashSet::new()));
        entry.0 += 1;
        entry
            .1
            .insert(timeutil::minute_of_day(burst[0].timestamp, timezone) / 60);
    }

    let mut created = Vec::new();
    for (member_set, (count, hours)) in recurrence {
        if count < MIN_BURSTS {
            continue;
        }
        let entity_ids: Vec<String> = member_set.iter().map(|(e, _)| e.clone()).collect();
        if database::scenes::find_suggested_with_members(conn, &entity_ids)?.is_some() {
            continue;
        }
        let members: Vec<SceneMember> = member_set
            .iter()
            .map(|(entity_id, state)| SceneMember {
                entity_id: entity_id.clone(),
                target_state: state.clone(),
                attributes: Default::default(),
            })
            .collect();
        let name = scene_name(&member_set, &hours);
        database::scenes::insert_scene(
            conn,
            &crate::models::NewScene {
                name: name.clone(),
                icon: None,
                room_id: None,
                members,
                cron_schedule: None,
                action_delay_seconds: 0,
            },
            crate::models::SceneStatus::Suggested,
            SceneSource::Detected,
        )?;
        created.push(name);
    }
    Ok(created)
}

/// Human-facing default name derived from the dominant hour and rooms.
fn scene_name(members: &[(String, String)], hours: &HashSet<u32>) -> String {
    let time_label = match hours.iter().min().copied().unwrap_or(12) {
        0..=5 => "Night",
        6..=11 => "Morning",
        12..=17 => "Afternoon",
        _ => "Evening",
    };
    format!("{} scene ({} devices)", time_label, members.len())
}
