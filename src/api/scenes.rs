use std::collections::HashMap;

use crate::api::{clamp_limit, page, ApiResult, EngineError, Paginated};
use crate::database;
use crate::models::{NewScene, Scene, SceneMember, SceneSource, SceneStatus};
use crate::services;
use crate::state::AppState;

pub async fn list(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<Scene>> {
    let conn = state.conn()?;
    let limit = clamp_limit(limit);
    let rows = database::scenes::list_scenes(&conn, limit, offset.unwrap_or(0))?;
    Ok(page(rows, limit))
}

pub async fn get(state: &AppState, id: &str) -> ApiResult<Scene> {
    let conn = state.conn()?;
    database::scenes::get_scene(&conn, id)?.ok_or_else(|| EngineError::not_found("scene", id))
}

fn validate(scene: &NewScene) -> ApiResult<()> {
    if scene.name.trim().is_empty() {
        return Err(EngineError::Validation("scene name must not be empty".to_string()));
    }
    if scene.members.is_empty() {
        return Err(EngineError::Validation(
            "a scene needs at least one member".to_string(),
        ));
    }
    for member in &scene.members {
        if member.entity_id.is_empty() {
            return Err(EngineError::Validation(
                "scene members need an entity_id".to_string(),
            ));
        }
    }
    Ok(())
}

pub async fn create(state: &AppState, scene: NewScene) -> ApiResult<Scene> {
    validate(&scene)?;
    let conn = state.conn()?;
    Ok(database::scenes::insert_scene(
        &conn,
        &scene,
        SceneStatus::Accepted,
        SceneSource::Manual,
    )?)
}

pub async fn update(state: &AppState, id: &str, scene: NewScene) -> ApiResult<Scene> {
    validate(&scene)?;
    let conn = state.conn()?;
    let existing = database::scenes::get_scene(&conn, id)?
        .ok_or_else(|| EngineError::not_found("scene", id))?;
    Ok(database::scenes::update_scene(&conn, id, &scene, existing.status)?)
}

pub async fn delete(state: &AppState, id: &str) -> ApiResult<()> {
    let conn = state.conn()?;
    if !database::scenes::delete_scene(&conn, id)? {
        return Err(EngineError::not_found("scene", id));
    }
    Ok(())
}

/// Accepting a suggested scene turns it into a normal active scene.
pub async fn accept(state: &AppState, id: &str) -> ApiResult<Scene> {
    let conn = state.conn()?;
    let scene = database::scenes::get_scene(&conn, id)?
        .ok_or_else(|| EngineError::not_found("scene", id))?;
    if scene.status == SceneStatus::Accepted {
        return Ok(scene);
    }
    let new = NewScene {
        name: scene.name.clone(),
        icon: scene.icon.clone(),
        room_id: scene.room_id.clone(),
        members: scene.members.clone(),
        cron_schedule: scene.cron_schedule.clone(),
        action_delay_seconds: scene.action_delay_seconds,
    };
    Ok(database::scenes::update_scene(&conn, id, &new, SceneStatus::Accepted)?)
}

pub async fn dismiss(state: &AppState, id: &str) -> ApiResult<()> {
    let conn = state.conn()?;
    let scene = database::scenes::get_scene(&conn, id)?
        .ok_or_else(|| EngineError::not_found("scene", id))?;
    if scene.status != SceneStatus::Suggested {
        return Err(EngineError::Conflict(format!(
            "scene {} is not a suggestion",
            id
        )));
    }
    database::scenes::delete_scene(&conn, id)?;
    Ok(())
}

/// Applies every member state in order, sleeping the configured delay
/// between service calls so slow devices settle before the next one.
pub async fn activate(state: &AppState, id: &str) -> ApiResult<usize> {
    let scene = {
        let conn = state.conn()?;
        database::scenes::get_scene(&conn, id)?
            .ok_or_else(|| EngineError::not_found("scene", id))?
    };

    let applied = services::scenes::apply_members(state, &scene)
        .await
        .map_err(|e| EngineError::UpstreamUnavailable(e.to_string()))?;
    log::info!("[Scenes] Activated scene '{}' ({} members)", scene.name, applied);
    Ok(applied)
}

/// Captures the live state of the given entities as a new manual scene.
pub async fn snapshot(state: &AppState, name: &str, entity_ids: &[String]) -> ApiResult<Scene> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("scene name must not be empty".to_string()));
    }
    if entity_ids.is_empty() {
        return Err(EngineError::Validation(
            "a snapshot needs at least one entity".to_string(),
        ));
    }

    let mut members = Vec::with_capacity(entity_ids.len());
    for entity_id in entity_ids {
        let live = state
            .ha
            .get_state(entity_id)
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(e.to_string()))?;
        members.push(SceneMember {
            entity_id: entity_id.clone(),
            target_state: live.state,
            attributes: HashMap::new(),
        });
    }

    let new = NewScene {
        name: name.to_string(),
        icon: None,
        room_id: None,
        members,
        cron_schedule: None,
        action_delay_seconds: 0,
    };
    let conn = state.conn()?;
    Ok(database::scenes::insert_scene(
        &conn,
        &new,
        SceneStatus::Accepted,
        SceneSource::Snapshot,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;

    fn movie_night() -> NewScene {
        NewScene {
            name: "Movie night".to_string(),
            icon: None,
            room_id: Some("living_room".to_string()),
            members: vec![
                SceneMember {
                    entity_id: "light.living_room".to_string(),
                    target_state: "off".to_string(),
                    attributes: HashMap::new(),
                },
                SceneMember {
                    entity_id: "media_player.tv".to_string(),
                    target_state: "on".to_string(),
                    attributes: HashMap::new(),
                },
            ],
            cron_schedule: None,
            action_delay_seconds: 0,
        }
    }

    #[tokio::test]
    async fn create_and_fetch() {
        let ts = test_support::app_state();
        let created = create(&ts.state, movie_night()).await.unwrap();
        let fetched = get(&ts.state, &created.id).await.unwrap();
        assert_eq!(fetched.members.len(), 2);
        assert_eq!(fetched.source, SceneSource::Manual);
        assert_eq!(fetched.status, SceneStatus::Accepted);
    }

    #[tokio::test]
    async fn memberless_scene_is_rejected() {
        let ts = test_support::app_state();
        let mut empty = movie_night();
        empty.members.clear();
        let err = create(&ts.state, empty).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn accept_promotes_a_suggestion() {
        let ts = test_support::app_state();
        let conn = ts.state.conn().unwrap();
        let suggested = database::scenes::insert_scene(
            &conn,
            &movie_night(),
            SceneStatus::Suggested,
            SceneSource::Detected,
        )
        .unwrap();
        drop(conn);

        let accepted = accept(&ts.state, &suggested.id).await.unwrap();
        assert_eq!(accepted.status, SceneStatus::Accepted);
        // Accepting twice is a no-op.
        let again = accept(&ts.state, &suggested.id).await.unwrap();
        assert_eq!(again.status, SceneStatus::Accepted);
    }

    #[tokio::test]
    async fn dismiss_only_applies_to_suggestions() {
        let ts = test_support::app_state();
        let created = create(&ts.state, movie_night()).await.unwrap();
        let err = dismiss(&ts.state, &created.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }
}
