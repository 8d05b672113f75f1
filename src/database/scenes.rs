use anyhow::{anyhow, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{NewScene, Scene, SceneSource, SceneStatus};

fn row_to_scene(row: &rusqlite::Row) -> rusqlite::Result<Scene> {
    let members: String = row.get(4)?;
    let status: String = row.get(7)?;
    let source: String = row.get(8)?;
    Ok(Scene {
        id: row.get(0)?,
        name: row.get(1)?,
        icon: row.get(2)?,
        room_id: row.get(3)?,
        members: serde_json::from_str(&members).unwrap_or_default(),
        cron_schedule: row.get(5)?,
        action_delay_seconds: row.get::<_, i64>(6)? as u64,
        status: SceneStatus::parse(&status).unwrap_or(SceneStatus::Suggested),
        source: SceneSource::parse(&source).unwrap_or(SceneSource::Manual),
        created_at: row.get(9)?,
    })
}

const COLUMNS: &str = "id, name, icon, room_id, members, cron_schedule, \
     action_delay_seconds, status, source, created_at";

pub fn list_scenes(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Scene>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM scenes ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        COLUMNS
    ))?;
    let scenes = stmt
        .query_map([limit + 1, offset], row_to_scene)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(scenes)
}

pub fn get_scene(conn: &Connection, id: &str) -> Result<Option<Scene>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM scenes WHERE id = ?1", COLUMNS))?;
    let scene = stmt.query_row([id], row_to_scene).optional()?;
    Ok(scene)
}

pub fn insert_scene(
    conn: &Connection,
    new: &NewScene,
    status: SceneStatus,
    source: SceneSource,
) -> Result<Scene> {
    let id = uuid::Uuid::new_v4().to_string();
    let members = serde_json::to_string(&new.members)?;
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO scenes
         (id, name, icon, room_id, members, cron_schedule, action_delay_seconds,
          status, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            &id,
            &new.name,
            &new.icon,
            &new.room_id,
            &members,
            &new.cron_schedule,
            new.action_delay_seconds as i64,
            status.as_str(),
            source.as_str(),
            now,
        ],
    )?;
    get_scene(conn, &id)?.ok_or_else(|| anyhow!("scene {} not found after insert", id))
}

pub fn update_scene(conn: &Connection, id: &str, new: &NewScene, status: SceneStatus) -> Result<Scene> {
    let members = serde_json::to_string(&new.members)?;
    let changed = conn.execute(
        "UPDATE scenes
         SET name = ?2, icon = ?3, room_id = ?4, members = ?5, cron_schedule = ?6,
             action_delay_seconds = ?7, status = ?8
         WHERE id = ?1",
        rusqlite::params![
            id,
            &new.name,
            &new.icon,
            &new.room_id,
            &members,
            &new.cron_schedule,
            new.action_delay_seconds as i64,
            status.as_str(),
        ],
    )?;
    if changed == 0 {
        return Err(anyhow!("scene {} not found", id));
    }
    get_scene(conn, id)?.ok_or_else(|| anyhow!("scene {} not found", id))
}

pub fn delete_scene(conn: &Connection, id: &str) -> Result<bool> {
    conn.execute("DELETE FROM calendar_triggers WHERE scene_id = ?1", [id])?;
    let deleted = conn.execute("DELETE FROM scenes WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

/// Detected suggestion dedup: a suggested scene with the same member set.
pub fn find_suggested_with_members(conn: &Connection, entity_ids: &[String]) -> Result<Option<Scene>> {
    let mut sorted = entity_ids.to_vec();
    sorted.sort();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM scenes WHERE status = 'suggested' AND source = 'detected'",
        COLUMNS
    ))?;
    let scenes = stmt
        .query_map([], row_to_scene)?
        .collect::<Result<Vec<_>, _>>()?;
    for scene in scenes {
        let mut members: Vec<String> = scene.members.iter().map(|m| m.entity_id.clone()).collect();
        members.sort();
        if members == sorted {
            return Ok(Some(scene));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;
    use crate::models::SceneMember;

    fn members(ids: &[&str]) -> Vec<SceneMember> {
        ids.iter()
            .map(|id| SceneMember {
                entity_id: id.to_string(),
                target_state: "on".to_string(),
                attributes: Default::default(),
            })
            .collect()
    }

    #[test]
    fn scene_crud_roundtrip() {
        let conn = open_test_db();
        let scene = insert_scene(
            &conn,
            &NewScene {
                name: "Movie night".to_string(),
                icon: Some("mdi:movie".to_string()),
                room_id: Some("living_room".to_string()),
                members: members(&["light.tv", "light.couch"]),
                cron_schedule: None,
                action_delay_seconds: 2,
            },
            SceneStatus::Accepted,
            SceneSource::Manual,
        )
        .unwrap();
        assert_eq!(scene.members.len(), 2);

        let loaded = get_scene(&conn, &scene.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Movie night");
        assert_eq!(loaded.action_delay_seconds, 2);

        assert!(delete_scene(&conn, &scene.id).unwrap());
        assert!(get_scene(&conn, &scene.id).unwrap().is_none());
    }

    #[test]
    fn suggested_scene_dedup_ignores_member_order() {
        let conn = open_test_db();
        insert_scene(
            &conn,
            &NewScene {
                name: "Evening".to_string(),
                icon: None,
                room_id: None,
                members: members(&["light.a", "light.b"]),
                cron_schedule: None,
                action_delay_seconds: 0,
            },
            SceneStatus::Suggested,
            SceneSource::Detected,
        )
        .unwrap();
        let hit = find_suggested_with_members(
            &conn,
            &["light.b".to_string(), "light.a".to_string()],
        )
        .unwrap();
        assert!(hit.is_some());
    }
}
