use anyhow::{anyhow, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{
    ExclusionKind, ManualRule, NewManualRule, PatternExclusion,
};

fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<ManualRule> {
    Ok(ManualRule {
        id: row.get(0)?,
        trigger_entity: row.get(1)?,
        trigger_state: row.get(2)?,
        action_entity: row.get(3)?,
        action_service: row.get(4)?,
        delay_secs: row.get::<_, Option<i64>>(5)?.map(|d| d as u64),
        is_active: row.get::<_, i64>(6)? != 0,
        execution_count: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const RULE_COLUMNS: &str = "id, trigger_entity, trigger_state, action_entity, action_service, \
     delay_secs, is_active, execution_count, created_at";

pub fn list_rules(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<ManualRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM manual_rules ORDER BY id ASC LIMIT ?1 OFFSET ?2",
        RULE_COLUMNS
    ))?;
    let rules = stmt
        .query_map([limit + 1, offset], row_to_rule)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rules)
}

pub fn get_rule(conn: &Connection, id: i64) -> Result<Option<ManualRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM manual_rules WHERE id = ?1",
        RULE_COLUMNS
    ))?;
    let rule = stmt.query_row([id], row_to_rule).optional()?;
    Ok(rule)
}

pub fn insert_rule(conn: &Connection, rule: &NewManualRule) -> Result<ManualRule> {
    conn.execute(
        "INSERT INTO manual_rules
         (trigger_entity, trigger_state, action_entity, action_service,
          delay_secs, is_active, execution_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        rusqlite::params![
            &rule.trigger_entity,
            &rule.trigger_state,
            &rule.action_entity,
            &rule.action_service,
            rule.delay_secs.map(|d| d as i64),
            rule.is_active as i64,
            chrono::Utc::now().timestamp(),
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_rule(conn, id)?.ok_or_else(|| anyhow!("manual rule {} not found after insert", id))
}

pub fn update_rule(conn: &Connection, id: i64, rule: &NewManualRule) -> Result<ManualRule> {
    let changed = conn.execute(
        "UPDATE manual_rules
         SET trigger_entity = ?2, trigger_state = ?3, action_entity = ?4,
             action_service = ?5, delay_secs = ?6, is_active = ?7
         WHERE id = ?1",
        rusqlite::params![
            id,
            &rule.trigger_entity,
            &rule.trigger_state,
            &rule.action_entity,
            &rule.action_service,
            rule.delay_secs.map(|d| d as i64),
            rule.is_active as i64,
        ],
    )?;
    if changed == 0 {
        return Err(anyhow!("manual rule {} not found", id));
    }
    get_rule(conn, id)?.ok_or_else(|| anyhow!("manual rule {} not found", id))
}

pub fn delete_rule(conn: &Connection, id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM manual_rules WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

pub fn set_rule_active(conn: &Connection, id: i64, active: bool) -> Result<()> {
    let changed = conn.execute(
        "UPDATE manual_rules SET is_active = ?2 WHERE id = ?1",
        rusqlite::params![id, active as i64],
    )?;
    if changed == 0 {
        return Err(anyhow!("manual rule {} not found", id));
    }
    Ok(())
}

pub fn bump_execution_count(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE manual_rules SET execution_count = execution_count + 1 WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

/// Entity pairs covered by active manual rules, hard-excluded from mining.
pub fn active_rule_pairs(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT trigger_entity, action_entity FROM manual_rules WHERE is_active = 1",
    )?;
    let pairs = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pairs)
}

// --- pattern exclusions ------------------------------------------------------

fn row_to_exclusion(row: &rusqlite::Row) -> rusqlite::Result<PatternExclusion> {
    let kind: String = row.get(1)?;
    Ok(PatternExclusion {
        id: row.get(0)?,
        kind: ExclusionKind::parse(&kind).unwrap_or(ExclusionKind::Entity),
        first: row.get(2)?,
        second: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn list_exclusions(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<PatternExclusion>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, first, second, created_at FROM pattern_exclusions
         ORDER BY id ASC LIMIT ?1 OFFSET ?2",
    )?;
    let exclusions = stmt
        .query_map([limit + 1, offset], row_to_exclusion)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(exclusions)
}

pub fn all_exclusions(conn: &Connection) -> Result<Vec<PatternExclusion>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, first, second, created_at FROM pattern_exclusions ORDER BY id ASC",
    )?;
    let exclusions = stmt
        .query_map([], row_to_exclusion)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(exclusions)
}

/// Returns None when the normalized pair already exists.
pub fn insert_exclusion(
    conn: &Connection,
    kind: ExclusionKind,
    first: &str,
    second: &str,
) -> Result<Option<PatternExclusion>> {
    let (first, second) = PatternExclusion::normalized_pair(first, second);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO pattern_exclusions (kind, first, second, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            kind.as_str(),
            &first,
            &second,
            chrono::Utc::now().timestamp(),
        ],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    let id = conn.last_insert_rowid();
    Ok(Some(PatternExclusion {
        id,
        kind,
        first,
        second,
        created_at: chrono::Utc::now().timestamp(),
    }))
}

pub fn delete_exclusion(conn: &Connection, id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM pattern_exclusions WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;

    #[test]
    fn duplicate_exclusion_is_detected_either_order() {
        let conn = open_test_db();
        let first = insert_exclusion(&conn, ExclusionKind::Entity, "light.b", "sensor.a").unwrap();
        assert!(first.is_some());
        // Same pair, swapped order: normalized away
        let dup = insert_exclusion(&conn, ExclusionKind::Entity, "sensor.a", "light.b").unwrap();
        assert!(dup.is_none());
    }

    #[test]
    fn rule_crud_and_pairs() {
        let conn = open_test_db();
        let rule = insert_rule(
            &conn,
            &NewManualRule {
                trigger_entity: "binary_sensor.door".to_string(),
                trigger_state: "on".to_string(),
                action_entity: "light.hallway".to_string(),
                action_service: "light.turn_on".to_string(),
                delay_secs: None,
                is_active: true,
            },
        )
        .unwrap();
        assert_eq!(rule.execution_count, 0);

        let pairs = active_rule_pairs(&conn).unwrap();
        assert_eq!(pairs.len(), 1);

        let updated = NewManualRule {
            trigger_entity: rule.trigger_entity.clone(),
            trigger_state: rule.trigger_state.clone(),
            action_entity: rule.action_entity.clone(),
            action_service: rule.action_service.clone(),
            delay_secs: Some(5),
            is_active: false,
        };
        update_rule(&conn, rule.id, &updated).unwrap();
        assert!(active_rule_pairs(&conn).unwrap().is_empty());

        assert!(delete_rule(&conn, rule.id).unwrap());
        assert!(!delete_rule(&conn, rule.id).unwrap());
    }
}
