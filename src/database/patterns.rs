use anyhow::{anyhow, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{
    Pattern, PatternData, PatternStatus, PatternType, RejectionReason,
};

/// Key that identifies a mined pattern across re-mining passes.
#[derive(Debug, Clone)]
pub struct PatternKey {
    pub pattern_type: PatternType,
    pub entity_id: String,
    pub target_state: String,
    pub trigger_entity: String,
    pub trigger_state: String,
}

fn row_to_pattern(row: &rusqlite::Row) -> rusqlite::Result<Pattern> {
    let pattern_type: String = row.get(1)?;
    let status: String = row.get(9)?;
    let rejection: Option<String> = row.get(11)?;
    let data: String = row.get(6)?;
    Ok(Pattern {
        id: row.get(0)?,
        pattern_type: PatternType::parse(&pattern_type).unwrap_or(PatternType::TimeBased),
        room_id: row.get(2)?,
        domain: row.get(3)?,
        entity_id: row.get(4)?,
        target_state: row.get(5)?,
        trigger_entity: row.get(14)?,
        trigger_state: row.get(15)?,
        pattern_data: serde_json::from_str::<PatternData>(&data).unwrap_or_default(),
        confidence: row.get(7)?,
        match_count: row.get(8)?,
        status: PatternStatus::parse(&status).unwrap_or(PatternStatus::Observed),
        test_mode: row.get::<_, i64>(10)? != 0,
        rejection_reason: rejection.as_deref().and_then(RejectionReason::parse),
        last_observed: row.get(12)?,
        created_at: row.get(13)?,
    })
}

const PATTERN_COLUMNS: &str = "id, pattern_type, room_id, domain, entity_id, target_state, \
     pattern_data, confidence, match_count, status, test_mode, rejection_reason, \
     last_observed, created_at, trigger_entity, trigger_state";

pub fn get_pattern(conn: &Connection, id: i64) -> Result<Option<Pattern>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM patterns WHERE id = ?1",
        PATTERN_COLUMNS
    ))?;
    let pattern = stmt.query_row([id], row_to_pattern).optional()?;
    Ok(pattern)
}

pub fn find_by_key(conn: &Connection, key: &PatternKey) -> Result<Option<Pattern>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM patterns
         WHERE pattern_type = ?1 AND entity_id = ?2 AND target_state = ?3
           AND trigger_entity = ?4 AND trigger_state = ?5",
        PATTERN_COLUMNS
    ))?;
    let pattern = stmt
        .query_row(
            rusqlite::params![
                key.pattern_type.as_str(),
                &key.entity_id,
                &key.target_state,
                &key.trigger_entity,
                &key.trigger_state,
            ],
            row_to_pattern,
        )
        .optional()?;
    Ok(pattern)
}

/// Fetches limit+1 rows; the caller turns the extra row into `has_more`.
pub fn list_patterns(
    conn: &Connection,
    status: Option<PatternStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Pattern>> {
    let params: Vec<Box<dyn rusqlite::types::ToSql>> = match status {
        Some(s) => vec![
            Box::new(s.as_str().to_string()),
            Box::new(limit + 1),
            Box::new(offset),
        ],
        None => vec![Box::new(limit + 1), Box::new(offset)],
    };
    let sql = match status {
        Some(_) => format!(
            "SELECT {} FROM patterns WHERE status = ?1 ORDER BY confidence DESC, id ASC LIMIT ?2 OFFSET ?3",
            PATTERN_COLUMNS
        ),
        None => format!(
            "SELECT {} FROM patterns ORDER BY confidence DESC, id ASC LIMIT ?1 OFFSET ?2",
            PATTERN_COLUMNS
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let patterns = stmt
        .query_map(param_refs.as_slice(), row_to_pattern)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(patterns)
}

pub fn list_by_statuses(conn: &Connection, statuses: &[PatternStatus]) -> Result<Vec<Pattern>> {
    let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT {} FROM patterns WHERE status IN ({}) ORDER BY id ASC",
        PATTERN_COLUMNS,
        placeholders.join(",")
    );
    let params: Vec<Box<dyn rusqlite::types::ToSql>> = statuses
        .iter()
        .map(|s| Box::new(s.as_str().to_string()) as Box<dyn rusqlite::types::ToSql>)
        .collect();
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let patterns = stmt
        .query_map(param_refs.as_slice(), row_to_pattern)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(patterns)
}

pub struct NewPattern<'a> {
    pub key: &'a PatternKey,
    pub room_id: &'a str,
    pub domain: &'a str,
    pub data: &'a PatternData,
    pub confidence: f64,
    pub match_count: i64,
    pub status: PatternStatus,
    pub last_observed: i64,
}

pub fn insert_pattern(conn: &Connection, p: &NewPattern) -> Result<i64> {
    let data = serde_json::to_string(p.data)?;
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO patterns
         (pattern_type, room_id, domain, entity_id, target_state, pattern_data,
          confidence, match_count, status, test_mode, rejection_reason,
          last_observed, created_at, trigger_entity, trigger_state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, NULL, ?10, ?11, ?12, ?13)",
        rusqlite::params![
            p.key.pattern_type.as_str(),
            p.room_id,
            p.domain,
            &p.key.entity_id,
            &p.key.target_state,
            &data,
            p.confidence,
            p.match_count,
            p.status.as_str(),
            p.last_observed,
            now,
            &p.key.trigger_entity,
            &p.key.trigger_state,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Re-mining refresh: data, confidence and counters only. Status is left
/// untouched unless the caller promotes separately.
pub fn update_mining_fields(
    conn: &Connection,
    id: i64,
    data: &PatternData,
    confidence: f64,
    match_count: i64,
    last_observed: i64,
) -> Result<()> {
    let data = serde_json::to_string(data)?;
    conn.execute(
        "UPDATE patterns
         SET pattern_data = ?2, confidence = ?3, match_count = ?4, last_observed = ?5
         WHERE id = ?1",
        rusqlite::params![id, &data, confidence, match_count, last_observed],
    )?;
    Ok(())
}

/// Guarded status transition. Returns the updated pattern; an illegal
/// transition is an error the api layer maps to a conflict.
pub fn transition_status(
    conn: &Connection,
    id: i64,
    next: PatternStatus,
    reason: Option<RejectionReason>,
) -> Result<Pattern> {
    let tx = conn.unchecked_transaction()?;
    let updated = transition_status_in(&tx, id, next, reason)?;
    tx.commit()?;
    Ok(updated)
}

/// Check-and-update half of `transition_status`, for callers that already
/// hold a transaction.
pub fn transition_status_in(
    conn: &Connection,
    id: i64,
    next: PatternStatus,
    reason: Option<RejectionReason>,
) -> Result<Pattern> {
    let current = get_pattern(conn, id)?.ok_or_else(|| anyhow!("pattern {} not found", id))?;
    if !current.status.can_transition_to(next) {
        return Err(anyhow!(
            "illegal pattern transition {} -> {}",
            current.status.as_str(),
            next.as_str()
        ));
    }
    conn.execute(
        "UPDATE patterns SET status = ?2, rejection_reason = ?3 WHERE id = ?1",
        rusqlite::params![id, next.as_str(), reason.map(|r| r.as_str())],
    )?;
    let mut updated = current;
    updated.status = next;
    updated.rejection_reason = reason;
    Ok(updated)
}

pub fn set_test_mode(conn: &Connection, id: i64, test_mode: bool) -> Result<()> {
    let changed = conn.execute(
        "UPDATE patterns SET test_mode = ?2 WHERE id = ?1",
        rusqlite::params![id, test_mode as i64],
    )?;
    if changed == 0 {
        return Err(anyhow!("pattern {} not found", id));
    }
    Ok(())
}

pub fn set_confidence(conn: &Connection, id: i64, confidence: f64) -> Result<()> {
    conn.execute(
        "UPDATE patterns SET confidence = ?2 WHERE id = ?1",
        rusqlite::params![id, confidence.clamp(0.0, 1.0)],
    )?;
    Ok(())
}

pub fn delete_patterns_for_scope(conn: &Connection, room_id: &str, domain: &str) -> Result<usize> {
    // Predictions referencing the scope's patterns go with them.
    conn.execute(
        "DELETE FROM predictions WHERE pattern_id IN
         (SELECT id FROM patterns WHERE room_id = ?1 AND domain = ?2)",
        rusqlite::params![room_id, domain],
    )?;
    let deleted = conn.execute(
        "DELETE FROM patterns WHERE room_id = ?1 AND domain = ?2",
        rusqlite::params![room_id, domain],
    )?;
    Ok(deleted)
}

/// Aggregates used by the learning-phase promotion check. Only patterns at
/// or above the confidence floor count, and only live statuses.
pub struct ScopeStats {
    pub qualified_patterns: i64,
    pub total_match_count: i64,
}

pub fn scope_stats(
    conn: &Connection,
    room_id: &str,
    domain: &str,
    min_confidence: f64,
) -> Result<ScopeStats> {
    let (qualified_patterns, total_match_count) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN confidence >= ?3 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN confidence >= ?3 THEN match_count ELSE 0 END), 0)
         FROM patterns
         WHERE room_id = ?1 AND domain = ?2
           AND status IN ('observed', 'suggested', 'active')",
        rusqlite::params![room_id, domain, min_confidence],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(ScopeStats {
        qualified_patterns,
        total_match_count,
    })
}

// --- suppression fingerprints ------------------------------------------------

pub fn add_suppression(conn: &Connection, key: &PatternKey) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO suppressions
         (pattern_type, entity_id, target_state, trigger_entity, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            key.pattern_type.as_str(),
            &key.entity_id,
            &key.target_state,
            &key.trigger_entity,
            chrono::Utc::now().timestamp(),
        ],
    )?;
    Ok(())
}

pub fn is_suppressed(conn: &Connection, key: &PatternKey) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM suppressions
         WHERE pattern_type = ?1 AND entity_id = ?2 AND target_state = ?3
           AND trigger_entity = ?4",
        rusqlite::params![
            key.pattern_type.as_str(),
            &key.entity_id,
            &key.target_state,
            &key.trigger_entity,
        ],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn clear_suppression(conn: &Connection, key: &PatternKey) -> Result<()> {
    conn.execute(
        "DELETE FROM suppressions
         WHERE pattern_type = ?1 AND entity_id = ?2 AND target_state = ?3
           AND trigger_entity = ?4",
        rusqlite::params![
            key.pattern_type.as_str(),
            &key.entity_id,
            &key.target_state,
            &key.trigger_entity,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;

    fn key(entity: &str) -> PatternKey {
        PatternKey {
            pattern_type: PatternType::TimeBased,
            entity_id: entity.to_string(),
            target_state: "on".to_string(),
            trigger_entity: String::new(),
            trigger_state: String::new(),
        }
    }

    fn insert_test_pattern(conn: &Connection, entity: &str, status: PatternStatus) -> i64 {
        let k = key(entity);
        insert_pattern(
            conn,
            &NewPattern {
                key: &k,
                room_id: "living_room",
                domain: "light",
                data: &PatternData::default(),
                confidence: 0.75,
                match_count: 8,
                status,
                last_observed: 1000,
            },
        )
        .unwrap()
    }

    #[test]
    fn transition_guard_rejects_illegal_moves() {
        let conn = open_test_db();
        let id = insert_test_pattern(&conn, "light.a", PatternStatus::Observed);

        // observed -> active skips suggested and must fail
        assert!(transition_status(&conn, id, PatternStatus::Active, None).is_err());

        let p = transition_status(&conn, id, PatternStatus::Suggested, None).unwrap();
        assert_eq!(p.status, PatternStatus::Suggested);
        let p = transition_status(&conn, id, PatternStatus::Active, None).unwrap();
        assert_eq!(p.status, PatternStatus::Active);
    }

    #[test]
    fn rejection_stores_reason() {
        let conn = open_test_db();
        let id = insert_test_pattern(&conn, "light.a", PatternStatus::Suggested);
        let p = transition_status(
            &conn,
            id,
            PatternStatus::Rejected,
            Some(RejectionReason::Unwanted),
        )
        .unwrap();
        assert_eq!(p.rejection_reason, Some(RejectionReason::Unwanted));
        let stored = get_pattern(&conn, id).unwrap().unwrap();
        assert_eq!(stored.status, PatternStatus::Rejected);
    }

    #[test]
    fn suppression_roundtrip() {
        let conn = open_test_db();
        let k = key("light.a");
        assert!(!is_suppressed(&conn, &k).unwrap());
        add_suppression(&conn, &k).unwrap();
        assert!(is_suppressed(&conn, &k).unwrap());
        clear_suppression(&conn, &k).unwrap();
        assert!(!is_suppressed(&conn, &k).unwrap());
    }

    #[test]
    fn scope_reset_deletes_patterns() {
        let conn = open_test_db();
        insert_test_pattern(&conn, "light.a", PatternStatus::Suggested);
        insert_test_pattern(&conn, "light.b", PatternStatus::Observed);
        let deleted = delete_patterns_for_scope(&conn, "living_room", "light").unwrap();
        assert_eq!(deleted, 2);
    }

    #[test]
    fn list_pagination_overfetches_one() {
        let conn = open_test_db();
        for i in 0..5 {
            insert_test_pattern(&conn, &format!("light.p{}", i), PatternStatus::Observed);
        }
        let page = list_patterns(&conn, Some(PatternStatus::Observed), 3, 0).unwrap();
        assert_eq!(page.len(), 4); // limit + 1 so the caller can compute has_more
    }
}
