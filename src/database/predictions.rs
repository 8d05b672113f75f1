use anyhow::{anyhow, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{Prediction, PredictionStatus, RejectionReason};

fn row_to_prediction(row: &rusqlite::Row) -> rusqlite::Result<Prediction> {
    let status: String = row.get(2)?;
    let reason: Option<String> = row.get(4)?;
    Ok(Prediction {
        id: row.get(0)?,
        pattern_id: row.get(1)?,
        status: PredictionStatus::parse(&status).unwrap_or(PredictionStatus::Pending),
        confidence: row.get(3)?,
        rejection_reason: reason.as_deref().and_then(RejectionReason::parse),
        created_at: row.get(5)?,
        decided_at: row.get(6)?,
    })
}

const COLUMNS: &str =
    "id, pattern_id, status, confidence, rejection_reason, created_at, decided_at";

pub fn get_prediction(conn: &Connection, id: i64) -> Result<Option<Prediction>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM predictions WHERE id = ?1", COLUMNS))?;
    let p = stmt.query_row([id], row_to_prediction).optional()?;
    Ok(p)
}

pub fn list_predictions(
    conn: &Connection,
    status: Option<PredictionStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Prediction>> {
    let sql = match status {
        Some(_) => format!(
            "SELECT {} FROM predictions WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            COLUMNS
        ),
        None => format!(
            "SELECT {} FROM predictions ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            COLUMNS
        ),
    };
    let params: Vec<Box<dyn rusqlite::types::ToSql>> = match status {
        Some(s) => vec![
            Box::new(s.as_str().to_string()),
            Box::new(limit + 1),
            Box::new(offset),
        ],
        None => vec![Box::new(limit + 1), Box::new(offset)],
    };
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(param_refs.as_slice(), row_to_prediction)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// An open prediction for a pattern, if one exists. Promotion checks this so
/// re-mining never spawns duplicates.
/// Whether the pattern was already auto-executed since the given time.
/// Guards against double-firing within one daily window.
pub fn executed_since(conn: &Connection, pattern_id: i64, since: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM predictions
         WHERE pattern_id = ?1 AND status = 'executed' AND created_at >= ?2",
        rusqlite::params![pattern_id, since],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn open_prediction_for_pattern(
    conn: &Connection,
    pattern_id: i64,
) -> Result<Option<Prediction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM predictions WHERE pattern_id = ?1 AND status = 'pending'",
        COLUMNS
    ))?;
    let p = stmt.query_row([pattern_id], row_to_prediction).optional()?;
    Ok(p)
}

pub fn insert_prediction(
    conn: &Connection,
    pattern_id: i64,
    status: PredictionStatus,
    confidence: f64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO predictions (pattern_id, status, confidence, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            pattern_id,
            status.as_str(),
            confidence,
            chrono::Utc::now().timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn settle_prediction(
    conn: &Connection,
    id: i64,
    status: PredictionStatus,
    reason: Option<RejectionReason>,
) -> Result<Prediction> {
    let changed = conn.execute(
        "UPDATE predictions SET status = ?2, rejection_reason = ?3, decided_at = ?4
         WHERE id = ?1",
        rusqlite::params![
            id,
            status.as_str(),
            reason.map(|r| r.as_str()),
            chrono::Utc::now().timestamp(),
        ],
    )?;
    if changed == 0 {
        return Err(anyhow!("prediction {} not found", id));
    }
    get_prediction(conn, id)?.ok_or_else(|| anyhow!("prediction {} not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;
    use crate::database::patterns::{insert_pattern, NewPattern, PatternKey};
    use crate::models::{PatternData, PatternStatus, PatternType};

    fn pattern_id(conn: &Connection) -> i64 {
        let key = PatternKey {
            pattern_type: PatternType::TimeBased,
            entity_id: "light.a".to_string(),
            target_state: "on".to_string(),
            trigger_entity: String::new(),
            trigger_state: String::new(),
        };
        insert_pattern(
            conn,
            &NewPattern {
                key: &key,
                room_id: "living_room",
                domain: "light",
                data: &PatternData::default(),
                confidence: 0.8,
                match_count: 10,
                status: PatternStatus::Suggested,
                last_observed: 0,
            },
        )
        .unwrap()
    }

    #[test]
    fn one_open_prediction_per_pattern() {
        let conn = open_test_db();
        let pid = pattern_id(&conn);
        assert!(open_prediction_for_pattern(&conn, pid).unwrap().is_none());
        insert_prediction(&conn, pid, PredictionStatus::Pending, 0.8).unwrap();
        assert!(open_prediction_for_pattern(&conn, pid).unwrap().is_some());
    }

    #[test]
    fn settle_records_reason_and_time() {
        let conn = open_test_db();
        let pid = pattern_id(&conn);
        let id = insert_prediction(&conn, pid, PredictionStatus::Pending, 0.8).unwrap();
        let p = settle_prediction(
            &conn,
            id,
            PredictionStatus::Rejected,
            Some(RejectionReason::Coincidence),
        )
        .unwrap();
        assert_eq!(p.status, PredictionStatus::Rejected);
        assert_eq!(p.rejection_reason, Some(RejectionReason::Coincidence));
        assert!(p.decided_at.is_some());
    }
}
