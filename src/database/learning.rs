use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

use crate::models::{LearningPhase, LearningPhaseState};

fn row_to_state(row: &rusqlite::Row) -> rusqlite::Result<LearningPhaseState> {
    let phase: String = row.get(2)?;
    Ok(LearningPhaseState {
        room_id: row.get(0)?,
        domain: row.get(1)?,
        phase: LearningPhase::parse(&phase).unwrap_or(LearningPhase::Observing),
        confidence_score: row.get(3)?,
        confirmed_count: row.get(4)?,
        rejected_count: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const COLUMNS: &str =
    "room_id, domain, phase, confidence_score, confirmed_count, rejected_count, updated_at";

pub fn get_phase(conn: &Connection, room_id: &str, domain: &str) -> Result<Option<LearningPhaseState>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM learning_phases WHERE room_id = ?1 AND domain = ?2",
        COLUMNS
    ))?;
    let state = stmt
        .query_row(rusqlite::params![room_id, domain], row_to_state)
        .optional()?;
    Ok(state)
}

/// Scopes start in observing the first time they are touched.
pub fn get_or_create_phase(conn: &Connection, room_id: &str, domain: &str) -> Result<LearningPhaseState> {
    if let Some(state) = get_phase(conn, room_id, domain)? {
        return Ok(state);
    }
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT OR IGNORE INTO learning_phases
         (room_id, domain, phase, confidence_score, confirmed_count, rejected_count, updated_at)
         VALUES (?1, ?2, 'observing', 0, 0, 0, ?3)",
        rusqlite::params![room_id, domain, now],
    )?;
    Ok(LearningPhaseState {
        room_id: room_id.to_string(),
        domain: domain.to_string(),
        phase: LearningPhase::Observing,
        confidence_score: 0.0,
        confirmed_count: 0,
        rejected_count: 0,
        updated_at: now,
    })
}

pub fn list_phases(conn: &Connection) -> Result<Vec<LearningPhaseState>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM learning_phases ORDER BY room_id, domain",
        COLUMNS
    ))?;
    let states = stmt
        .query_map([], row_to_state)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(states)
}

pub fn set_phase(
    conn: &Connection,
    room_id: &str,
    domain: &str,
    phase: LearningPhase,
    confidence_score: f64,
) -> Result<()> {
    conn.execute(
        "UPDATE learning_phases
         SET phase = ?3, confidence_score = ?4, updated_at = ?5
         WHERE room_id = ?1 AND domain = ?2",
        rusqlite::params![
            room_id,
            domain,
            phase.as_str(),
            confidence_score,
            chrono::Utc::now().timestamp(),
        ],
    )?;
    Ok(())
}

pub fn record_decision(conn: &Connection, room_id: &str, domain: &str, confirmed: bool) -> Result<()> {
    let column = if confirmed { "confirmed_count" } else { "rejected_count" };
    conn.execute(
        &format!(
            "UPDATE learning_phases SET {} = {} + 1, updated_at = ?3
             WHERE room_id = ?1 AND domain = ?2",
            column, column
        ),
        rusqlite::params![room_id, domain, chrono::Utc::now().timestamp()],
    )?;
    Ok(())
}

/// Manual, irreversible reset: back to observing with zeroed counters.
/// Pattern deletion happens in the same transaction at the service layer.
pub fn reset_phase(conn: &Connection, room_id: &str, domain: &str) -> Result<()> {
    conn.execute(
        "UPDATE learning_phases
         SET phase = 'observing', confidence_score = 0,
             confirmed_count = 0, rejected_count = 0, updated_at = ?3
         WHERE room_id = ?1 AND domain = ?2",
        rusqlite::params![room_id, domain, chrono::Utc::now().timestamp()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;

    #[test]
    fn scopes_start_observing() {
        let conn = open_test_db();
        let state = get_or_create_phase(&conn, "kitchen", "light").unwrap();
        assert_eq!(state.phase, LearningPhase::Observing);
        assert_eq!(state.confirmed_count, 0);
    }

    #[test]
    fn reset_returns_to_observing_and_zeroes_counters() {
        let conn = open_test_db();
        get_or_create_phase(&conn, "kitchen", "light").unwrap();
        set_phase(&conn, "kitchen", "light", LearningPhase::Autonomous, 0.9).unwrap();
        record_decision(&conn, "kitchen", "light", true).unwrap();

        reset_phase(&conn, "kitchen", "light").unwrap();
        let state = get_phase(&conn, "kitchen", "light").unwrap().unwrap();
        assert_eq!(state.phase, LearningPhase::Observing);
        assert_eq!(state.confirmed_count, 0);
        assert_eq!(state.confidence_score, 0.0);
    }
}
