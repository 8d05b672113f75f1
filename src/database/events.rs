use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashMap;

use crate::models::{NewStateEvent, StateEvent, TimeBucket};

pub fn insert_event(conn: &Connection, event: &NewStateEvent, bucket: TimeBucket) -> Result<i64> {
    let attributes = serde_json::to_string(&event.attributes)?;
    let persons_home = serde_json::to_string(&event.persons_home)?;

    conn.execute(
        "INSERT INTO state_events
         (entity_id, old_state, new_state, attributes, timestamp, time_bucket, persons_home)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            &event.entity_id,
            event.old_state_or_unknown(),
            event.new_state_or_unknown(),
            &attributes,
            event.timestamp,
            bucket.as_str(),
            &persons_home,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<StateEvent> {
    let attributes: Option<String> = row.get(4)?;
    let persons_home: Option<String> = row.get(7)?;
    let bucket: String = row.get(6)?;
    Ok(StateEvent {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        old_state: row.get(2)?,
        new_state: row.get(3)?,
        attributes: attributes
            .and_then(|s| serde_json::from_str::<HashMap<String, serde_json::Value>>(&s).ok())
            .unwrap_or_default(),
        timestamp: row.get(5)?,
        time_bucket: TimeBucket::parse(&bucket).unwrap_or(TimeBucket::Night),
        persons_home: persons_home
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
    })
}

/// Windowed range query over [from, to) for one entity.
pub fn get_events_for_entity(
    conn: &Connection,
    entity_id: &str,
    from: i64,
    to: i64,
) -> Result<Vec<StateEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_id, old_state, new_state, attributes, timestamp, time_bucket, persons_home
         FROM state_events
         WHERE entity_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
         ORDER BY timestamp ASC",
    )?;

    let events = stmt
        .query_map(rusqlite::params![entity_id, from, to], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// All events in [from, to), ordered by time. Used by the batch miners over
/// a read-consistent snapshot.
pub fn get_events_in_range(conn: &Connection, from: i64, to: i64) -> Result<Vec<StateEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_id, old_state, new_state, attributes, timestamp, time_bucket, persons_home
         FROM state_events
         WHERE timestamp >= ?1 AND timestamp < ?2
         ORDER BY timestamp ASC",
    )?;

    let events = stmt
        .query_map([from, to], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Timestamp of the most recent update per entity, for offline detection.
pub fn last_update_per_entity(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, MAX(timestamp) FROM state_events GROUP BY entity_id",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// FIFO retention purge; runs on the maintenance pass, never on ingest.
pub fn purge_events_before(conn: &Connection, cutoff: i64) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM state_events WHERE timestamp < ?1", [cutoff])?;
    Ok(deleted)
}
