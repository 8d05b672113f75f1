use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;

use crate::models::{
    CalendarTrigger, DeviceGroup, Holiday, NewPersonSchedule, NewShiftTemplate,
    PersonSchedule, ScheduleType, ShiftTemplate,
};

const DATE_FMT: &str = "%Y-%m-%d";

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT).ok()
}

// --- shift templates ---------------------------------------------------------

fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<ShiftTemplate> {
    Ok(ShiftTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        short_code: row.get(2)?,
        color: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
    })
}

pub fn list_templates(conn: &Connection) -> Result<Vec<ShiftTemplate>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, short_code, color, start_time, end_time
         FROM shift_templates ORDER BY id ASC",
    )?;
    let templates = stmt
        .query_map([], row_to_template)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(templates)
}

pub fn get_template(conn: &Connection, id: i64) -> Result<Option<ShiftTemplate>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, short_code, color, start_time, end_time
         FROM shift_templates WHERE id = ?1",
    )?;
    let t = stmt.query_row([id], row_to_template).optional()?;
    Ok(t)
}

pub fn insert_template(conn: &Connection, new: &NewShiftTemplate) -> Result<ShiftTemplate> {
    conn.execute(
        "INSERT INTO shift_templates (name, short_code, color, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            &new.name,
            &new.short_code,
            &new.color,
            &new.start_time,
            &new.end_time,
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_template(conn, id)?.ok_or_else(|| anyhow!("shift template {} not found after insert", id))
}

pub fn update_template(conn: &Connection, id: i64, new: &NewShiftTemplate) -> Result<ShiftTemplate> {
    let changed = conn.execute(
        "UPDATE shift_templates
         SET name = ?2, short_code = ?3, color = ?4, start_time = ?5, end_time = ?6
         WHERE id = ?1",
        rusqlite::params![
            id,
            &new.name,
            &new.short_code,
            &new.color,
            &new.start_time,
            &new.end_time,
        ],
    )?;
    if changed == 0 {
        return Err(anyhow!("shift template {} not found", id));
    }
    get_template(conn, id)?.ok_or_else(|| anyhow!("shift template {} not found", id))
}

pub fn delete_template(conn: &Connection, id: i64) -> Result<bool> {
    conn.execute("DELETE FROM shift_assignments WHERE template_id = ?1", [id])?;
    let deleted = conn.execute("DELETE FROM shift_templates WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

// --- person schedules --------------------------------------------------------

fn row_to_schedule(row: &rusqlite::Row) -> rusqlite::Result<PersonSchedule> {
    let schedule_type: String = row.get(2)?;
    let rotation: String = row.get(5)?;
    let start: Option<String> = row.get(6)?;
    let end: Option<String> = row.get(7)?;
    Ok(PersonSchedule {
        id: row.get(0)?,
        person: row.get(1)?,
        schedule_type: ScheduleType::parse(&schedule_type).unwrap_or(ScheduleType::Custom),
        leave_time: row.get(3)?,
        return_time: row.get(4)?,
        rotation_pattern: serde_json::from_str(&rotation).unwrap_or_default(),
        rotation_start: start.as_deref().and_then(parse_date),
        rotation_end: end.as_deref().and_then(parse_date),
    })
}

const SCHEDULE_COLUMNS: &str = "id, person, schedule_type, leave_time, return_time, \
     rotation_pattern, rotation_start, rotation_end";

pub fn list_schedules(conn: &Connection) -> Result<Vec<PersonSchedule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM person_schedules ORDER BY id ASC",
        SCHEDULE_COLUMNS
    ))?;
    let schedules = stmt
        .query_map([], row_to_schedule)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(schedules)
}

pub fn get_schedule(conn: &Connection, id: i64) -> Result<Option<PersonSchedule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM person_schedules WHERE id = ?1",
        SCHEDULE_COLUMNS
    ))?;
    let s = stmt.query_row([id], row_to_schedule).optional()?;
    Ok(s)
}

pub fn insert_schedule(conn: &Connection, new: &NewPersonSchedule) -> Result<PersonSchedule> {
    let rotation = serde_json::to_string(&new.rotation_pattern)?;
    conn.execute(
        "INSERT INTO person_schedules
         (person, schedule_type, leave_time, return_time, rotation_pattern,
          rotation_start, rotation_end)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            &new.person,
            new.schedule_type.as_str(),
            &new.leave_time,
            &new.return_time,
            &rotation,
            new.rotation_start.map(|d| d.format(DATE_FMT).to_string()),
            new.rotation_end.map(|d| d.format(DATE_FMT).to_string()),
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_schedule(conn, id)?.ok_or_else(|| anyhow!("person schedule {} not found after insert", id))
}

pub fn update_schedule(conn: &Connection, id: i64, new: &NewPersonSchedule) -> Result<PersonSchedule> {
    let rotation = serde_json::to_string(&new.rotation_pattern)?;
    let changed = conn.execute(
        "UPDATE person_schedules
         SET person = ?2, schedule_type = ?3, leave_time = ?4, return_time = ?5,
             rotation_pattern = ?6, rotation_start = ?7, rotation_end = ?8
         WHERE id = ?1",
        rusqlite::params![
            id,
            &new.person,
            new.schedule_type.as_str(),
            &new.leave_time,
            &new.return_time,
            &rotation,
            new.rotation_start.map(|d| d.format(DATE_FMT).to_string()),
            new.rotation_end.map(|d| d.format(DATE_FMT).to_string()),
        ],
    )?;
    if changed == 0 {
        return Err(anyhow!("person schedule {} not found", id));
    }
    get_schedule(conn, id)?.ok_or_else(|| anyhow!("person schedule {} not found", id))
}

pub fn delete_schedule(conn: &Connection, id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM person_schedules WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

// --- imported shift assignments ----------------------------------------------

pub fn upsert_assignment(
    conn: &Connection,
    person: &str,
    date: NaiveDate,
    template_id: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO shift_assignments (person, date, template_id)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(person, date) DO UPDATE SET template_id = ?3",
        rusqlite::params![person, date.format(DATE_FMT).to_string(), template_id],
    )?;
    Ok(())
}

pub fn assignment_for(conn: &Connection, person: &str, date: NaiveDate) -> Result<Option<i64>> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT template_id FROM shift_assignments WHERE person = ?1 AND date = ?2",
            rusqlite::params![person, date.format(DATE_FMT).to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

// --- holidays ----------------------------------------------------------------

pub fn list_holidays(conn: &Connection) -> Result<Vec<Holiday>> {
    let mut stmt = conn.prepare("SELECT id, date, name FROM holidays ORDER BY date ASC")?;
    let holidays = stmt
        .query_map([], |row| {
            let date: String = row.get(1)?;
            Ok((row.get::<_, i64>(0)?, date, row.get::<_, String>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter_map(|(id, date, name)| parse_date(&date).map(|date| Holiday { id, date, name }))
        .collect();
    Ok(holidays)
}

pub fn insert_holiday(conn: &Connection, date: NaiveDate, name: &str) -> Result<Option<Holiday>> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO holidays (date, name) VALUES (?1, ?2)",
        rusqlite::params![date.format(DATE_FMT).to_string(), name],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(Some(Holiday {
        id: conn.last_insert_rowid(),
        date,
        name: name.to_string(),
    }))
}

pub fn delete_holiday(conn: &Connection, id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM holidays WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

pub fn is_holiday(conn: &Connection, date: NaiveDate) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM holidays WHERE date = ?1",
        [date.format(DATE_FMT).to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// --- device groups -----------------------------------------------------------

fn row_to_group(row: &rusqlite::Row) -> rusqlite::Result<DeviceGroup> {
    let entities: String = row.get(3)?;
    Ok(DeviceGroup {
        id: row.get(0)?,
        room_id: row.get(1)?,
        name: row.get(2)?,
        entities: serde_json::from_str(&entities).unwrap_or_default(),
    })
}

pub fn list_groups(conn: &Connection) -> Result<Vec<DeviceGroup>> {
    let mut stmt =
        conn.prepare("SELECT id, room_id, name, entities FROM device_groups ORDER BY id ASC")?;
    let groups = stmt
        .query_map([], row_to_group)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(groups)
}

pub fn get_group(conn: &Connection, id: i64) -> Result<Option<DeviceGroup>> {
    let mut stmt =
        conn.prepare("SELECT id, room_id, name, entities FROM device_groups WHERE id = ?1")?;
    let g = stmt.query_row([id], row_to_group).optional()?;
    Ok(g)
}

pub fn insert_group(conn: &Connection, room_id: &str, name: &str, entities: &[String]) -> Result<DeviceGroup> {
    let blob = serde_json::to_string(entities)?;
    conn.execute(
        "INSERT INTO device_groups (room_id, name, entities) VALUES (?1, ?2, ?3)",
        rusqlite::params![room_id, name, &blob],
    )?;
    let id = conn.last_insert_rowid();
    get_group(conn, id)?.ok_or_else(|| anyhow!("device group {} not found after insert", id))
}

pub fn update_group(conn: &Connection, id: i64, room_id: &str, name: &str, entities: &[String]) -> Result<DeviceGroup> {
    let blob = serde_json::to_string(entities)?;
    let changed = conn.execute(
        "UPDATE device_groups SET room_id = ?2, name = ?3, entities = ?4 WHERE id = ?1",
        rusqlite::params![id, room_id, name, &blob],
    )?;
    if changed == 0 {
        return Err(anyhow!("device group {} not found", id));
    }
    get_group(conn, id)?.ok_or_else(|| anyhow!("device group {} not found", id))
}

pub fn delete_group(conn: &Connection, id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM device_groups WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

/// entity_id → room_id map derived from the device groups. Entities outside
/// any group fall back to "unassigned" at the call site.
pub fn entity_room_map(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for group in list_groups(conn)? {
        for entity in group.entities {
            map.insert(entity, group.room_id.clone());
        }
    }
    Ok(map)
}

// --- calendar triggers -------------------------------------------------------

fn row_to_trigger(row: &rusqlite::Row) -> rusqlite::Result<CalendarTrigger> {
    Ok(CalendarTrigger {
        id: row.get(0)?,
        name: row.get(1)?,
        scene_id: row.get(2)?,
        at_timestamp: row.get(3)?,
        daily_time: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
    })
}

pub fn list_triggers(conn: &Connection) -> Result<Vec<CalendarTrigger>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, scene_id, at_timestamp, daily_time, is_active
         FROM calendar_triggers ORDER BY id ASC",
    )?;
    let triggers = stmt
        .query_map([], row_to_trigger)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(triggers)
}

pub fn get_trigger(conn: &Connection, id: i64) -> Result<Option<CalendarTrigger>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, scene_id, at_timestamp, daily_time, is_active
         FROM calendar_triggers WHERE id = ?1",
    )?;
    let t = stmt.query_row([id], row_to_trigger).optional()?;
    Ok(t)
}

pub fn insert_trigger(conn: &Connection, t: &CalendarTrigger) -> Result<CalendarTrigger> {
    conn.execute(
        "INSERT INTO calendar_triggers (name, scene_id, at_timestamp, daily_time, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            &t.name,
            &t.scene_id,
            t.at_timestamp,
            &t.daily_time,
            t.is_active as i64,
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_trigger(conn, id)?.ok_or_else(|| anyhow!("calendar trigger {} not found after insert", id))
}

pub fn update_trigger(conn: &Connection, id: i64, t: &CalendarTrigger) -> Result<CalendarTrigger> {
    let changed = conn.execute(
        "UPDATE calendar_triggers
         SET name = ?2, scene_id = ?3, at_timestamp = ?4, daily_time = ?5, is_active = ?6
         WHERE id = ?1",
        rusqlite::params![
            id,
            &t.name,
            &t.scene_id,
            t.at_timestamp,
            &t.daily_time,
            t.is_active as i64,
        ],
    )?;
    if changed == 0 {
        return Err(anyhow!("calendar trigger {} not found", id));
    }
    get_trigger(conn, id)?.ok_or_else(|| anyhow!("calendar trigger {} not found", id))
}

/// One-shot triggers are switched off after firing instead of deleted, so
/// the dashboard still shows them.
pub fn set_trigger_active(conn: &Connection, id: i64, active: bool) -> Result<()> {
    conn.execute(
        "UPDATE calendar_triggers SET is_active = ?2 WHERE id = ?1",
        rusqlite::params![id, active as i64],
    )?;
    Ok(())
}

pub fn delete_trigger(conn: &Connection, id: i64) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM calendar_triggers WHERE id = ?1", [id])?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;

    #[test]
    fn template_and_assignment_roundtrip() {
        let conn = open_test_db();
        let t = insert_template(
            &conn,
            &NewShiftTemplate {
                name: "Early".to_string(),
                short_code: "F".to_string(),
                color: "#ff0000".to_string(),
                start_time: Some("06:00".to_string()),
                end_time: Some("14:00".to_string()),
            },
        )
        .unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        upsert_assignment(&conn, "anna", date, t.id).unwrap();
        assert_eq!(assignment_for(&conn, "anna", date).unwrap(), Some(t.id));

        // Re-import overwrites, no duplicate
        upsert_assignment(&conn, "anna", date, t.id).unwrap();
        assert_eq!(assignment_for(&conn, "anna", date).unwrap(), Some(t.id));
    }

    #[test]
    fn entity_room_map_flattens_groups() {
        let conn = open_test_db();
        insert_group(
            &conn,
            "living_room",
            "Lights",
            &["light.couch".to_string(), "light.tv".to_string()],
        )
        .unwrap();
        let map = entity_room_map(&conn).unwrap();
        assert_eq!(map.get("light.couch").map(String::as_str), Some("living_room"));
    }

    #[test]
    fn duplicate_holiday_date_is_ignored() {
        let conn = open_test_db();
        let date = NaiveDate::from_ymd_opt(2026, 12, 24).unwrap();
        assert!(insert_holiday(&conn, date, "Christmas Eve").unwrap().is_some());
        assert!(insert_holiday(&conn, date, "Duplicate").unwrap().is_none());
        assert!(is_holiday(&conn, date).unwrap());
    }
}
