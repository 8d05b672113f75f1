use anyhow::Result;
use rusqlite::Connection;

use crate::database;
use crate::models::{
    AnomalySeverity, NotificationType, Pattern, PatternStatus, PatternType,
};
use crate::state::{AppState, DispatchEvent};

/// One contradictory pair of learned behaviors, described for a person.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Conflict {
    pub first_pattern_id: i64,
    pub second_pattern_id: i64,
    pub entity_id: String,
    pub message: String,
}

pub fn run_conflict_scan(state: &AppState) -> Result<()> {
    let conn = state.conn()?;
    let conflicts = find_conflicts(&conn)?;
    for conflict in &conflicts {
        // One open notification per finding; re-raise only after it was read.
        if database::notifications::unread_with_message_exists(
            &conn,
            NotificationType::Conflict,
            &conflict.message,
        )? {
            continue;
        }
        let _ = state.dispatch_tx.try_send(DispatchEvent {
            notification_type: NotificationType::Conflict,
            severity: AnomalySeverity::Medium,
            title: "Conflicting automations".to_string(),
            message: conflict.message.clone(),
            person: None,
        });
    }
    if !conflicts.is_empty() {
        log::info!("[Conflict] {} conflicting pattern pairs found", conflicts.len());
    }
    Ok(())
}

/// Pairwise scan of surfaced patterns. Two patterns conflict when they
/// drive the same entity to different states in overlapping situations:
/// overlapping daily windows for time patterns, or the same trigger for
/// event chains.
pub fn find_conflicts(conn: &Connection) -> Result<Vec<Conflict>> {
    let patterns = database::patterns::list_by_statuses(
        conn,
        &[PatternStatus::Suggested, PatternStatus::Active],
    )?;

    let mut conflicts = Vec::new();
    for (i, a) in patterns.iter().enumerate() {
        for b in patterns.iter().skip(i + 1) {
            if a.entity_id != b.entity_id || a.target_state == b.target_state {
                continue;
            }
            let clash = match (a.pattern_type, b.pattern_type) {
                (PatternType::TimeBased, PatternType::TimeBased) => windows_overlap(a, b),
                (PatternType::EventChain, PatternType::EventChain) => {
                    a.trigger_entity == b.trigger_entity && a.trigger_state == b.trigger_state
                }
                _ => false,
            };
            if clash {
                conflicts.push(Conflict {
                    first_pattern_id: a.id,
                    second_pattern_id: b.id,
                    entity_id: a.entity_id.clone(),
                    message: describe(a, b),
                });
            }
        }
    }
    Ok(conflicts)
}

fn window_bounds(p: &Pattern) -> Option<(i64, i64)> {
    let hour = p.pattern_data.avg_hour? as i64;
    let minute = p.pattern_data.avg_minute.unwrap_or(0) as i64;
    let half = p.pattern_data.time_window_min.unwrap_or(30) as i64 / 2;
    let center = hour * 60 + minute;
    Some((center - half, center + half))
}

fn windows_overlap(a: &Pattern, b: &Pattern) -> bool {
    let (Some((a_from, a_to)), Some((b_from, b_to))) = (window_bounds(a), window_bounds(b)) else {
        return false;
    };
    // Compare on a doubled day axis so windows spanning midnight still
    // overlap correctly.
    for shift in [-1440i64, 0, 1440] {
        if a_from.max(b_from + shift) <= a_to.min(b_to + shift) {
            return true;
        }
    }
    false
}

fn describe(a: &Pattern, b: &Pattern) -> String {
    match a.pattern_type {
        PatternType::TimeBased => format!(
            "{} is set to '{}' and '{}' at overlapping times (around {:02}:{:02} and {:02}:{:02})",
            a.entity_id,
            a.target_state,
            b.target_state,
            a.pattern_data.avg_hour.unwrap_or(0),
            a.pattern_data.avg_minute.unwrap_or(0),
            b.pattern_data.avg_hour.unwrap_or(0),
            b.pattern_data.avg_minute.unwrap_or(0),
        ),
        _ => format!(
            "{} '{}' triggers both '{}' and '{}' on {}",
            a.trigger_entity, a.trigger_state, a.target_state, b.target_state, a.entity_id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;
    use crate::database::patterns::{NewPattern, PatternKey};
    use crate::models::PatternData;

    fn seed_time_pattern(
        conn: &Connection,
        entity: &str,
        target: &str,
        hour: u32,
        window_min: u32,
    ) -> i64 {
        database::patterns::insert_pattern(
            conn,
            &NewPattern {
                key: &PatternKey {
                    pattern_type: PatternType::TimeBased,
                    entity_id: entity.to_string(),
                    target_state: target.to_string(),
                    trigger_entity: String::new(),
                    trigger_state: String::new(),
                },
                room_id: "living_room",
                domain: "light",
                data: &PatternData {
                    avg_hour: Some(hour),
                    avg_minute: Some(0),
                    time_window_min: Some(window_min),
                    ..Default::default()
                },
                confidence: 0.9,
                match_count: 10,
                status: PatternStatus::Observed,
                last_observed: 0,
            },
        )
        .unwrap()
    }

    fn surface(conn: &Connection, id: i64) {
        database::patterns::transition_status(conn, id, PatternStatus::Suggested, None).unwrap();
    }

    #[test]
    fn opposing_states_in_overlapping_windows_conflict() {
        let conn = open_test_db();
        let a = seed_time_pattern(&conn, "light.porch", "on", 18, 60);
        let b = seed_time_pattern(&conn, "light.porch", "off", 18, 60);
        surface(&conn, a);
        surface(&conn, b);

        let conflicts = find_conflicts(&conn).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entity_id, "light.porch");
        assert!(conflicts[0].message.contains("light.porch"));
    }

    #[test]
    fn disjoint_windows_do_not_conflict() {
        let conn = open_test_db();
        let a = seed_time_pattern(&conn, "light.porch", "on", 7, 30);
        let b = seed_time_pattern(&conn, "light.porch", "off", 22, 30);
        surface(&conn, a);
        surface(&conn, b);
        assert!(find_conflicts(&conn).unwrap().is_empty());
    }

    #[test]
    fn observed_patterns_are_ignored() {
        let conn = open_test_db();
        seed_time_pattern(&conn, "light.porch", "on", 18, 60);
        seed_time_pattern(&conn, "light.porch", "off", 18, 60);
        assert!(find_conflicts(&conn).unwrap().is_empty());
    }

    #[test]
    fn midnight_spanning_windows_overlap() {
        let conn = open_test_db();
        let a = seed_time_pattern(&conn, "light.porch", "on", 23, 120);
        let b = seed_time_pattern(&conn, "light.porch", "off", 0, 120);
        surface(&conn, a);
        surface(&conn, b);
        assert_eq!(find_conflicts(&conn).unwrap().len(), 1);
    }
}
