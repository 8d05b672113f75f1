use anyhow::Result;
use chrono::NaiveDate;
use regex::Regex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::database;
use crate::models::{
    PersonSchedule, ScheduleType, ShiftAssignment, ShiftPlanImportResult, ShiftTemplate,
    UnmatchedToken,
};

/// What a person's schedule says about one specific date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayShift {
    /// Working the named shift block.
    Working { short_code: String, start_time: Option<String>, end_time: Option<String> },
    /// Off-day: rotation code with no time block, or "X"/"-".
    Off,
    /// The date falls outside the schedule's validity.
    NotScheduled,
}

/// Resolves a rotating schedule for one date. The rotation repeats from its
/// anchor date; dates before the anchor or past the end are not scheduled.
pub fn active_shift_for_date(
    schedule: &PersonSchedule,
    templates: &[ShiftTemplate],
    date: NaiveDate,
) -> DayShift {
    if schedule.schedule_type != ScheduleType::Shift || schedule.rotation_pattern.is_empty() {
        return DayShift::NotScheduled;
    }
    let Some(start) = schedule.rotation_start else {
        return DayShift::NotScheduled;
    };
    if date < start {
        return DayShift::NotScheduled;
    }
    if schedule.rotation_end.map_or(false, |end| date > end) {
        return DayShift::NotScheduled;
    }

    let offset = (date - start).num_days() as usize % schedule.rotation_pattern.len();
    let code = schedule.rotation_pattern[offset].trim();
    if code.is_empty() || is_off_token(code) {
        return DayShift::Off;
    }
    match find_template(templates, code) {
        Some(t) if t.start_time.is_some() => DayShift::Working {
            short_code: t.short_code.clone(),
            start_time: t.start_time.clone(),
            end_time: t.end_time.clone(),
        },
        Some(_) => DayShift::Off,
        None => DayShift::Off,
    }
}

/// Explicit imported assignments win over the rotation.
pub fn shift_for_date(
    conn: &Connection,
    schedule: &PersonSchedule,
    templates: &[ShiftTemplate],
    date: NaiveDate,
) -> Result<DayShift> {
    if let Some(template_id) = database::schedule::assignment_for(conn, &schedule.person, date)? {
        if let Some(t) = templates.iter().find(|t| t.id == template_id) {
            return Ok(if t.start_time.is_some() {
                DayShift::Working {
                    short_code: t.short_code.clone(),
                    start_time: t.start_time.clone(),
                    end_time: t.end_time.clone(),
                }
            } else {
                DayShift::Off
            });
        }
    }
    Ok(active_shift_for_date(schedule, templates, date))
}

/// Expected to be home at the given local time, judging by the shift block.
/// Working hours count as away; everything else as home.
pub fn expected_home(shift: &DayShift, minute_of_day: i64) -> bool {
    match shift {
        DayShift::Working { start_time: Some(start), end_time: Some(end), .. } => {
            let (Some(s), Some(e)) = (parse_minute(start), parse_minute(end)) else {
                return true;
            };
            if s <= e {
                !(minute_of_day >= s && minute_of_day < e)
            } else {
                // Night shift spans midnight
                !(minute_of_day >= s || minute_of_day < e)
            }
        }
        _ => true,
    }
}

fn is_off_token(token: &str) -> bool {
    matches!(token, "X" | "x" | "-" | "frei" | "Frei" | "off" | "Off")
}

fn find_template<'a>(templates: &'a [ShiftTemplate], code: &str) -> Option<&'a ShiftTemplate> {
    templates
        .iter()
        .find(|t| t.short_code.eq_ignore_ascii_case(code))
}

fn parse_minute(hhmm: &str) -> Option<i64> {
    let (h, m) = hhmm.split_once(':')?;
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

fn parse_date(token: &str) -> Option<NaiveDate> {
    for format in ["%d.%m.%Y", "%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(token, format) {
            return Some(date);
        }
    }
    None
}

fn plan_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<date>\d{1,2}\.\d{1,2}\.\d{4}|\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})[:\s]+(?P<token>\S+)",
        )
        .unwrap()
    })
}

/// Extracts (date, shift code) pairs from a pasted plan. One pair per line;
/// lines without a recognizable date are skipped. Pure text in, pairs out;
/// template resolution and persistence happen in the import operation.
pub fn parse_shift_plan_text(text: &str) -> Vec<(NaiveDate, String)> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let Some(caps) = plan_line_re().captures(line.trim()) else {
            continue;
        };
        let Some(date) = parse_date(&caps["date"]) else {
            continue;
        };
        entries.push((date, caps["token"].to_string()));
    }
    entries
}

/// Resolves extracted plan entries against the shift templates. Off-day
/// tokens are dropped, unknown codes are reported back as unmatched.
pub fn resolve_plan_entries(
    entries: Vec<(NaiveDate, String)>,
    templates: &[ShiftTemplate],
) -> ShiftPlanImportResult {
    let mut assignments = Vec::new();
    let mut unmatched = Vec::new();
    for (date, token) in entries {
        if is_off_token(&token) {
            continue;
        }
        match find_template(templates, &token) {
            Some(t) => assignments.push(ShiftAssignment {
                date,
                short_code: t.short_code.clone(),
                template_id: t.id,
            }),
            None => unmatched.push(UnmatchedToken { date, raw_token: token }),
        }
    }
    ShiftPlanImportResult { assignments, unmatched }
}

/// Presence expectation per person for a date and local time, for the
/// anomaly detector and the dashboard.
pub fn presence_map(
    conn: &Connection,
    date: NaiveDate,
    minute_of_day: i64,
) -> Result<HashMap<String, bool>> {
    let templates = database::schedule::list_templates(conn)?;
    let mut map = HashMap::new();
    for schedule in database::schedule::list_schedules(conn)? {
        let shift = shift_for_date(conn, &schedule, &templates, date)?;
        map.insert(schedule.person.clone(), expected_home(&shift, minute_of_day));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;
    use crate::models::{NewPersonSchedule, NewShiftTemplate};

    fn templates() -> Vec<ShiftTemplate> {
        vec![
            ShiftTemplate {
                id: 1,
                name: "Early".to_string(),
                short_code: "F".to_string(),
                color: "#4caf50".to_string(),
                start_time: Some("06:00".to_string()),
                end_time: Some("14:00".to_string()),
            },
            ShiftTemplate {
                id: 2,
                name: "Late".to_string(),
                short_code: "S".to_string(),
                color: "#ff9800".to_string(),
                start_time: Some("14:00".to_string()),
                end_time: Some("22:00".to_string()),
            },
            ShiftTemplate {
                id: 3,
                name: "Night".to_string(),
                short_code: "N".to_string(),
                color: "#3f51b5".to_string(),
                start_time: Some("22:00".to_string()),
                end_time: Some("06:00".to_string()),
            },
        ]
    }

    fn rotation_schedule() -> PersonSchedule {
        PersonSchedule {
            id: 1,
            person: "anna".to_string(),
            schedule_type: ScheduleType::Shift,
            leave_time: None,
            return_time: None,
            rotation_pattern: vec!["F", "F", "S", "S", "N", "N", "X"]
                .into_iter()
                .map(String::from)
                .collect(),
            rotation_start: NaiveDate::from_ymd_opt(2026, 1, 1),
            rotation_end: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn rotation_arithmetic_walks_the_pattern() {
        let schedule = rotation_schedule();
        let templates = templates();
        // Day offsets 0..6 from 2026-01-01: F F S S N N X
        let shift = active_shift_for_date(&schedule, &templates, date(2026, 1, 6));
        assert_eq!(
            shift,
            DayShift::Working {
                short_code: "N".to_string(),
                start_time: Some("22:00".to_string()),
                end_time: Some("06:00".to_string()),
            }
        );
        assert_eq!(
            active_shift_for_date(&schedule, &templates, date(2026, 1, 7)),
            DayShift::Off
        );
        // Second cycle starts at day 7
        assert!(matches!(
            active_shift_for_date(&schedule, &templates, date(2026, 1, 8)),
            DayShift::Working { ref short_code, .. } if short_code == "F"
        ));
    }

    #[test]
    fn dates_outside_validity_are_not_scheduled() {
        let mut schedule = rotation_schedule();
        schedule.rotation_end = NaiveDate::from_ymd_opt(2026, 1, 31);
        let templates = templates();
        assert_eq!(
            active_shift_for_date(&schedule, &templates, date(2025, 12, 31)),
            DayShift::NotScheduled
        );
        assert_eq!(
            active_shift_for_date(&schedule, &templates, date(2026, 2, 1)),
            DayShift::NotScheduled
        );
    }

    #[test]
    fn plan_text_extracts_without_templates() {
        let text = "\
# Januar
01.02.2026 F
2026-02-02: S
nonsense line
";
        let entries = parse_shift_plan_text(text);
        assert_eq!(
            entries,
            vec![
                (date(2026, 2, 1), "F".to_string()),
                (date(2026, 2, 2), "S".to_string()),
            ]
        );
    }

    #[test]
    fn plan_text_parses_mixed_date_formats() {
        let templates = templates();
        let text = "\
# Januar
01.02.2026 F
2026-02-02: S
03/02/2026 N
04.02.2026 X
05.02.2026 Q
nonsense line
";
        let result = resolve_plan_entries(parse_shift_plan_text(text), &templates);
        assert_eq!(result.assignments.len(), 3);
        assert_eq!(result.assignments[0].short_code, "F");
        assert_eq!(result.assignments[0].date, date(2026, 2, 1));
        assert_eq!(result.assignments[1].template_id, 2);
        assert_eq!(result.assignments[2].date, date(2026, 2, 3));
        // "X" is a valid off-day, "Q" is unknown
        assert_eq!(result.unmatched.len(), 1);
        assert_eq!(result.unmatched[0].raw_token, "Q");
        assert_eq!(result.unmatched[0].date, date(2026, 2, 5));
    }

    #[test]
    fn imported_assignment_overrides_rotation() {
        let conn = open_test_db();
        let early = database::schedule::insert_template(
            &conn,
            &NewShiftTemplate {
                name: "Early".to_string(),
                short_code: "F".to_string(),
                color: "#4caf50".to_string(),
                start_time: Some("06:00".to_string()),
                end_time: Some("14:00".to_string()),
            },
        )
        .unwrap();
        let schedule = database::schedule::insert_schedule(
            &conn,
            &NewPersonSchedule {
                person: "anna".to_string(),
                schedule_type: ScheduleType::Shift,
                leave_time: None,
                return_time: None,
                rotation_pattern: vec!["N".to_string()],
                rotation_start: NaiveDate::from_ymd_opt(2026, 1, 1),
                rotation_end: None,
            },
        )
        .unwrap();
        let all = database::schedule::list_templates(&conn).unwrap();

        // Rotation alone would say Off (no "N" template stored)
        database::schedule::upsert_assignment(&conn, "anna", date(2026, 1, 6), early.id).unwrap();
        let shift = shift_for_date(&conn, &schedule, &all, date(2026, 1, 6)).unwrap();
        assert!(matches!(shift, DayShift::Working { ref short_code, .. } if short_code == "F"));
    }

    #[test]
    fn working_hours_count_as_away() {
        let shift = DayShift::Working {
            short_code: "F".to_string(),
            start_time: Some("06:00".to_string()),
            end_time: Some("14:00".to_string()),
        };
        assert!(!expected_home(&shift, 8 * 60));
        assert!(expected_home(&shift, 15 * 60));

        let night = DayShift::Working {
            short_code: "N".to_string(),
            start_time: Some("22:00".to_string()),
            end_time: Some("06:00".to_string()),
        };
        assert!(!expected_home(&night, 23 * 60));
        assert!(!expected_home(&night, 3 * 60));
        assert!(expected_home(&night, 12 * 60));
        assert!(expected_home(&DayShift::Off, 8 * 60));
    }
}
