use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::api::{page_in_memory, ApiResult, EngineError, Paginated};
use crate::database;
use crate::models::{
    CalendarTrigger, DeviceGroup, Holiday, NewPersonSchedule, NewShiftTemplate, PersonSchedule,
    ShiftPlanImportResult, ShiftTemplate,
};
use crate::services::shifts;
use crate::state::AppState;

pub async fn list_templates(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<ShiftTemplate>> {
    let conn = state.conn()?;
    Ok(page_in_memory(database::schedule::list_templates(&conn)?, limit, offset))
}

fn is_wall_time(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").unwrap())
        .is_match(s)
}

fn validate_template(t: &NewShiftTemplate) -> ApiResult<()> {
    if t.short_code.trim().is_empty() {
        return Err(EngineError::Validation(
            "shift template needs a short code".to_string(),
        ));
    }
    if t.start_time.is_some() != t.end_time.is_some() {
        return Err(EngineError::Validation(
            "start and end time must be set together".to_string(),
        ));
    }
    for time in [&t.start_time, &t.end_time].into_iter().flatten() {
        if !is_wall_time(time) {
            return Err(EngineError::Validation(format!(
                "'{}' is not a valid HH:MM time",
                time
            )));
        }
    }
    Ok(())
}

pub async fn create_template(state: &AppState, t: NewShiftTemplate) -> ApiResult<ShiftTemplate> {
    validate_template(&t)?;
    let conn = state.conn()?;
    Ok(database::schedule::insert_template(&conn, &t)?)
}

pub async fn update_template(
    state: &AppState,
    id: i64,
    t: NewShiftTemplate,
) -> ApiResult<ShiftTemplate> {
    validate_template(&t)?;
    let conn = state.conn()?;
    database::schedule::get_template(&conn, id)?
        .ok_or_else(|| EngineError::not_found("shift template", id))?;
    Ok(database::schedule::update_template(&conn, id, &t)?)
}

pub async fn delete_template(state: &AppState, id: i64) -> ApiResult<()> {
    let conn = state.conn()?;
    if !database::schedule::delete_template(&conn, id)? {
        return Err(EngineError::not_found("shift template", id));
    }
    Ok(())
}

pub async fn list_schedules(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<PersonSchedule>> {
    let conn = state.conn()?;
    Ok(page_in_memory(database::schedule::list_schedules(&conn)?, limit, offset))
}

fn validate_schedule(s: &NewPersonSchedule) -> ApiResult<()> {
    if !s.rotation_pattern.is_empty() {
        if s.person.trim().is_empty() {
            return Err(EngineError::Conflict(
                "a rotation schedule requires a person".to_string(),
            ));
        }
        if s.rotation_start.is_none() {
            return Err(EngineError::Validation(
                "a rotation needs a start date to anchor it".to_string(),
            ));
        }
    } else if s.person.trim().is_empty() {
        return Err(EngineError::Validation("person must not be empty".to_string()));
    }
    Ok(())
}

pub async fn create_schedule(state: &AppState, s: NewPersonSchedule) -> ApiResult<PersonSchedule> {
    validate_schedule(&s)?;
    let conn = state.conn()?;
    Ok(database::schedule::insert_schedule(&conn, &s)?)
}

pub async fn update_schedule(
    state: &AppState,
    id: i64,
    s: NewPersonSchedule,
) -> ApiResult<PersonSchedule> {
    validate_schedule(&s)?;
    let conn = state.conn()?;
    database::schedule::get_schedule(&conn, id)?
        .ok_or_else(|| EngineError::not_found("person schedule", id))?;
    Ok(database::schedule::update_schedule(&conn, id, &s)?)
}

pub async fn delete_schedule(state: &AppState, id: i64) -> ApiResult<()> {
    let conn = state.conn()?;
    if !database::schedule::delete_schedule(&conn, id)? {
        return Err(EngineError::not_found("person schedule", id));
    }
    Ok(())
}

/// Parses a pasted shift-plan text and persists every matched day for the
/// person. Unmatched tokens are returned alongside, a plan where nothing
/// matched at all is treated as a parse failure.
pub async fn import_shift_plan(
    state: &AppState,
    person: &str,
    text: &str,
) -> ApiResult<ShiftPlanImportResult> {
    if person.trim().is_empty() {
        return Err(EngineError::Validation("person must not be empty".to_string()));
    }
    let conn = state.conn()?;
    let templates = database::schedule::list_templates(&conn)?;
    let entries = shifts::parse_shift_plan_text(text);
    let result = shifts::resolve_plan_entries(entries, &templates);
    if result.assignments.is_empty() {
        return Err(EngineError::ImportParse(
            "no recognizable date/shift lines in the pasted plan".to_string(),
        ));
    }
    for a in &result.assignments {
        database::schedule::upsert_assignment(&conn, person, a.date, a.template_id)?;
    }
    log::info!(
        "[Schedule] Imported {} shift assignments for {} ({} unmatched)",
        result.assignments.len(),
        person,
        result.unmatched.len()
    );
    Ok(result)
}

pub async fn presence_now(state: &AppState) -> ApiResult<std::collections::HashMap<String, bool>> {
    let conn = state.conn()?;
    let tz = state.settings()?.general.timezone;
    let now = chrono::Utc::now().timestamp();
    let date = crate::utils::time::local_date(now, &tz);
    let minute = crate::utils::time::minute_of_day(now, &tz) as i64;
    Ok(shifts::presence_map(&conn, date, minute)?)
}

pub async fn list_holidays(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<Holiday>> {
    let conn = state.conn()?;
    Ok(page_in_memory(database::schedule::list_holidays(&conn)?, limit, offset))
}

pub async fn create_holiday(state: &AppState, date: NaiveDate, name: &str) -> ApiResult<Holiday> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("holiday name must not be empty".to_string()));
    }
    let conn = state.conn()?;
    database::schedule::insert_holiday(&conn, date, name)?
        .ok_or_else(|| EngineError::Conflict(format!("holiday on {} already exists", date)))
}

pub async fn delete_holiday(state: &AppState, id: i64) -> ApiResult<()> {
    let conn = state.conn()?;
    if !database::schedule::delete_holiday(&conn, id)? {
        return Err(EngineError::not_found("holiday", id));
    }
    Ok(())
}

pub async fn list_groups(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<DeviceGroup>> {
    let conn = state.conn()?;
    Ok(page_in_memory(database::schedule::list_groups(&conn)?, limit, offset))
}

pub async fn create_group(
    state: &AppState,
    room_id: &str,
    name: &str,
    entities: &[String],
) -> ApiResult<DeviceGroup> {
    if room_id.trim().is_empty() {
        return Err(EngineError::Validation("room_id must not be empty".to_string()));
    }
    let conn = state.conn()?;
    Ok(database::schedule::insert_group(&conn, room_id, name, entities)?)
}

pub async fn update_group(
    state: &AppState,
    id: i64,
    room_id: &str,
    name: &str,
    entities: &[String],
) -> ApiResult<DeviceGroup> {
    let conn = state.conn()?;
    database::schedule::get_group(&conn, id)?
        .ok_or_else(|| EngineError::not_found("device group", id))?;
    Ok(database::schedule::update_group(&conn, id, room_id, name, entities)?)
}

pub async fn delete_group(state: &AppState, id: i64) -> ApiResult<()> {
    let conn = state.conn()?;
    if !database::schedule::delete_group(&conn, id)? {
        return Err(EngineError::not_found("device group", id));
    }
    Ok(())
}

pub async fn list_triggers(
    state: &AppState,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<CalendarTrigger>> {
    let conn = state.conn()?;
    Ok(page_in_memory(database::schedule::list_triggers(&conn)?, limit, offset))
}

fn validate_trigger(state: &AppState, t: &CalendarTrigger) -> ApiResult<()> {
    if t.at_timestamp.is_none() && t.daily_time.is_none() {
        return Err(EngineError::Validation(
            "a trigger needs either a timestamp or a daily time".to_string(),
        ));
    }
    if let Some(time) = &t.daily_time {
        if !is_wall_time(time) {
            return Err(EngineError::Validation(format!(
                "'{}' is not a valid HH:MM time",
                time
            )));
        }
    }
    let conn = state.conn()?;
    database::scenes::get_scene(&conn, &t.scene_id)?
        .ok_or_else(|| EngineError::not_found("scene", &t.scene_id))?;
    Ok(())
}

pub async fn create_trigger(state: &AppState, t: CalendarTrigger) -> ApiResult<CalendarTrigger> {
    validate_trigger(state, &t)?;
    let conn = state.conn()?;
    Ok(database::schedule::insert_trigger(&conn, &t)?)
}

pub async fn update_trigger(
    state: &AppState,
    id: i64,
    t: CalendarTrigger,
) -> ApiResult<CalendarTrigger> {
    validate_trigger(state, &t)?;
    let conn = state.conn()?;
    database::schedule::get_trigger(&conn, id)?
        .ok_or_else(|| EngineError::not_found("calendar trigger", id))?;
    Ok(database::schedule::update_trigger(&conn, id, &t)?)
}

pub async fn delete_trigger(state: &AppState, id: i64) -> ApiResult<()> {
    let conn = state.conn()?;
    if !database::schedule::delete_trigger(&conn, id)? {
        return Err(EngineError::not_found("calendar trigger", id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleType;
    use crate::state::test_support;

    fn early_shift() -> NewShiftTemplate {
        NewShiftTemplate {
            name: "Early".to_string(),
            short_code: "F".to_string(),
            color: "#4caf50".to_string(),
            start_time: Some("06:00".to_string()),
            end_time: Some("14:00".to_string()),
        }
    }

    #[tokio::test]
    async fn rotation_without_person_is_a_conflict() {
        let ts = test_support::app_state();
        let s = NewPersonSchedule {
            person: "".to_string(),
            schedule_type: ScheduleType::Shift,
            leave_time: None,
            return_time: None,
            rotation_pattern: vec!["F".to_string(), "X".to_string()],
            rotation_start: Some(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
            rotation_end: None,
        };
        let err = create_schedule(&ts.state, s).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn import_persists_matched_days_and_reports_unmatched() {
        let ts = test_support::app_state();
        create_template(&ts.state, early_shift()).await.unwrap();

        let text = "2026-03-02 F\n2026-03-03 Q\n2026-03-04 F\n";
        let result = import_shift_plan(&ts.state, "anna", text).await.unwrap();
        assert_eq!(result.assignments.len(), 2);
        assert_eq!(result.unmatched.len(), 1);
        assert_eq!(result.unmatched[0].raw_token, "Q");

        let conn = ts.state.conn().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(database::schedule::assignment_for(&conn, "anna", date)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn import_of_garbage_is_a_parse_error() {
        let ts = test_support::app_state();
        create_template(&ts.state, early_shift()).await.unwrap();
        let err = import_shift_plan(&ts.state, "anna", "nothing useful here")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ImportParse(_)));
    }

    #[tokio::test]
    async fn duplicate_holiday_is_a_conflict() {
        let ts = test_support::app_state();
        let date = NaiveDate::from_ymd_opt(2026, 12, 24).unwrap();
        create_holiday(&ts.state, date, "Christmas Eve").await.unwrap();
        let err = create_holiday(&ts.state, date, "Again").await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn trigger_requires_an_existing_scene() {
        let ts = test_support::app_state();
        let t = CalendarTrigger {
            id: 0,
            name: "Evening".to_string(),
            scene_id: "missing".to_string(),
            at_timestamp: None,
            daily_time: Some("19:00".to_string()),
            is_active: true,
        };
        let err = create_trigger(&ts.state, t).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
