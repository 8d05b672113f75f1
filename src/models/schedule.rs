use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A configured shift type, e.g. "F" early shift 06:00–14:00.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftTemplate {
    pub id: i64,
    pub name: String,
    pub short_code: String,
    pub color: String,
    /// "HH:MM" block boundaries. An off-day template has no block.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShiftTemplate {
    pub name: String,
    pub short_code: String,
    pub color: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Weekday,
    Weekend,
    Homeoffice,
    Custom,
    Shift,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Weekday => "weekday",
            ScheduleType::Weekend => "weekend",
            ScheduleType::Homeoffice => "homeoffice",
            ScheduleType::Custom => "custom",
            ScheduleType::Shift => "shift",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weekday" => Some(ScheduleType::Weekday),
            "weekend" => Some(ScheduleType::Weekend),
            "homeoffice" => Some(ScheduleType::Homeoffice),
            "custom" => Some(ScheduleType::Custom),
            "shift" => Some(ScheduleType::Shift),
            _ => None,
        }
    }
}

/// A person's expected presence schedule: either fixed times or a rotating
/// sequence of shift short codes anchored to a start date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonSchedule {
    pub id: i64,
    pub person: String,
    pub schedule_type: ScheduleType,
    pub leave_time: Option<String>,
    pub return_time: Option<String>,
    pub rotation_pattern: Vec<String>,
    pub rotation_start: Option<NaiveDate>,
    pub rotation_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPersonSchedule {
    pub person: String,
    pub schedule_type: ScheduleType,
    pub leave_time: Option<String>,
    pub return_time: Option<String>,
    #[serde(default)]
    pub rotation_pattern: Vec<String>,
    pub rotation_start: Option<NaiveDate>,
    pub rotation_end: Option<NaiveDate>,
}

/// Result of a best-effort shift-plan import. Unmatched tokens are reported,
/// never fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftPlanImportResult {
    pub assignments: Vec<ShiftAssignment>,
    pub unmatched: Vec<UnmatchedToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftAssignment {
    pub date: NaiveDate,
    pub short_code: String,
    pub template_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmatchedToken {
    pub date: NaiveDate,
    pub raw_token: String,
}

/// A holiday date; the weekday filter classifies it like a weekend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holiday {
    pub id: i64,
    pub date: NaiveDate,
    pub name: String,
}

/// Entity → room assignment used for mining and anomaly scoping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub id: i64,
    pub room_id: String,
    pub name: String,
    pub entities: Vec<String>,
}

/// A point-in-time or recurring trigger that activates a scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarTrigger {
    pub id: i64,
    pub name: String,
    pub scene_id: String,
    /// Either a one-shot timestamp or a recurring "HH:MM" daily time.
    pub at_timestamp: Option<i64>,
    pub daily_time: Option<String>,
    pub is_active: bool,
}
