use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use crate::database::{self, patterns::PatternKey};
use crate::models::{
    entity_domain, is_sensor_entity, EngineSettings, MiningParams, PatternData, PatternStatus,
    PatternType, StateEvent, WeekdayFilter,
};
use crate::services::confidence::{self, ScoreInput};
use crate::state::{AppState, DispatchEvent};
use crate::models::{AnomalySeverity, NotificationType};
use crate::utils::time as timeutil;

const ANALYSIS_INTERVAL_SECS: u64 = 30 * 60;
const MINING_WINDOW_DAYS: i64 = 30;

/// States that carry no automation signal.
const IGNORED_STATES: [&str; 3] = ["unknown", "unavailable", ""];

/// Weekday/weekend share needed before a pattern is pinned to one of them.
const WEEKDAY_FILTER_SHARE: f64 = 0.8;

/// Solar clustering wins when elevation spread (normalized over 60°) beats
/// the clock-time spread.
const ELEVATION_SPREAD_NORM: f64 = 60.0;

#[derive(Debug, Default, Serialize)]
pub struct MiningReport {
    pub events_examined: usize,
    pub patterns_created: usize,
    pub patterns_updated: usize,
    pub suggestions_opened: usize,
    pub skipped_excluded: usize,
    pub skipped_suppressed: usize,
}

pub fn start_miner(state: AppState) {
    tokio::spawn(async move {
        // First pass shortly after boot, then on the fixed interval.
        tokio::time::sleep(Duration::from_secs(60)).await;
        log::info!("[Miner] Pattern analysis service started (every {}m)", ANALYSIS_INTERVAL_SECS / 60);
        loop {
            match run_analysis(&state) {
                Ok(report) => log::info!(
                    "[Miner] Pass finished: {} events, {} new, {} updated, {} suggested",
                    report.events_examined,
                    report.patterns_created,
                    report.patterns_updated,
                    report.suggestions_opened
                ),
                Err(e) => log::error!("[Miner] Analysis failed: {}", e),
            }
            if let Err(e) = super::conflict::run_conflict_scan(&state) {
                log::error!("[Miner] Conflict scan failed: {}", e);
            }
            if let Err(e) = super::scenes::run_scene_detection(&state) {
                log::error!("[Miner] Scene detection failed: {}", e);
            }
            tokio::time::sleep(Duration::from_secs(ANALYSIS_INTERVAL_SECS)).await;
        }
    });
}

/// One full mining pass over a read-consistent snapshot of the history
/// store. Also invoked on demand through the analyze operation.
pub fn run_analysis(state: &AppState) -> Result<MiningReport> {
    let conn = state.conn()?;
    let settings = state.settings()?;
    let report = run_analysis_on(&conn, &settings, |event| {
        let _ = state.dispatch_tx.try_send(event);
    })?;
    super::learning::evaluate_scope_promotions(&conn, &settings)?;
    Ok(report)
}

/// Testable core: mining against an explicit connection, with suggestion
/// notifications handed to the given sink.
pub fn run_analysis_on<F>(
    conn: &Connection,
    settings: &EngineSettings,
    mut notify: F,
) -> Result<MiningReport>
where
    F: FnMut(DispatchEvent),
{
    let params = settings.mining.resolve();
    let now = chrono::Utc::now().timestamp();
    let from = now - MINING_WINDOW_DAYS * 24 * 3600;
    let events = database::events::get_events_in_range(conn, from, now)?;

    let ctx = MiningContext::load(conn, settings)?;
    let mut report = MiningReport {
        events_examined: events.len(),
        ..Default::default()
    };

    let candidates = detect_time_patterns(&events, &params, &ctx)
        .into_iter()
        .chain(detect_chain_patterns(&events, &params, &ctx))
        .chain(detect_correlation_patterns(&events, &params, &ctx));

    for candidate in candidates {
        if ctx.is_pair_excluded(&candidate.key.trigger_entity, &candidate.key.entity_id) {
            report.skipped_excluded += 1;
            continue;
        }
        store_candidate(conn, &candidate, &params, &ctx, &mut report, &mut notify)?;
    }

    Ok(report)
}

/// Cross-cutting lookups shared by the detectors.
pub struct MiningContext {
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub entity_rooms: HashMap<String, String>,
    pub holiday_dates: HashSet<chrono::NaiveDate>,
    entity_exclusions: HashSet<(String, String)>,
    room_exclusions: HashSet<(String, String)>,
    domain_exclusions: HashSet<(String, String)>,
}

impl MiningContext {
    pub fn load(conn: &Connection, settings: &EngineSettings) -> Result<Self> {
        let mut entity_exclusions = HashSet::new();
        let mut room_exclusions = HashSet::new();
        let mut domain_exclusions = HashSet::new();
        for excl in database::rules::all_exclusions(conn)? {
            let pair = (excl.first, excl.second);
            match excl.kind {
                crate::models::ExclusionKind::Entity => entity_exclusions.insert(pair),
                crate::models::ExclusionKind::Room => room_exclusions.insert(pair),
                crate::models::ExclusionKind::Domain => domain_exclusions.insert(pair),
            };
        }
        // Manual rule pairs are hard-excluded like explicit exclusions.
        for (trigger, action) in database::rules::active_rule_pairs(conn)? {
            let (a, b) = crate::models::PatternExclusion::normalized_pair(&trigger, &action);
            entity_exclusions.insert((a, b));
        }
        let holiday_dates = database::schedule::list_holidays(conn)?
            .into_iter()
            .map(|h| h.date)
            .collect();
        Ok(Self {
            timezone: settings.general.timezone.clone(),
            latitude: settings.general.latitude,
            longitude: settings.general.longitude,
            entity_rooms: database::schedule::entity_room_map(conn)?,
            holiday_dates,
            entity_exclusions,
            room_exclusions,
            domain_exclusions,
        })
    }

    pub fn room_for(&self, entity_id: &str) -> String {
        self.entity_rooms
            .get(entity_id)
            .cloned()
            .unwrap_or_else(|| "unassigned".to_string())
    }

    /// Checks entity, room and domain exclusions for an (optional trigger,
    /// target) pair. A time-based candidate has no trigger; only its own
    /// room/domain self-exclusions can match.
    pub fn is_pair_excluded(&self, first: &str, second: &str) -> bool {
        if second.is_empty() {
            return false;
        }
        let first = if first.is_empty() { second } else { first };
        let entity_pair = crate::models::PatternExclusion::normalized_pair(first, second);
        if self.entity_exclusions.contains(&entity_pair) {
            return true;
        }
        let room_pair = crate::models::PatternExclusion::normalized_pair(
            &self.room_for(first),
            &self.room_for(second),
        );
        if self.room_exclusions.contains(&room_pair) {
            return true;
        }
        let domain_pair = crate::models::PatternExclusion::normalized_pair(
            entity_domain(first),
            entity_domain(second),
        );
        self.domain_exclusions.contains(&domain_pair)
    }

    /// Holidays behave like weekend days for the weekday filter.
    fn is_weekendish(&self, date: chrono::NaiveDate) -> bool {
        timeutil::is_weekend_day(date) || self.holiday_dates.contains(&date)
    }
}

pub struct Candidate {
    pub key: PatternKey,
    pub data: PatternData,
    pub match_count: i64,
    pub distinct_days: u32,
    pub normalized_spread: f64,
    pub last_observed: i64,
    pub insight: bool,
}

fn usable_state(state: &str) -> bool {
    !IGNORED_STATES.contains(&state)
}

fn detect_time_patterns(
    events: &[StateEvent],
    params: &MiningParams,
    ctx: &MiningContext,
) -> Vec<Candidate> {
    let mut groups: BTreeMap<(String, String), Vec<&StateEvent>> = BTreeMap::new();
    for event in events {
        if is_sensor_entity(&event.entity_id) || !usable_state(&event.new_state) {
            continue;
        }
        groups
            .entry((event.entity_id.clone(), event.new_state.clone()))
            .or_default()
            .push(event);
    }

    let mut candidates = Vec::new();
    for ((entity_id, target_state), hits) in groups {
        if (hits.len() as u32) < params.min_occurrences {
            continue;
        }
        let minutes: Vec<u32> = hits
            .iter()
            .map(|e| timeutil::minute_of_day(e.timestamp, &ctx.timezone))
            .collect();
        let dates: Vec<chrono::NaiveDate> = hits
            .iter()
            .map(|e| timeutil::local_date(e.timestamp, &ctx.timezone))
            .collect();
        let distinct_days = dates.iter().collect::<HashSet<_>>().len() as u32;
        if distinct_days < params.min_distinct_days {
            continue;
        }

        let weekendish = dates.iter().filter(|d| ctx.is_weekendish(**d)).count() as f64;
        let share_weekend = weekendish / dates.len() as f64;
        let weekday_filter = if share_weekend >= WEEKDAY_FILTER_SHARE {
            WeekdayFilter::Weekends
        } else if share_weekend <= 1.0 - WEEKDAY_FILTER_SHARE {
            WeekdayFilter::Weekdays
        } else {
            WeekdayFilter::All
        };

        let mean_minute = timeutil::circular_mean_minutes(&minutes);
        let spread_minutes = timeutil::circular_stddev_minutes(&minutes);
        let time_window_min = ((2.0 * spread_minutes).round() as u32).clamp(10, 180);

        // Daylight-relative behavior: when occurrences cluster tighter
        // around solar elevation than around clock time, record elevation.
        let elevations: Vec<f64> = hits
            .iter()
            .map(|e| timeutil::solar_elevation(e.timestamp, ctx.latitude, ctx.longitude))
            .collect();
        let elevation_mean = elevations.iter().sum::<f64>() / elevations.len() as f64;
        let elevation_spread = (elevations
            .iter()
            .map(|e| (e - elevation_mean).powi(2))
            .sum::<f64>()
            / elevations.len().max(1) as f64)
            .sqrt();
        let clock_norm = spread_minutes / 720.0;
        let elevation_norm = elevation_spread / ELEVATION_SPREAD_NORM;
        let sun_relative_elevation =
            (elevation_norm < clock_norm).then_some((elevation_mean * 10.0).round() / 10.0);

        candidates.push(Candidate {
            key: PatternKey {
                pattern_type: PatternType::TimeBased,
                entity_id,
                target_state,
                trigger_entity: String::new(),
                trigger_state: String::new(),
            },
            data: PatternData {
                avg_hour: Some((mean_minute / 60.0) as u32 % 24),
                avg_minute: Some((mean_minute as u32) % 60),
                time_window_min: Some(time_window_min),
                weekday_filter: Some(weekday_filter),
                sun_relative_elevation,
                distinct_days: Some(distinct_days),
                ..Default::default()
            },
            match_count: hits.len() as i64,
            distinct_days,
            normalized_spread: clock_norm.min(elevation_norm),
            last_observed: hits.iter().map(|e| e.timestamp).max().unwrap_or(0),
            insight: false,
        });
    }
    candidates
}

struct ChainStats {
    delays: Vec<f64>,
    dates: HashSet<chrono::NaiveDate>,
    last_observed: i64,
}

fn detect_chain_patterns(
    events: &[StateEvent],
    params: &MiningParams,
    ctx: &MiningContext,
) -> Vec<Candidate> {
    let window = params.chain_window_sec as i64;
    let mut chains: BTreeMap<(String, String, String, String), ChainStats> = BTreeMap::new();

    for (i, trigger) in events.iter().enumerate() {
        if !usable_state(&trigger.new_state) {
            continue;
        }
        for action in events.iter().skip(i + 1) {
            let delay = action.timestamp - trigger.timestamp;
            if delay > window {
                break;
            }
            if action.entity_id == trigger.entity_id
                || is_sensor_entity(&action.entity_id)
                || !usable_state(&action.new_state)
            {
                continue;
            }
            let key = (
                trigger.entity_id.clone(),
                trigger.new_state.clone(),
                action.entity_id.clone(),
                action.new_state.clone(),
            );
            let stats = chains.entry(key).or_insert_with(|| ChainStats {
                delays: Vec::new(),
                dates: HashSet::new(),
                last_observed: 0,
            });
            stats.delays.push(delay as f64);
            stats
                .dates
                .insert(timeutil::local_date(action.timestamp, &ctx.timezone));
            stats.last_observed = stats.last_observed.max(action.timestamp);
        }
    }

    let mut candidates = Vec::new();
    for ((trigger_entity, trigger_state, action_entity, action_state), stats) in chains {
        if (stats.delays.len() as u32) < params.min_sequence_count {
            continue;
        }
        let avg_delay = stats.delays.iter().sum::<f64>() / stats.delays.len() as f64;
        let delay_spread = (stats
            .delays
            .iter()
            .map(|d| (d - avg_delay).powi(2))
            .sum::<f64>()
            / stats.delays.len() as f64)
            .sqrt();
        candidates.push(Candidate {
            key: PatternKey {
                pattern_type: PatternType::EventChain,
                entity_id: action_entity,
                target_state: action_state,
                trigger_entity,
                trigger_state,
            },
            data: PatternData {
                avg_delay_sec: Some((avg_delay * 10.0).round() / 10.0),
                ..Default::default()
            },
            match_count: stats.delays.len() as i64,
            distinct_days: stats.dates.len() as u32,
            normalized_spread: delay_spread / params.chain_window_sec as f64,
            last_observed: stats.last_observed,
            insight: false,
        });
    }
    candidates
}

fn detect_correlation_patterns(
    events: &[StateEvent],
    params: &MiningParams,
    ctx: &MiningContext,
) -> Vec<Candidate> {
    let window = params.chain_window_sec as i64;
    let mut pairs: BTreeMap<(String, String, String, String), ChainStats> = BTreeMap::new();

    for (i, first) in events.iter().enumerate() {
        if !usable_state(&first.new_state) {
            continue;
        }
        for second in events.iter().skip(i + 1) {
            let delay = second.timestamp - first.timestamp;
            if delay > window {
                break;
            }
            if second.entity_id == first.entity_id || !usable_state(&second.new_state) {
                continue;
            }
            // Unordered pair, normalized so both directions accumulate
            // in one bucket.
            let key = if first.entity_id <= second.entity_id {
                (
                    first.entity_id.clone(),
                    first.new_state.clone(),
                    second.entity_id.clone(),
                    second.new_state.clone(),
                )
            } else {
                (
                    second.entity_id.clone(),
                    second.new_state.clone(),
                    first.entity_id.clone(),
                    first.new_state.clone(),
                )
            };
            let stats = pairs.entry(key).or_insert_with(|| ChainStats {
                delays: Vec::new(),
                dates: HashSet::new(),
                last_observed: 0,
            });
            stats.delays.push(delay as f64);
            stats
                .dates
                .insert(timeutil::local_date(second.timestamp, &ctx.timezone));
            stats.last_observed = stats.last_observed.max(second.timestamp);
        }
    }

    let mut candidates = Vec::new();
    for ((first_entity, first_state, second_entity, second_state), stats) in pairs {
        if (stats.delays.len() as u32) < params.min_sequence_count {
            continue;
        }
        // Event-chain detection already covers actuator pairs with a
        // consistent direction; correlation adds value for sensor pairs
        // and mixed pairs.
        let both_sensors = is_sensor_entity(&first_entity) && is_sensor_entity(&second_entity);
        if !both_sensors && !is_sensor_entity(&first_entity) && !is_sensor_entity(&second_entity) {
            continue;
        }
        let avg_delay = stats.delays.iter().sum::<f64>() / stats.delays.len() as f64;
        candidates.push(Candidate {
            key: PatternKey {
                pattern_type: PatternType::Correlation,
                entity_id: second_entity,
                target_state: second_state,
                trigger_entity: first_entity,
                trigger_state: first_state,
            },
            data: PatternData {
                avg_delay_sec: Some((avg_delay * 10.0).round() / 10.0),
                ..Default::default()
            },
            match_count: stats.delays.len() as i64,
            distinct_days: stats.dates.len() as u32,
            normalized_spread: 0.3,
            last_observed: stats.last_observed,
            insight: both_sensors,
        });
    }
    candidates
}

fn store_candidate<F>(
    conn: &Connection,
    candidate: &Candidate,
    params: &MiningParams,
    ctx: &MiningContext,
    report: &mut MiningReport,
    notify: &mut F,
) -> Result<()>
where
    F: FnMut(DispatchEvent),
{
    if database::patterns::is_suppressed(conn, &candidate.key)? {
        report.skipped_suppressed += 1;
        return Ok(());
    }

    let confidence = confidence::score(&ScoreInput {
        match_count: candidate.match_count,
        distinct_days: candidate.distinct_days,
        min_distinct_days: params.min_distinct_days,
        normalized_spread: candidate.normalized_spread,
    });

    let room_id = ctx.room_for(&candidate.key.entity_id);
    let domain = entity_domain(&candidate.key.entity_id).to_string();
    let phase = database::learning::get_or_create_phase(conn, &room_id, &domain)?;

    let existing = database::patterns::find_by_key(conn, &candidate.key)?;
    let pattern_id = match existing {
        Some(p) => {
            // Re-mining never resurrects user decisions and never demotes.
            if matches!(p.status, PatternStatus::Rejected | PatternStatus::Disabled) {
                return Ok(());
            }
            database::patterns::update_mining_fields(
                conn,
                p.id,
                &candidate.data,
                confidence,
                candidate.match_count,
                candidate.last_observed,
            )?;
            report.patterns_updated += 1;
            p.id
        }
        None => {
            let status = if candidate.insight {
                PatternStatus::Insight
            } else {
                PatternStatus::Observed
            };
            let id = database::patterns::insert_pattern(
                conn,
                &database::patterns::NewPattern {
                    key: &candidate.key,
                    room_id: &room_id,
                    domain: &domain,
                    data: &candidate.data,
                    confidence,
                    match_count: candidate.match_count,
                    status,
                    last_observed: candidate.last_observed,
                },
            )?;
            report.patterns_created += 1;
            id
        }
    };

    // Promotion: observed patterns above the scope's bar surface once the
    // scope itself has left observing.
    if !candidate.insight && confidence >= params.min_confidence && phase.phase.surfaces_patterns() {
        if let Some(pattern) = database::patterns::get_pattern(conn, pattern_id)? {
            if pattern.status == PatternStatus::Observed {
                database::patterns::transition_status(conn, pattern_id, PatternStatus::Suggested, None)?;
                if database::predictions::open_prediction_for_pattern(conn, pattern_id)?.is_none() {
                    database::predictions::insert_prediction(
                        conn,
                        pattern_id,
                        crate::models::PredictionStatus::Pending,
                        confidence,
                    )?;
                    report.suggestions_opened += 1;
                    notify(DispatchEvent {
                        notification_type: NotificationType::PatternSuggestion,
                        severity: AnomalySeverity::Low,
                        title: "New automation suggestion".to_string(),
                        message: format!(
                            "{} → {} ({:.0}% confidence)",
                            candidate.key.entity_id,
                            candidate.key.target_state,
                            confidence * 100.0
                        ),
                        person: None,
                    });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;
    use crate::models::{LearningPhase, NewStateEvent, TimeBucket};
    use chrono::TimeZone;

    fn settings() -> EngineSettings {
        let mut s = EngineSettings::default();
        s.general.timezone = "UTC".to_string();
        s
    }

    fn ingest(conn: &Connection, entity: &str, old: &str, new: &str, ts: i64) {
        let event = NewStateEvent {
            entity_id: entity.to_string(),
            old_state: Some(old.to_string()),
            new_state: Some(new.to_string()),
            attributes: Default::default(),
            timestamp: ts,
            persons_home: vec![],
        };
        database::events::insert_event(conn, &event, TimeBucket::Evening).unwrap();
    }

    fn weekday_evening(days_ago: i64, minute_offset: i64) -> i64 {
        // Walk back from a fixed Friday so every date is Mon-Fri.
        let anchor = chrono::Utc
            .with_ymd_and_hms(2026, 8, 28, 18, 2, 0)
            .unwrap()
            .timestamp();
        let mut ts = anchor - days_ago * 24 * 3600 + minute_offset * 60;
        // Skip weekend days backwards
        let date = timeutil::local_date(ts, "UTC");
        if timeutil::is_weekend_day(date) {
            ts -= 2 * 24 * 3600;
        }
        ts
    }

    fn mine(conn: &Connection) -> MiningReport {
        run_analysis_on(conn, &settings(), |_| {}).unwrap()
    }

    #[test]
    fn self_exclusion_blocks_triggerless_candidates() {
        let conn = open_test_db();
        database::rules::insert_exclusion(
            &conn,
            crate::models::ExclusionKind::Entity,
            "light.porch",
            "light.porch",
        )
        .unwrap();
        let ctx = MiningContext::load(&conn, &settings()).unwrap();

        // A time-based candidate carries no trigger entity
        assert!(ctx.is_pair_excluded("", "light.porch"));
        assert!(!ctx.is_pair_excluded("", "light.kitchen"));
    }

    #[test]
    fn consecutive_weekday_evenings_yield_time_pattern() {
        let conn = open_test_db();
        // Pin recent history: 10 weekday evenings around 18:02
        let mut used_dates = std::collections::HashSet::new();
        let mut days_ago = 0;
        while used_dates.len() < 10 {
            let ts = weekday_evening(days_ago, (used_dates.len() % 3) as i64 - 1);
            let date = timeutil::local_date(ts, "UTC");
            if !timeutil::is_weekend_day(date) && used_dates.insert(date) {
                ingest(&conn, "light.living_room", "off", "on", ts);
            }
            days_ago += 1;
        }

        let report = mine(&conn);
        assert_eq!(report.patterns_created, 1);

        let patterns =
            database::patterns::list_by_statuses(&conn, &[PatternStatus::Observed]).unwrap();
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.pattern_type, PatternType::TimeBased);
        assert_eq!(p.pattern_data.weekday_filter, Some(WeekdayFilter::Weekdays));
        assert_eq!(p.pattern_data.avg_hour, Some(18));
        assert!(p.confidence > 0.5, "confidence {}", p.confidence);
    }

    #[test]
    fn confidence_grows_with_occurrences() {
        let conn = open_test_db();
        let mut last_confidence = 0.0;
        let mut used = std::collections::HashSet::new();
        let mut days_ago = 0;
        let mut occurrences = 0;
        while occurrences < 10 {
            let ts = weekday_evening(days_ago, 0);
            days_ago += 1;
            let date = timeutil::local_date(ts, "UTC");
            if timeutil::is_weekend_day(date) || !used.insert(date) {
                continue;
            }
            ingest(&conn, "light.living_room", "off", "on", ts);
            occurrences += 1;
            mine(&conn);
            if let Some(p) = database::patterns::find_by_key(
                &conn,
                &PatternKey {
                    pattern_type: PatternType::TimeBased,
                    entity_id: "light.living_room".to_string(),
                    target_state: "on".to_string(),
                    trigger_entity: String::new(),
                    trigger_state: String::new(),
                },
            )
            .unwrap()
            {
                assert!(
                    p.confidence >= last_confidence - 1e-9,
                    "confidence regressed at occurrence {}: {} < {}",
                    occurrences,
                    p.confidence,
                    last_confidence
                );
                last_confidence = p.confidence;
            }
        }
        assert!(last_confidence > 0.0);
    }

    #[test]
    fn door_then_hallway_yields_event_chain() {
        let conn = open_test_db();
        let base = chrono::Utc::now().timestamp() - 6 * 24 * 3600;
        for day in 0..5 {
            let t = base + day * 24 * 3600;
            ingest(&conn, "binary_sensor.front_door", "off", "on", t);
            ingest(&conn, "light.hallway", "off", "on", t + 5);
        }

        mine(&conn);
        let p = database::patterns::find_by_key(
            &conn,
            &PatternKey {
                pattern_type: PatternType::EventChain,
                entity_id: "light.hallway".to_string(),
                target_state: "on".to_string(),
                trigger_entity: "binary_sensor.front_door".to_string(),
                trigger_state: "on".to_string(),
            },
        )
        .unwrap()
        .expect("event chain pattern");
        let delay = p.pattern_data.avg_delay_sec.unwrap();
        assert!((delay - 5.0).abs() < 0.5, "avg delay {}", delay);
    }

    #[test]
    fn exclusion_prevents_chain_creation() {
        let conn = open_test_db();
        database::rules::insert_exclusion(
            &conn,
            crate::models::ExclusionKind::Entity,
            "binary_sensor.front_door",
            "light.hallway",
        )
        .unwrap()
        .unwrap();

        let base = chrono::Utc::now().timestamp() - 20 * 24 * 3600;
        for i in 0..100 {
            let t = base + i * 3600 * 4;
            ingest(&conn, "binary_sensor.front_door", "off", "on", t);
            ingest(&conn, "light.hallway", "off", "on", t + 5);
        }

        let report = mine(&conn);
        assert!(report.skipped_excluded > 0);
        let p = database::patterns::find_by_key(
            &conn,
            &PatternKey {
                pattern_type: PatternType::EventChain,
                entity_id: "light.hallway".to_string(),
                target_state: "on".to_string(),
                trigger_entity: "binary_sensor.front_door".to_string(),
                trigger_state: "on".to_string(),
            },
        )
        .unwrap();
        assert!(p.is_none(), "excluded pair must never become a pattern");
    }

    #[test]
    fn sensor_pair_correlation_becomes_insight() {
        let conn = open_test_db();
        let base = chrono::Utc::now().timestamp() - 10 * 24 * 3600;
        for day in 0..6 {
            let t = base + day * 24 * 3600;
            ingest(&conn, "sensor.humidity", "40", "80", t);
            ingest(&conn, "binary_sensor.window", "off", "on", t + 30);
        }

        mine(&conn);
        let insights =
            database::patterns::list_by_statuses(&conn, &[PatternStatus::Insight]).unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].pattern_type, PatternType::Correlation);
    }

    #[test]
    fn observing_scope_mines_but_does_not_surface() {
        let conn = open_test_db();
        let base = chrono::Utc::now().timestamp() - 10 * 24 * 3600;
        for day in 0..8 {
            ingest(&conn, "light.bedroom", "off", "on", base + day * 24 * 3600);
        }

        let report = mine(&conn);
        assert_eq!(report.patterns_created, 1);
        assert_eq!(report.suggestions_opened, 0);

        // Same data with the scope already promoted: the pattern surfaces.
        database::learning::get_or_create_phase(&conn, "unassigned", "light").unwrap();
        database::learning::set_phase(
            &conn,
            "unassigned",
            "light",
            LearningPhase::Suggesting,
            0.8,
        )
        .unwrap();
        let report = mine(&conn);
        assert_eq!(report.suggestions_opened, 1);
        let suggested =
            database::patterns::list_by_statuses(&conn, &[PatternStatus::Suggested]).unwrap();
        assert_eq!(suggested.len(), 1);
    }

    #[test]
    fn suppressed_fingerprint_blocks_recreation() {
        let conn = open_test_db();
        let key = PatternKey {
            pattern_type: PatternType::TimeBased,
            entity_id: "light.bedroom".to_string(),
            target_state: "on".to_string(),
            trigger_entity: String::new(),
            trigger_state: String::new(),
        };
        database::patterns::add_suppression(&conn, &key).unwrap();

        let base = chrono::Utc::now().timestamp() - 10 * 24 * 3600;
        for day in 0..8 {
            ingest(&conn, "light.bedroom", "off", "on", base + day * 24 * 3600);
        }
        let report = mine(&conn);
        assert_eq!(report.patterns_created, 0);
        assert!(report.skipped_suppressed > 0);
    }
}
