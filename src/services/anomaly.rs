use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::database::{self, anomaly::Baseline};
use crate::models::{
    is_sensor_entity, AnomalyConfig, AnomalyReaction, AnomalyScope, AnomalySeverity,
    DetectionType, EngineSettings, NewStateEvent, NotificationType, PatternStatus, PatternType,
    Sensitivity,
};
use crate::state::{AppState, DispatchEvent};
use crate::utils::time as timeutil;

/// EWMA weight for the update-interval estimate.
const INTERVAL_ALPHA: f64 = 0.1;

/// Samples after which a baseline is trusted even before the learning
/// window has elapsed.
const MIN_BASELINE_SAMPLES: i64 = 50;

/// A chatty device updates at a quarter of its usual interval or faster;
/// a quiet one goes more than four intervals without reporting.
const FREQUENCY_RATIO: f64 = 0.25;
const QUIET_INTERVAL_FACTOR: f64 = 4.0;

const SCAN_INTERVAL_SECS: u64 = 300;

/// A new finding with the reaction its severity resolved to.
#[derive(Debug, Clone)]
pub struct Finding {
    pub anomaly_id: i64,
    pub entity_id: String,
    pub detection_type: DetectionType,
    pub severity: AnomalySeverity,
    pub message: String,
    pub reaction: AnomalyReaction,
    pub debounce_secs: u64,
}

pub fn start_anomaly(state: AppState, mut event_rx: mpsc::Receiver<NewStateEvent>) {
    let scanner_state = state.clone();
    tokio::spawn(async move {
        log::info!("[Anomaly] Detector started");
        while let Some(event) = event_rx.recv().await {
            let findings = match ingest_event(&scanner_state, &event) {
                Ok(f) => f,
                Err(e) => {
                    log::error!("[Anomaly] Event handling failed: {}", e);
                    continue;
                }
            };
            for finding in findings {
                dispatch_finding(&scanner_state, finding);
            }
        }
    });

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(SCAN_INTERVAL_SECS)).await;
            match run_silence_scan(&state) {
                Ok(findings) => {
                    for finding in findings {
                        dispatch_finding(&state, finding);
                    }
                }
                Err(e) => log::error!("[Anomaly] Silence scan failed: {}", e),
            }
        }
    });
}

/// Severities at or above the configured reaction notify a person. The
/// debounce holds the notification back; the finding is dropped silently
/// when it resolves within the hold.
fn dispatch_finding(state: &AppState, finding: Finding) {
    log::warn!(
        "[Anomaly] {} on {}: {}",
        finding.detection_type.as_str(),
        finding.entity_id,
        finding.message
    );
    if !finding.reaction.notifies() {
        return;
    }
    let state = state.clone();
    tokio::spawn(async move {
        if finding.debounce_secs > 0 {
            tokio::time::sleep(Duration::from_secs(finding.debounce_secs)).await;
            let still_open = state
                .conn()
                .and_then(|conn| {
                    database::anomaly::open_anomaly(&conn, &finding.entity_id, finding.detection_type)
                })
                .map(|id| id == Some(finding.anomaly_id))
                .unwrap_or(false);
            if !still_open {
                log::debug!(
                    "[Anomaly] {} on {} resolved within debounce, dropped",
                    finding.detection_type.as_str(),
                    finding.entity_id
                );
                return;
            }
        }
        let _ = state.dispatch_tx.try_send(DispatchEvent {
            notification_type: NotificationType::Anomaly,
            severity: finding.severity,
            title: format!("Anomaly: {}", finding.entity_id),
            message: finding.message,
            person: None,
        });
    });
}

fn ingest_event(state: &AppState, event: &NewStateEvent) -> Result<Vec<Finding>> {
    let conn = state.conn()?;
    let settings = state.settings()?;
    let room_map = database::schedule::entity_room_map(&conn)?;
    handle_event(&conn, &settings, &room_map, event, chrono::Utc::now().timestamp())
}

/// Resolved per-entity detector configuration. The most specific stored
/// scope wins; `inherit` sensitivity keeps walking toward global.
pub fn effective_config(
    conn: &Connection,
    entity_id: &str,
    room_map: &HashMap<String, String>,
) -> Result<AnomalyConfig> {
    let domain = crate::models::entity_domain(entity_id).to_string();
    let room = room_map.get(entity_id).cloned().unwrap_or_default();

    let chain = [
        (AnomalyScope::Device, entity_id.to_string()),
        (AnomalyScope::Room, room),
        (AnomalyScope::Domain, domain),
        (AnomalyScope::Global, String::new()),
    ];

    let mut effective: Option<AnomalyConfig> = None;
    for (scope, key) in &chain {
        if *scope != AnomalyScope::Global && key.is_empty() {
            continue;
        }
        if let Some(config) = database::anomaly::get_config(conn, *scope, key)? {
            match &mut effective {
                None => effective = Some(config),
                Some(e) if e.sensitivity == Sensitivity::Inherit => {
                    e.sensitivity = config.sensitivity;
                }
                Some(_) => break,
            }
        }
    }

    let mut config = effective.unwrap_or_else(AnomalyConfig::global_default);
    if config.sensitivity == Sensitivity::Inherit {
        config.sensitivity = Sensitivity::Medium;
    }
    Ok(config)
}

fn detector_paused(settings: &EngineSettings, config: &AnomalyConfig, now: i64) -> bool {
    if !settings.anomaly.enabled || settings.anomaly.vacation_mode {
        return true;
    }
    if settings.anomaly.paused_until.map_or(false, |t| t > now) {
        return true;
    }
    config.pause_until.map_or(false, |t| t > now)
}

fn baseline_ready(settings: &EngineSettings, baseline: &Baseline, now: i64) -> bool {
    baseline.sample_count >= MIN_BASELINE_SAMPLES
        || (baseline.sample_count >= 2
            && now - baseline.first_seen >= settings.anomaly.baseline_learning_secs as i64)
}

/// Updates the entity baseline and runs the streaming checks. Every event
/// resolves open offline/stuck findings for its entity, and an in-band
/// update gap closes an open frequency finding.
pub fn handle_event(
    conn: &Connection,
    settings: &EngineSettings,
    room_map: &HashMap<String, String>,
    event: &NewStateEvent,
    now: i64,
) -> Result<Vec<Finding>> {
    let config = effective_config(conn, &event.entity_id, room_map)?;
    let mut findings = Vec::new();

    // The entity is alive again.
    for dtype in [DetectionType::Offline, DetectionType::Stuck] {
        if let Some(id) = database::anomaly::open_anomaly(conn, &event.entity_id, dtype)? {
            database::anomaly::resolve_anomaly(conn, id)?;
            log::info!("[Anomaly] {} resolved for {}", dtype.as_str(), event.entity_id);
        }
    }

    let value = event.numeric_value();
    let previous = database::anomaly::get_baseline(conn, &event.entity_id)?;
    let interval = previous
        .as_ref()
        .filter(|b| b.last_update > 0)
        .map(|b| (event.timestamp - b.last_update).max(0) as f64);

    let baseline = update_baseline(previous, &event.entity_id, value, interval, event.timestamp);
    database::anomaly::put_baseline(conn, &baseline)?;

    // Cadence back in band closes an open frequency finding.
    if let Some(gap) = interval {
        if baseline.interval_mean > 0.0
            && gap >= baseline.interval_mean * FREQUENCY_RATIO
            && gap <= baseline.interval_mean * QUIET_INTERVAL_FACTOR
        {
            if let Some(id) =
                database::anomaly::open_anomaly(conn, &event.entity_id, DetectionType::Frequency)?
            {
                database::anomaly::resolve_anomaly(conn, id)?;
                log::info!("[Anomaly] frequency resolved for {}", event.entity_id);
            }
        }
    }

    if config.whitelisted
        || config.sensitivity == Sensitivity::Off
        || detector_paused(settings, &config, now)
    {
        return Ok(findings);
    }
    let ready = baseline_ready(settings, &baseline, now);

    if config.detection_types.contains(&DetectionType::ValueDeviation) {
        if let Some(v) = value {
            findings.extend(check_value(conn, &config, &baseline, &event.entity_id, v, ready)?);
        }
    }

    if config.detection_types.contains(&DetectionType::Frequency) && ready {
        if let Some(gap) = interval {
            if baseline.interval_mean > 0.0 && gap < baseline.interval_mean * FREQUENCY_RATIO {
                findings.extend(raise(
                    conn,
                    &config,
                    &event.entity_id,
                    DetectionType::Frequency,
                    AnomalySeverity::Low,
                    format!(
                        "{} is updating every {:.0}s, usually every {:.0}s",
                        event.entity_id, gap, baseline.interval_mean
                    ),
                    Some(gap),
                    Some(baseline.interval_mean * FREQUENCY_RATIO),
                    None,
                )?);
            }
        }
    }

    Ok(findings)
}

fn update_baseline(
    previous: Option<Baseline>,
    entity_id: &str,
    value: Option<f64>,
    interval: Option<f64>,
    timestamp: i64,
) -> Baseline {
    let mut b = previous.unwrap_or_else(|| Baseline {
        entity_id: entity_id.to_string(),
        first_seen: timestamp,
        ..Default::default()
    });

    if let Some(v) = value {
        // Welford, so the stddev never needs a second pass.
        b.sample_count += 1;
        let delta = v - b.value_mean;
        b.value_mean += delta / b.sample_count as f64;
        b.value_m2 += delta * (v - b.value_mean);
        b.last_value = Some(v);
    } else {
        b.sample_count += 1;
    }

    if let Some(gap) = interval {
        b.interval_mean = if b.interval_mean == 0.0 {
            gap
        } else {
            INTERVAL_ALPHA * gap + (1.0 - INTERVAL_ALPHA) * b.interval_mean
        };
    }
    b.last_update = timestamp;
    b
}

fn check_value(
    conn: &Connection,
    config: &AnomalyConfig,
    baseline: &Baseline,
    entity_id: &str,
    value: f64,
    baseline_ready: bool,
) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();

    // Absolute bounds fire regardless of learning progress.
    let out_of_bounds = config.value_min.map_or(false, |lo| value < lo)
        || config.value_max.map_or(false, |hi| value > hi);
    if out_of_bounds {
        findings.extend(raise(
            conn,
            config,
            entity_id,
            DetectionType::ValueDeviation,
            AnomalySeverity::High,
            format!(
                "{} reported {} outside the configured range",
                entity_id, value
            ),
            Some(value),
            config.value_min,
            config.value_max,
        )?);
        return Ok(findings);
    }

    if entity_id.contains("battery") && value < config.battery_floor {
        findings.extend(raise(
            conn,
            config,
            entity_id,
            DetectionType::ValueDeviation,
            AnomalySeverity::Medium,
            format!("{} battery is at {:.0}%", entity_id, value),
            Some(value),
            Some(config.battery_floor),
            None,
        )?);
        return Ok(findings);
    }

    let Some(multiplier) = config.sensitivity.sigma_multiplier() else {
        return Ok(findings);
    };
    if !baseline_ready {
        return Ok(findings);
    }
    let stddev = baseline.value_stddev();
    if stddev < f64::EPSILON {
        return Ok(findings);
    }
    let deviation = (value - baseline.value_mean).abs() / stddev;
    if deviation > multiplier {
        let severity = if deviation > multiplier * 2.0 {
            AnomalySeverity::High
        } else {
            AnomalySeverity::Medium
        };
        findings.extend(raise(
            conn,
            config,
            entity_id,
            DetectionType::ValueDeviation,
            severity,
            format!(
                "{} reported {:.1}, {:.1} sigma away from its usual {:.1}",
                entity_id, value, deviation, baseline.value_mean
            ),
            Some(value),
            Some(baseline.value_mean - multiplier * stddev),
            Some(baseline.value_mean + multiplier * stddev),
        )?);
    }
    Ok(findings)
}

#[allow(clippy::too_many_arguments)]
fn raise(
    conn: &Connection,
    config: &AnomalyConfig,
    entity_id: &str,
    detection_type: DetectionType,
    severity: AnomalySeverity,
    message: String,
    observed: Option<f64>,
    expected_low: Option<f64>,
    expected_high: Option<f64>,
) -> Result<Vec<Finding>> {
    // One open finding per entity and type.
    if database::anomaly::open_anomaly(conn, entity_id, detection_type)?.is_some() {
        return Ok(Vec::new());
    }
    let id = database::anomaly::insert_anomaly(
        conn,
        entity_id,
        detection_type,
        severity,
        &message,
        observed,
        expected_low,
        expected_high,
    )?;
    Ok(vec![Finding {
        anomaly_id: id,
        entity_id: entity_id.to_string(),
        detection_type,
        severity,
        message,
        reaction: config.reactions.for_severity(severity),
        debounce_secs: config.reactions.debounce_secs,
    }])
}

fn run_silence_scan(state: &AppState) -> Result<Vec<Finding>> {
    let conn = state.conn()?;
    let settings = state.settings()?;
    let room_map = database::schedule::entity_room_map(&conn)?;
    scan_silent_entities(&conn, &settings, &room_map, chrono::Utc::now().timestamp())
}

/// Periodic sweep for conditions only visible through absence: devices
/// that stopped reporting or fell behind their usual cadence, sensors
/// frozen on one value, and active time patterns whose window passed
/// without the expected event.
pub fn scan_silent_entities(
    conn: &Connection,
    settings: &EngineSettings,
    room_map: &HashMap<String, String>,
    now: i64,
) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();

    for (entity_id, last_seen) in database::events::last_update_per_entity(conn)? {
        let config = effective_config(conn, &entity_id, room_map)?;
        if config.whitelisted
            || config.sensitivity == Sensitivity::Off
            || detector_paused(settings, &config, now)
        {
            continue;
        }
        let silent_for = now - last_seen;
        if config.detection_types.contains(&DetectionType::Offline)
            && silent_for > config.offline_timeout_secs as i64
        {
            findings.extend(raise(
                conn,
                &config,
                &entity_id,
                DetectionType::Offline,
                AnomalySeverity::High,
                format!(
                    "{} has not reported for {} hours",
                    entity_id,
                    silent_for / 3600
                ),
                Some(silent_for as f64),
                None,
                Some(config.offline_timeout_secs as f64),
            )?);
            continue;
        }
        let baseline = database::anomaly::get_baseline(conn, &entity_id)?;

        // Quiet side of the frequency check: still inside the offline
        // timeout, but silent past four times its learned interval.
        if config.detection_types.contains(&DetectionType::Frequency) {
            if let Some(b) = baseline.as_ref() {
                if b.interval_mean > 0.0
                    && baseline_ready(settings, b, now)
                    && (silent_for as f64) > b.interval_mean * QUIET_INTERVAL_FACTOR
                {
                    findings.extend(raise(
                        conn,
                        &config,
                        &entity_id,
                        DetectionType::Frequency,
                        AnomalySeverity::Low,
                        format!(
                            "{} has been quiet for {:.0}s, usually reports every {:.0}s",
                            entity_id, silent_for, b.interval_mean
                        ),
                        Some(silent_for as f64),
                        None,
                        Some(b.interval_mean * QUIET_INTERVAL_FACTOR),
                    )?);
                }
            }
        }

        // Stuck: alive recently per its own cadence would imply updates,
        // yet the value has not moved for the stuck timeout.
        if config.detection_types.contains(&DetectionType::Stuck)
            && is_sensor_entity(&entity_id)
            && silent_for > config.stuck_timeout_secs as i64
        {
            if let Some(baseline) = baseline {
                if baseline.interval_mean > 0.0
                    && baseline.interval_mean * 4.0 < config.stuck_timeout_secs as f64
                    && baseline_ready(settings, &baseline, now)
                {
                    findings.extend(raise(
                        conn,
                        &config,
                        &entity_id,
                        DetectionType::Stuck,
                        AnomalySeverity::Medium,
                        format!(
                            "{} looks stuck, no change for {} hours",
                            entity_id,
                            silent_for / 3600
                        ),
                        baseline.last_value,
                        None,
                        None,
                    )?);
                }
            }
        }
    }

    findings.extend(scan_pattern_deviations(conn, settings, room_map, now)?);
    Ok(findings)
}

/// An active time pattern whose window already closed today with no
/// matching event is a deviation from the learned routine.
fn scan_pattern_deviations(
    conn: &Connection,
    settings: &EngineSettings,
    room_map: &HashMap<String, String>,
    now: i64,
) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    let tz = &settings.general.timezone;
    let today_minute = timeutil::minute_of_day(now, tz) as i64;

    for pattern in database::patterns::list_by_statuses(conn, &[PatternStatus::Active])? {
        if pattern.pattern_type != PatternType::TimeBased {
            continue;
        }
        let config = effective_config(conn, &pattern.entity_id, room_map)?;
        if config.whitelisted
            || config.sensitivity == Sensitivity::Off
            || !config.detection_types.contains(&DetectionType::PatternDeviation)
            || detector_paused(settings, &config, now)
        {
            continue;
        }
        let (Some(hour), Some(minute)) =
            (pattern.pattern_data.avg_hour, pattern.pattern_data.avg_minute)
        else {
            continue;
        };
        let half = pattern.pattern_data.time_window_min.unwrap_or(30) as i64 / 2;
        let window_end = hour as i64 * 60 + minute as i64 + half;
        if today_minute <= window_end {
            continue;
        }
        // Look for the expected transition since local midnight.
        let midnight = now - today_minute * 60;
        let matched = database::events::get_events_for_entity(
            conn,
            &pattern.entity_id,
            midnight,
            now,
        )?
        .iter()
        .any(|e| e.new_state == pattern.target_state);
        if !matched {
            findings.extend(raise(
                conn,
                &config,
                &pattern.entity_id,
                DetectionType::PatternDeviation,
                AnomalySeverity::Low,
                format!(
                    "{} usually switches to '{}' around {:02}:{:02}, but did not today",
                    pattern.entity_id, pattern.target_state, hour, minute
                ),
                None,
                None,
                None,
            )?);
        }
    }
    Ok(findings)
}
