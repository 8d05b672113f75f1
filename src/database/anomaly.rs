use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

use crate::models::{
    Anomaly, AnomalyConfig, AnomalyScope, AnomalySeverity, DetectionType,
};

// --- scoped config documents -------------------------------------------------

pub fn get_config(
    conn: &Connection,
    scope: AnomalyScope,
    scope_key: &str,
) -> Result<Option<AnomalyConfig>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT config FROM anomaly_configs WHERE scope = ?1 AND scope_key = ?2",
            rusqlite::params![scope.as_str(), scope_key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub fn put_config(conn: &Connection, config: &AnomalyConfig) -> Result<()> {
    let raw = serde_json::to_string(config)?;
    conn.execute(
        "INSERT INTO anomaly_configs (scope, scope_key, config, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(scope, scope_key) DO UPDATE SET config = ?3, updated_at = ?4",
        rusqlite::params![
            config.scope.as_str(),
            &config.scope_key,
            &raw,
            chrono::Utc::now().timestamp(),
        ],
    )?;
    Ok(())
}

pub fn list_device_configs(conn: &Connection) -> Result<Vec<AnomalyConfig>> {
    let mut stmt =
        conn.prepare("SELECT config FROM anomaly_configs WHERE scope = 'device'")?;
    let configs = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter_map(|s| serde_json::from_str(&s).ok())
        .collect();
    Ok(configs)
}

// --- baselines ---------------------------------------------------------------

/// Rolling per-entity baseline using Welford accumulation for the value and
/// an EWMA for the update interval.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    pub entity_id: String,
    pub value_mean: f64,
    pub value_m2: f64,
    pub interval_mean: f64,
    pub sample_count: i64,
    pub first_seen: i64,
    pub last_update: i64,
    pub last_value: Option<f64>,
}

impl Baseline {
    pub fn value_stddev(&self) -> f64 {
        if self.sample_count < 2 {
            return 0.0;
        }
        (self.value_m2 / (self.sample_count - 1) as f64).sqrt()
    }
}

pub fn get_baseline(conn: &Connection, entity_id: &str) -> Result<Option<Baseline>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, value_mean, value_m2, interval_mean, sample_count,
                first_seen, last_update, last_value
         FROM anomaly_baselines WHERE entity_id = ?1",
    )?;
    let baseline = stmt
        .query_row([entity_id], |row| {
            Ok(Baseline {
                entity_id: row.get(0)?,
                value_mean: row.get(1)?,
                value_m2: row.get(2)?,
                interval_mean: row.get(3)?,
                sample_count: row.get(4)?,
                first_seen: row.get(5)?,
                last_update: row.get(6)?,
                last_value: row.get(7)?,
            })
        })
        .optional()?;
    Ok(baseline)
}

pub fn put_baseline(conn: &Connection, baseline: &Baseline) -> Result<()> {
    conn.execute(
        "INSERT INTO anomaly_baselines
         (entity_id, value_mean, value_m2, interval_mean, sample_count,
          first_seen, last_update, last_value)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(entity_id) DO UPDATE SET
            value_mean = ?2, value_m2 = ?3, interval_mean = ?4,
            sample_count = ?5, first_seen = ?6, last_update = ?7, last_value = ?8",
        rusqlite::params![
            &baseline.entity_id,
            baseline.value_mean,
            baseline.value_m2,
            baseline.interval_mean,
            baseline.sample_count,
            baseline.first_seen,
            baseline.last_update,
            baseline.last_value,
        ],
    )?;
    Ok(())
}

/// Explicit baseline reset; learning starts over from the next event.
pub fn reset_baselines(conn: &Connection, entity_id: Option<&str>) -> Result<usize> {
    let deleted = match entity_id {
        Some(e) => conn.execute("DELETE FROM anomaly_baselines WHERE entity_id = ?1", [e])?,
        None => conn.execute("DELETE FROM anomaly_baselines", [])?,
    };
    Ok(deleted)
}

// --- findings ----------------------------------------------------------------

pub fn insert_anomaly(
    conn: &Connection,
    entity_id: &str,
    detection_type: DetectionType,
    severity: AnomalySeverity,
    message: &str,
    observed_value: Option<f64>,
    expected_low: Option<f64>,
    expected_high: Option<f64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO anomalies
         (entity_id, detection_type, severity, message, observed_value,
          expected_low, expected_high, detected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            entity_id,
            detection_type.as_str(),
            severity.as_str(),
            message,
            observed_value,
            expected_low,
            expected_high,
            chrono::Utc::now().timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_anomaly(row: &rusqlite::Row) -> rusqlite::Result<Anomaly> {
    let detection: String = row.get(2)?;
    let severity: String = row.get(3)?;
    Ok(Anomaly {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        detection_type: DetectionType::parse(&detection).unwrap_or(DetectionType::Offline),
        severity: AnomalySeverity::parse(&severity).unwrap_or(AnomalySeverity::Low),
        message: row.get(4)?,
        observed_value: row.get(5)?,
        expected_low: row.get(6)?,
        expected_high: row.get(7)?,
        detected_at: row.get(8)?,
        resolved_at: row.get(9)?,
    })
}

pub fn list_anomalies(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<Anomaly>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_id, detection_type, severity, message, observed_value,
                expected_low, expected_high, detected_at, resolved_at
         FROM anomalies ORDER BY detected_at DESC LIMIT ?1 OFFSET ?2",
    )?;
    let anomalies = stmt
        .query_map([limit + 1, offset], row_to_anomaly)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(anomalies)
}

/// Open finding of the same type on the same entity, for resolution and
/// dedup of repeat detections.
pub fn open_anomaly(
    conn: &Connection,
    entity_id: &str,
    detection_type: DetectionType,
) -> Result<Option<i64>> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM anomalies
             WHERE entity_id = ?1 AND detection_type = ?2 AND resolved_at IS NULL
             ORDER BY detected_at DESC LIMIT 1",
            rusqlite::params![entity_id, detection_type.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn resolve_anomaly(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE anomalies SET resolved_at = ?2 WHERE id = ?1 AND resolved_at IS NULL",
        rusqlite::params![id, chrono::Utc::now().timestamp()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;

    #[test]
    fn config_document_roundtrip() {
        let conn = open_test_db();
        let mut config = AnomalyConfig::global_default();
        config.battery_floor = 20.0;
        put_config(&conn, &config).unwrap();
        let loaded = get_config(&conn, AnomalyScope::Global, "").unwrap().unwrap();
        assert_eq!(loaded.battery_floor, 20.0);
        assert!(loaded.detection_types.contains(&DetectionType::Offline));
    }

    #[test]
    fn baseline_reset_forgets_learning() {
        let conn = open_test_db();
        put_baseline(
            &conn,
            &Baseline {
                entity_id: "sensor.temp".to_string(),
                value_mean: 21.0,
                sample_count: 100,
                first_seen: 0,
                last_update: 1000,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(get_baseline(&conn, "sensor.temp").unwrap().is_some());
        reset_baselines(&conn, Some("sensor.temp")).unwrap();
        assert!(get_baseline(&conn, "sensor.temp").unwrap().is_none());
    }

    #[test]
    fn open_findings_resolve_once() {
        let conn = open_test_db();
        let id = insert_anomaly(
            &conn,
            "sensor.temp",
            DetectionType::Offline,
            AnomalySeverity::Medium,
            "no update for 25h",
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(
            open_anomaly(&conn, "sensor.temp", DetectionType::Offline).unwrap(),
            Some(id)
        );
        resolve_anomaly(&conn, id).unwrap();
        assert!(open_anomaly(&conn, "sensor.temp", DetectionType::Offline)
            .unwrap()
            .is_none());
    }
}
