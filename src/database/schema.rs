use anyhow::Result;
use rusqlite::Connection;

pub fn create_tables(conn: &Connection) -> Result<()> {
    // History store: append-only device state changes with context
    conn.execute(
        "CREATE TABLE IF NOT EXISTS state_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            old_state TEXT NOT NULL,
            new_state TEXT NOT NULL,
            attributes TEXT,
            timestamp INTEGER NOT NULL,
            time_bucket TEXT NOT NULL,
            persons_home TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_state_events_entity_ts
         ON state_events(entity_id, timestamp)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_state_events_ts ON state_events(timestamp)",
        [],
    )?;

    // Mined patterns
    conn.execute(
        "CREATE TABLE IF NOT EXISTS patterns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern_type TEXT NOT NULL,
            room_id TEXT NOT NULL,
            domain TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            target_state TEXT NOT NULL,
            pattern_data TEXT NOT NULL,
            confidence REAL NOT NULL,
            match_count INTEGER NOT NULL,
            status TEXT NOT NULL,
            test_mode INTEGER NOT NULL DEFAULT 0,
            rejection_reason TEXT,
            last_observed INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            trigger_entity TEXT NOT NULL DEFAULT '',
            trigger_state TEXT NOT NULL DEFAULT '',
            UNIQUE(pattern_type, entity_id, target_state, trigger_entity, trigger_state)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_patterns_status ON patterns(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_patterns_scope ON patterns(room_id, domain)",
        [],
    )?;

    // Predictions (one open prediction per suggested pattern)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS predictions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            confidence REAL NOT NULL,
            rejection_reason TEXT,
            created_at INTEGER NOT NULL,
            decided_at INTEGER,
            FOREIGN KEY (pattern_id) REFERENCES patterns(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_predictions_pattern ON predictions(pattern_id)",
        [],
    )?;

    // Suppression fingerprints written by unwanted/wrong-detection rejections
    conn.execute(
        "CREATE TABLE IF NOT EXISTS suppressions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            target_state TEXT NOT NULL,
            trigger_entity TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            UNIQUE(pattern_type, entity_id, target_state, trigger_entity)
        )",
        [],
    )?;

    // Learning-phase state per (room, domain)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS learning_phases (
            room_id TEXT NOT NULL,
            domain TEXT NOT NULL,
            phase TEXT NOT NULL,
            confidence_score REAL NOT NULL DEFAULT 0,
            confirmed_count INTEGER NOT NULL DEFAULT 0,
            rejected_count INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (room_id, domain)
        )",
        [],
    )?;

    // Scoped anomaly configuration documents (JSON payload per scope)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS anomaly_configs (
            scope TEXT NOT NULL,
            scope_key TEXT NOT NULL,
            config TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (scope, scope_key)
        )",
        [],
    )?;

    // Persisted anomaly findings
    conn.execute(
        "CREATE TABLE IF NOT EXISTS anomalies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            detection_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            message TEXT NOT NULL,
            observed_value REAL,
            expected_low REAL,
            expected_high REAL,
            detected_at INTEGER NOT NULL,
            resolved_at INTEGER
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_anomalies_entity ON anomalies(entity_id, detected_at)",
        [],
    )?;

    // Per-entity anomaly baselines (persisted so restarts keep learning)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS anomaly_baselines (
            entity_id TEXT PRIMARY KEY,
            value_mean REAL NOT NULL DEFAULT 0,
            value_m2 REAL NOT NULL DEFAULT 0,
            interval_mean REAL NOT NULL DEFAULT 0,
            sample_count INTEGER NOT NULL DEFAULT 0,
            first_seen INTEGER NOT NULL,
            last_update INTEGER NOT NULL,
            last_value REAL
        )",
        [],
    )?;

    // Notifications with delivery disposition
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            notification_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            person TEXT,
            channel TEXT,
            delivery_state TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0,
            group_count INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_created
         ON notifications(notification_type, created_at)",
        [],
    )?;

    // Manual rules (excluded from mining)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS manual_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trigger_entity TEXT NOT NULL,
            trigger_state TEXT NOT NULL,
            action_entity TEXT NOT NULL,
            action_service TEXT NOT NULL,
            delay_secs INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            execution_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Pattern exclusions (normalized unordered pairs)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pattern_exclusions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            first TEXT NOT NULL,
            second TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(kind, first, second)
        )",
        [],
    )?;

    // Scenes
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scenes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            icon TEXT,
            room_id TEXT,
            members TEXT NOT NULL,
            cron_schedule TEXT,
            action_delay_seconds INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Shift templates and person schedules
    conn.execute(
        "CREATE TABLE IF NOT EXISTS shift_templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            short_code TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS person_schedules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            person TEXT NOT NULL,
            schedule_type TEXT NOT NULL,
            leave_time TEXT,
            return_time TEXT,
            rotation_pattern TEXT NOT NULL DEFAULT '[]',
            rotation_start TEXT,
            rotation_end TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS shift_assignments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            person TEXT NOT NULL,
            date TEXT NOT NULL,
            template_id INTEGER NOT NULL,
            UNIQUE(person, date),
            FOREIGN KEY (template_id) REFERENCES shift_templates(id)
        )",
        [],
    )?;

    // Context resources
    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS device_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id TEXT NOT NULL,
            name TEXT NOT NULL,
            entities TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS calendar_triggers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            scene_id TEXT NOT NULL,
            at_timestamp INTEGER,
            daily_time TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (scene_id) REFERENCES scenes(id)
        )",
        [],
    )?;

    Ok(())
}
