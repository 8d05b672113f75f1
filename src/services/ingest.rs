use std::time::Duration;
use tokio::sync::mpsc;

use crate::database;
use crate::models::{NewStateEvent, TimeBucket};
use crate::state::AppState;
use crate::utils::time as timeutil;

const MAINTENANCE_INTERVAL_SECS: u64 = 3600;

/// Single-writer ingestion loop. The only history-store write on the hot
/// path is the append; everything downstream gets a forwarded copy.
pub fn start_ingest(
    state: AppState,
    mut event_rx: mpsc::Receiver<NewStateEvent>,
    forwards: Vec<mpsc::Sender<NewStateEvent>>,
) {
    tokio::spawn(async move {
        log::info!("[Ingest] History store writer started");
        let conn = match database::open(&state.db_path) {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("[Ingest] Failed to open database: {}", e);
                return;
            }
        };
        let mut timezone = "UTC".to_string();

        while let Some(event) = event_rx.recv().await {
            // Settings edits apply without a restart; a failed read keeps
            // the last known zone.
            if let Ok(s) = state.settings() {
                timezone = s.general.timezone;
            }
            let bucket = TimeBucket::from_hour(timeutil::local_hour(event.timestamp, &timezone));
            if let Err(e) = database::events::insert_event(&conn, &event, bucket) {
                log::error!("[Ingest] Failed to store event for {}: {}", event.entity_id, e);
                continue;
            }
            // Detectors and the executor watch the same stream; a full
            // consumer queue must not stall the writer.
            for tx in &forwards {
                if let Err(e) = tx.try_send(event.clone()) {
                    log::warn!("[Ingest] Consumer queue full, event dropped: {}", e);
                }
            }
        }
        log::info!("[Ingest] Event channel closed, writer stopping");
    });
}

/// Hourly retention pass. Purging never happens synchronously on write.
pub fn start_maintenance(state: AppState) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(MAINTENANCE_INTERVAL_SECS)).await;
            if let Err(e) = run_retention_pass(&state) {
                log::error!("[Maintenance] Retention pass failed: {}", e);
            }
        }
    });
}

fn run_retention_pass(state: &AppState) -> anyhow::Result<()> {
    let settings = state.settings()?;
    if !settings.storage.auto_cleanup {
        return Ok(());
    }
    let cutoff =
        chrono::Utc::now().timestamp() - settings.storage.retention_days * 24 * 3600;
    let conn = state.conn()?;
    let deleted = database::events::purge_events_before(&conn, cutoff)?;
    if deleted > 0 {
        log::info!("[Maintenance] Purged {} events past retention", deleted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StateEvent;
    use crate::state::test_support;

    fn event(entity: &str, timestamp: i64) -> NewStateEvent {
        NewStateEvent {
            entity_id: entity.to_string(),
            old_state: Some("off".to_string()),
            new_state: Some("on".to_string()),
            attributes: Default::default(),
            timestamp,
            persons_home: vec![],
        }
    }

    async fn wait_for_stored(state: &AppState, entity: &str) -> StateEvent {
        for _ in 0..200 {
            let conn = state.conn().unwrap();
            let mut hits =
                database::events::get_events_for_entity(&conn, entity, 0, i64::MAX).unwrap();
            if let Some(hit) = hits.pop() {
                return hit;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("event for {} never reached the store", entity);
    }

    #[tokio::test]
    async fn timezone_change_applies_without_restart() {
        let ts = test_support::app_state();
        let state = ts.state.clone();
        start_ingest(state.clone(), ts.event_rx, vec![]);

        // 22:13 UTC, 07:13 the next morning in Tokyo
        let stamp = 1_700_000_000;
        state.event_tx.send(event("light.first", stamp)).await.unwrap();
        let first = wait_for_stored(&state, "light.first").await;
        assert_eq!(first.time_bucket, TimeBucket::LateEvening);

        let mut settings = state.settings().unwrap();
        settings.general.timezone = "Asia/Tokyo".to_string();
        crate::utils::config::save_settings(&state.data_dir, &settings).unwrap();

        state.event_tx.send(event("light.second", stamp)).await.unwrap();
        let second = wait_for_stored(&state, "light.second").await;
        assert_eq!(second.time_bucket, TimeBucket::Morning);
    }
}
