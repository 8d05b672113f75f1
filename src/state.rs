use anyhow::Result;
use rusqlite::Connection;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::models::{AnomalySeverity, EngineSettings, NewStateEvent, NotificationType};
use crate::utils::ha::HaClient;

/// Capacity of the ingestion channel. The hot path uses try_send and drops
/// with a warning when the writer falls this far behind.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
pub const DISPATCH_CHANNEL_CAPACITY: usize = 256;

/// An event handed to the notification dispatcher by the miner or the
/// anomaly detector.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub notification_type: NotificationType,
    pub severity: AnomalySeverity,
    pub title: String,
    pub message: String,
    pub person: Option<String>,
}

/// Shared handle passed to services and api operations.
#[derive(Debug, Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub event_tx: mpsc::Sender<NewStateEvent>,
    pub dispatch_tx: mpsc::Sender<DispatchEvent>,
    pub ha: HaClient,
}

impl AppState {
    pub fn conn(&self) -> Result<Connection> {
        crate::database::open(&self.db_path)
    }

    /// Settings are re-read from disk so concurrent updates through the api
    /// are picked up by the next operation.
    pub fn settings(&self) -> Result<EngineSettings> {
        crate::utils::config::load_settings(&self.data_dir)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    pub struct TestState {
        pub state: AppState,
        pub event_rx: mpsc::Receiver<NewStateEvent>,
        pub dispatch_rx: mpsc::Receiver<DispatchEvent>,
        // Held so the database outlives the test.
        _dir: tempfile::TempDir,
    }

    pub fn app_state() -> TestState {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("mindhome.db");
        crate::database::init_database(&db_path).expect("init db");
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);
        TestState {
            state: AppState {
                data_dir: dir.path().to_path_buf(),
                db_path,
                event_tx,
                dispatch_tx,
                ha: HaClient::from_env(),
            },
            event_rx,
            dispatch_rx,
            _dir: dir,
        }
    }
}
