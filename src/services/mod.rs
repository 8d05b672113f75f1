pub mod anomaly;
pub mod confidence;
pub mod conflict;
pub mod executor;
pub mod ingest;
pub mod learning;
pub mod miner;
pub mod notifier;
pub mod scenes;
pub mod shifts;
