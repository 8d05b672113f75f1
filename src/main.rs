use tokio::sync::mpsc;

use mindhome_engine::database;
use mindhome_engine::services;
use mindhome_engine::state::{AppState, DISPATCH_CHANNEL_CAPACITY, EVENT_CHANNEL_CAPACITY};
use mindhome_engine::utils::config;
use mindhome_engine::utils::ha::HaClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_dir = config::resolve_data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("mindhome.db");
    database::init_database(&db_path)?;
    log::info!("[Main] Database ready at {}", db_path.display());

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);
    let (anomaly_tx, anomaly_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (executor_tx, executor_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let state = AppState {
        data_dir,
        db_path,
        event_tx,
        dispatch_tx,
        ha: HaClient::from_env(),
    };

    services::ingest::start_ingest(state.clone(), event_rx, vec![anomaly_tx, executor_tx]);
    services::ingest::start_maintenance(state.clone());
    services::miner::start_miner(state.clone());
    services::anomaly::start_anomaly(state.clone(), anomaly_rx);
    services::executor::start_executor(state.clone(), executor_rx);
    services::notifier::start_notifier(state.clone(), dispatch_rx);
    log::info!("[Main] All services started");

    tokio::signal::ctrl_c().await?;
    log::info!("[Main] Shutdown signal received");
    Ok(())
}
