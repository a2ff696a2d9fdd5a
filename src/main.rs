use anyhow::Context;
use change_sensor::{SensorConfig, SensorCoordinator};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting change sensor");
    let config = SensorConfig::from_env().context("Invalid change sensor configuration")?;

    // Start the coordinator which manages isolated tasks for:
    // 1. Polling the value (and gate) entities from Home Assistant
    // 2. The change sensor event loop and its flush timer
    // 3. Publishing the reported state back to Home Assistant
    let coordinator = SensorCoordinator::start(&config);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    coordinator.shutdown().await;

    Ok(())
}
