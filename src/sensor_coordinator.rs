use crate::alignment::{Clock, SystemClock};
use crate::change_sensor::{ChangeSensor, ChangeSensorHandle};
use crate::config::SensorConfig;
use crate::entity_reader::{EntityReader, SourceRole};
use crate::state_publisher::StatePublisher;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const PUBLISH_QUEUE_SIZE: usize = 32;

/// Wires the entity readers, the change sensor and the state publisher together
/// and tears them down again.
pub struct SensorCoordinator {
    sensor: ChangeSensorHandle,
    readers: Vec<JoinHandle<()>>,
    publisher: JoinHandle<()>,
}

impl SensorCoordinator {
    /// Starts all tasks against the Home Assistant configured through `HA_URL`/`HA_TOKEN`
    pub fn start(config: &SensorConfig) -> Self {
        Self::start_with_clock(config, SystemClock)
    }

    pub fn start_with_clock(config: &SensorConfig, clock: impl Clock) -> Self {
        info!(
            "Initializing change sensor '{}' publishing to {}",
            config.name, config.sensor_entity_id
        );

        let (state_tx, state_rx) = mpsc::channel(PUBLISH_QUEUE_SIZE);
        let publisher = StatePublisher::new(config.sensor_entity_id.clone()).spawn(state_rx);

        let sensor = ChangeSensor::new(config, clock, state_tx).spawn();

        let mut readers = vec![EntityReader::new(
            config.roles.value.clone(),
            SourceRole::Value,
            config.poll_interval,
            sensor.events(),
        )
        .spawn()];
        if let Some(gate) = &config.roles.gate {
            readers.push(
                EntityReader::new(
                    gate.clone(),
                    SourceRole::Gate,
                    config.poll_interval,
                    sensor.events(),
                )
                .spawn(),
            );
        }

        info!("All change sensor tasks started");

        Self {
            sensor,
            readers,
            publisher,
        }
    }

    /// Stops readers first so nothing new is queued, then the sensor, then lets
    /// the publisher drain what was already reported.
    pub async fn shutdown(self) {
        for reader in &self.readers {
            reader.abort();
        }
        self.sensor.shutdown().await;
        if let Err(e) = self.publisher.await {
            warn!("State publisher task ended abnormally: {e}");
        }
        info!("Change sensor stopped");
    }
}
