use crate::change_sensor::SensorEvent;
use crate::home_assistant::{HASensor, HomeAssistantAPI};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What a polled entity feeds into the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Value,
    Gate,
}

/// Last state seen for an entity, used to only report changes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ObservedState {
    state: String,
    unit: Option<String>,
}

/// Isolated task polling one Home Assistant entity and reporting its state changes
pub struct EntityReader {
    entity_id: String,
    role: SourceRole,
    poll_interval: Duration,
    update_sender: Sender<SensorEvent>,
    ha_client: HomeAssistantAPI,
    last_seen: Option<ObservedState>,
}

impl EntityReader {
    pub fn new(
        entity_id: String,
        role: SourceRole,
        poll_interval: Duration,
        update_sender: Sender<SensorEvent>,
    ) -> Self {
        Self {
            entity_id,
            role,
            poll_interval,
            update_sender,
            ha_client: HomeAssistantAPI::new(),
            last_seen: None,
        }
    }

    /// Spawns the reader in its own task
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(
            "Starting {:?} reader for {} every {:?}",
            self.role, self.entity_id, self.poll_interval
        );

        let mut read_interval = interval(self.poll_interval);
        read_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            read_interval.tick().await;

            match self.read_state_with_retry().await {
                Ok(sensor) => {
                    let Some(event) = self.observe(&sensor) else {
                        continue;
                    };
                    if self.update_sender.send(event).await.is_err() {
                        info!("Sensor queue closed, stopping reader for {}", self.entity_id);
                        break;
                    }
                }
                Err(e) => warn!("Home Assistant read error for {}: {}", self.entity_id, e),
            }
        }
    }

    /// Turns a fresh read into an event if the state or unit changed since the last one.
    fn observe(&mut self, sensor: &HASensor) -> Option<SensorEvent> {
        let observed = ObservedState {
            state: sensor.state.clone(),
            unit: sensor.unit_of_measurement().map(str::to_string),
        };
        if self.last_seen.as_ref() == Some(&observed) {
            return None;
        }
        debug!("{} changed to {:?}", self.entity_id, observed);
        self.last_seen = Some(observed.clone());

        let event = match self.role {
            SourceRole::Value => SensorEvent::ValueChanged {
                source_id: self.entity_id.clone(),
                raw: Some(observed.state),
                unit: observed.unit,
            },
            SourceRole::Gate => SensorEvent::GateChanged {
                source_id: self.entity_id.clone(),
                raw: Some(observed.state),
            },
        };
        Some(event)
    }

    /// Reads the entity with automatic retry
    async fn read_state_with_retry(&mut self) -> Result<HASensor, String> {
        const MAX_RETRIES: u32 = 3;

        let mut last_error = String::new();
        for attempt in 1..=MAX_RETRIES {
            match self.ha_client.read_sensor_value(&self.entity_id).await {
                Ok(sensor) => return Ok(sensor),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < MAX_RETRIES {
                        debug!(
                            "Read attempt {} for {} failed: {}. Retrying...",
                            attempt, self.entity_id, e
                        );
                        sleep(Duration::from_millis(200 * attempt as u64)).await;
                    }
                }
            }
        }

        Err(format!(
            "All {} attempts failed. Last error: {}",
            MAX_RETRIES, last_error
        ))
    }
}
