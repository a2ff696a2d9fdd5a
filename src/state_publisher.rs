use crate::change_sensor::ReportedState;
use crate::home_assistant::{HAStateUpdate, HomeAssistantAPI};
use serde_json::{json, Value};
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const ICON: &str = "mdi:calculator";

/// Task pushing every reported state of the sensor to Home Assistant
pub struct StatePublisher {
    entity_id: String,
    ha_client: HomeAssistantAPI,
}

impl StatePublisher {
    pub fn new(entity_id: String) -> Self {
        Self {
            entity_id,
            ha_client: HomeAssistantAPI::new(),
        }
    }

    /// Spawns the publisher; it runs until every sender of `states` is gone
    pub fn spawn(mut self, mut states: Receiver<ReportedState>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting state publisher for {}", self.entity_id);

            while let Some(state) = states.recv().await {
                self.publish(&state).await;
            }

            info!("State publisher for {} exiting", self.entity_id);
        })
    }

    async fn publish(&mut self, state: &ReportedState) {
        let update = state_update(state);
        debug!("Publishing {} = {}", self.entity_id, update.state);
        // A failed write is not retried, the next state replaces it anyway
        if let Err(e) = self.ha_client.publish_state(&self.entity_id, &update).await {
            warn!("Failed to publish state of {}: {}", self.entity_id, e);
        }
    }
}

/// Home Assistant representation of a reported state.
pub fn state_update(state: &ReportedState) -> HAStateUpdate {
    let mut attributes = json!({
        "friendly_name": state.name,
        "icon": ICON,
        "delta": state.attributes.delta,
        "accu": state.attributes.accu,
        "prev_value": state.attributes.prev_value,
        "last_update": state.attributes.last_update,
    });
    if let (Some(unit), Value::Object(map)) = (&state.unit, &mut attributes) {
        map.insert("unit_of_measurement".to_string(), json!(unit));
    }

    HAStateUpdate {
        state: state.value.to_string(),
        attributes,
    }
}
