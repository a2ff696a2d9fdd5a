use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;

pub struct HomeAssistantAPI {
    endpoint_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl Default for HomeAssistantAPI {
    fn default() -> Self {
        Self::new()
    }
}

impl HomeAssistantAPI {
    pub fn new() -> Self {
        Self {
            endpoint_url: env::var("HA_URL").unwrap_or_default(),
            auth_token: env::var("HA_TOKEN").unwrap_or_default(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn read_sensor_value(
        &mut self,
        sensor_path: &str,
    ) -> Result<HASensor, anyhow::Error> {
        if self.endpoint_url.is_empty() {
            anyhow::bail!("No HA connection");
        }
        let result = self
            .client
            .get(format!("{}/api/states/{}", self.endpoint_url, sensor_path))
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }

    /// Creates or replaces the state of `entity_id`.
    pub async fn publish_state(
        &mut self,
        entity_id: &str,
        state: &HAStateUpdate,
    ) -> Result<(), anyhow::Error> {
        if self.endpoint_url.is_empty() {
            anyhow::bail!("No HA connection");
        }
        self.client
            .post(format!("{}/api/states/{}", self.endpoint_url, entity_id))
            .bearer_auth(&self.auth_token)
            .json(state)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HASensor {
    #[serde(rename = "entity_id")]
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(rename = "last_changed", default)]
    pub last_changed: String,
    #[serde(rename = "last_reported", default)]
    pub last_reported: String,
    #[serde(rename = "last_updated", default)]
    pub last_updated: String,
}

impl HASensor {
    pub fn unit_of_measurement(&self) -> Option<&str> {
        self.attributes
            .get("unit_of_measurement")
            .and_then(Value::as_str)
    }
}

/// Body of a state write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HAStateUpdate {
    pub state: String,
    pub attributes: Value,
}

/// Serializes tests that read or write `HA_URL`/`HA_TOKEN`.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
