use crate::entity::EntityState;
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HomeAssistantAPI {
    endpoint_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl HomeAssistantAPI {
    pub fn new(endpoint_url: &str, auth_token: &str) -> anyhow::Result<Self> {
        Self::with_timeout(endpoint_url, auth_token, REQUEST_TIMEOUT)
    }

    /// A hung Home Assistant fails each write after `timeout` instead of stalling publishing
    pub fn with_timeout(
        endpoint_url: &str,
        auth_token: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint_url: endpoint_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
            client,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint_url.is_empty()
    }

    /// Creates or replaces the state of one entity
    pub async fn publish_state(&self, entity: &EntityState) -> Result<HASensor, anyhow::Error> {
        if !self.is_configured() {
            anyhow::bail!("No HA connection");
        }
        let result = self
            .client
            .post(format!(
                "{}/api/states/{}",
                self.endpoint_url, entity.entity_id
            ))
            .bearer_auth(&self.auth_token)
            .json(entity)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HASensor {
    #[serde(rename = "entity_id")]
    pub entity_id: String,
    pub state: String,
    #[serde(rename = "last_changed", default)]
    pub last_changed: String,
    #[serde(rename = "last_updated", default)]
    pub last_updated: String,
}
