use crate::aggregator::SensorSnapshot;
use crate::entity::{entity_states, EntityState};
use crate::home_assistant::HomeAssistantAPI;
use crate::poll_coordinator::PollState;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;

/// Pushes every entity state to Home Assistant after each poll
pub struct EntityPublisher {
    device_id: String,
    ha_client: HomeAssistantAPI,
    updates: watch::Receiver<PollState>,
}

impl EntityPublisher {
    pub fn new(
        device_id: &str,
        ha_client: HomeAssistantAPI,
        updates: watch::Receiver<PollState>,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            ha_client,
            updates,
        }
    }

    /// Runs until the coordinator goes away
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        if self.ha_client.is_configured() {
            info!(device_id = %self.device_id, "Publishing Powerwall entities to Home Assistant");
        } else {
            info!("No Home Assistant URL configured, entity states will only be logged");
        }

        while self.updates.changed().await.is_ok() {
            let snapshot = self.updates.borrow_and_update().snapshot().copied();
            self.publish(snapshot.as_ref()).await;
        }

        debug!("Poll coordinator dropped, entity publisher exiting");
    }

    /// Publishes all entities, returning how many could not be written
    pub async fn publish(&self, snapshot: Option<&SensorSnapshot>) -> usize {
        if !self.ha_client.is_configured() {
            match snapshot {
                Some(data) => info!(
                    "Powerwall: battery {:.1}% {}W, grid {}W (connected: {}), home {}W, solar {}W",
                    data.battery_level,
                    data.battery.power,
                    data.grid.power,
                    data.grid_connected,
                    data.load.power,
                    data.solar.power
                ),
                None => info!("Powerwall: unavailable"),
            }
            return 0;
        }

        let mut failures = 0;
        for state in &entity_states(&self.device_id, snapshot) {
            if let Err(e) = self.publish_with_retry(state).await {
                warn!(entity_id = %state.entity_id, "Home Assistant write failed: {e}");
                failures += 1;
            }
        }
        failures
    }

    async fn publish_with_retry(&self, state: &EntityState) -> Result<(), String> {
        for attempt in 1..=MAX_RETRIES {
            match self.ha_client.publish_state(state).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < MAX_RETRIES => {
                    debug!(
                        entity_id = %state.entity_id,
                        "HA write attempt {attempt} failed: {e}. Retrying..."
                    );
                    sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(e) => {
                    return Err(format!(
                        "All {MAX_RETRIES} attempts failed. Last error: {e}"
                    ))
                }
            }
        }

        unreachable!()
    }
}
