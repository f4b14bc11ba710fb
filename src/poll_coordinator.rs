use crate::aggregator::{aggregate, SensorSnapshot};
use crate::device_client::DeviceClient;
use crate::error::PollError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(10);
/// Kept below the update interval so a hung request can't stall the cadence
pub const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub update_interval: Duration,
    pub tick_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            tick_timeout: DEFAULT_TICK_TIMEOUT,
        }
    }
}

/// What readers of the coordinator currently see
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    /// No tick has completed yet
    Pending,
    Ready(SensorSnapshot),
    /// The last tick failed; holds the reason
    Failed(String),
}

impl PollState {
    pub fn snapshot(&self) -> Option<&SensorSnapshot> {
        match self {
            PollState::Ready(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

/// Polls one Powerwall on a fixed interval and keeps the latest complete snapshot
pub struct PollCoordinator {
    client: Arc<dyn DeviceClient>,
    device_id: String,
    settings: PollSettings,
    set_up: AtomicBool,
    state: watch::Sender<PollState>,
}

impl PollCoordinator {
    pub fn new(client: Arc<dyn DeviceClient>, device_id: &str, settings: PollSettings) -> Self {
        let (state, _) = watch::channel(PollState::Pending);
        Self {
            client,
            device_id: device_id.to_string(),
            settings,
            set_up: AtomicBool::new(false),
            state,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Authenticates with the device. Must succeed before any tick will run.
    /// Bounded by the tick timeout like any other device call.
    pub async fn setup(&self) -> Result<(), PollError> {
        info!(device_id = %self.device_id, "Authenticating with Powerwall");
        let authenticated =
            time::timeout(self.settings.tick_timeout, self.client.authenticate()).await;
        match authenticated {
            Ok(Ok(true)) => {
                self.set_up.store(true, Ordering::Release);
                Ok(())
            }
            Ok(Ok(false)) => Err(PollError::AuthenticationRejected),
            Ok(Err(e)) => Err(PollError::Authentication(e)),
            Err(_) => Err(PollError::Timeout(self.settings.tick_timeout)),
        }
    }

    /// Setup followed by an immediate tick; either failing fails the whole thing
    pub async fn first_refresh(&self) -> Result<SensorSnapshot, PollError> {
        self.setup().await?;
        self.tick().await
    }

    /// Runs one poll: fetches everything concurrently, aggregates, and publishes the result
    pub async fn tick(&self) -> Result<SensorSnapshot, PollError> {
        if !self.set_up.load(Ordering::Acquire) {
            return Err(PollError::NotSetUp);
        }

        let result = self.poll_device().await;
        match &result {
            Ok(snapshot) => {
                debug!(
                    device_id = %self.device_id,
                    battery_level = snapshot.battery_level,
                    grid_connected = snapshot.grid_connected,
                    "Powerwall updated"
                );
                self.state.send_replace(PollState::Ready(*snapshot));
            }
            Err(e) => {
                warn!(device_id = %self.device_id, "Powerwall update failed: {e}");
                self.state.send_replace(PollState::Failed(e.to_string()));
            }
        }
        result
    }

    async fn poll_device(&self) -> Result<SensorSnapshot, PollError> {
        let client = Arc::clone(&self.client);
        let meters = tokio::spawn(async move { client.fetch_meters().await });
        let client = Arc::clone(&self.client);
        let battery_level = tokio::spawn(async move { client.fetch_battery_level().await });
        let client = Arc::clone(&self.client);
        let grid_connected = tokio::spawn(async move { client.fetch_grid_connected().await });

        let in_flight = [
            meters.abort_handle(),
            battery_level.abort_handle(),
            grid_connected.abort_handle(),
        ];

        let joined = time::timeout(self.settings.tick_timeout, async {
            tokio::join!(meters, battery_level, grid_connected)
        })
        .await;
        let (meters, battery_level, grid_connected) = match joined {
            Ok(results) => results,
            Err(_) => {
                for task in in_flight {
                    task.abort();
                }
                return Err(PollError::Timeout(self.settings.tick_timeout));
            }
        };

        let meters = fetch_result("meters", meters)?;
        let battery_level = fetch_result("battery level", battery_level)?;
        let grid_connected = fetch_result("grid status", grid_connected)?;

        Ok(aggregate(meters, battery_level, grid_connected)?)
    }

    /// The latest snapshot, if the last tick succeeded
    pub fn current(&self) -> Option<SensorSnapshot> {
        self.state.borrow().snapshot().copied()
    }

    pub fn state(&self) -> PollState {
        self.state.borrow().clone()
    }

    /// Receives every state change made by a tick
    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    /// Starts the fixed-interval poll loop. The first scheduled tick happens one
    /// interval from now, since setup is expected to have done the first refresh.
    pub fn spawn(self: Arc<Self>) -> CoordinatorHandle {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
        CoordinatorHandle { shutdown, task }
    }

    async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        info!(
            device_id = %self.device_id,
            interval = ?self.settings.update_interval,
            "Starting Powerwall poll loop"
        );

        let mut interval = time::interval(self.settings.update_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.tick() => {}
            }
        }

        info!(device_id = %self.device_id, "Powerwall poll loop stopped");
    }
}

fn fetch_result<T>(
    field: &'static str,
    joined: Result<anyhow::Result<T>, JoinError>,
) -> Result<T, PollError> {
    joined
        .map_err(|source| PollError::Task { field, source })?
        .map_err(|source| PollError::Fetch { field, source })
}

/// Owns a running poll loop. Dropping it also stops the loop.
pub struct CoordinatorHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Stops polling, cancelling a tick that is still in flight
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Poll loop ended abnormally: {e}");
        }
    }
}
