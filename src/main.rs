use powerwall_bridge::home_assistant::HomeAssistantAPI;
use powerwall_bridge::{Config, EntityPublisher, PollCoordinator, PowerwallApi};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Powerwall bridge");
    let config = Config::from_env()?;

    let api = PowerwallApi::with_identity(
        &config.host,
        &config.password,
        &config.email,
        &config.timezone,
    )?;
    info!(endpoint = %api.endpoint_url(), device_id = %config.device_id, "Connecting to Powerwall");

    let coordinator = Arc::new(PollCoordinator::new(
        Arc::new(api),
        &config.device_id,
        config.poll,
    ));

    // Subscribe first so the initial snapshot is published too
    let publisher = EntityPublisher::new(
        coordinator.device_id(),
        HomeAssistantAPI::new(&config.ha_url, &config.ha_token)?,
        coordinator.subscribe(),
    );
    let publisher_task = publisher.spawn();

    // Only a failed login is fatal; a bad first poll leaves the loop to retry
    coordinator.setup().await?;
    if let Err(e) = coordinator.tick().await {
        warn!("First Powerwall refresh failed, retrying on the next interval: {e}");
    }
    let poll_loop = coordinator.clone().spawn();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    poll_loop.shutdown().await;
    drop(coordinator);
    publisher_task.await?;

    Ok(())
}
