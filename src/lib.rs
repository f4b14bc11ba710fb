//! Powerwall Bridge Library
//!
//! This library polls the local web API of a Tesla Powerwall 3 on a fixed interval
//! and republishes the readings as Home Assistant sensor and binary sensor entities.

pub mod aggregator;
pub mod config;
pub mod device_client;
pub mod entity;
pub mod entity_publisher;
pub mod error;
pub mod home_assistant;
pub mod poll_coordinator;
pub mod powerwall;

// Re-export commonly used types for easier access
pub use aggregator::SensorSnapshot;
pub use config::Config;
pub use device_client::{DeviceClient, MeterReading, MetersSnapshot};
pub use entity_publisher::EntityPublisher;
pub use error::PollError;
pub use poll_coordinator::{CoordinatorHandle, PollCoordinator, PollSettings, PollState};
pub use powerwall::PowerwallApi;
