use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};

/// One circuit tracked by the Powerwall gateway.
#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    /// Instantaneous power in watts, signed
    pub power: f64,
    /// Cumulative energy in watt-hours
    pub energy_imported: f64,
    /// Cumulative energy in watt-hours
    pub energy_exported: f64,
}

/// All four meters, taken from a single aggregates response
#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetersSnapshot {
    pub battery: MeterReading,
    pub grid: MeterReading,
    pub load: MeterReading,
    pub solar: MeterReading,
}

/// The operations the poll coordinator needs from a device.
///
/// An `Err` means the call itself failed (transport, HTTP status, ...).
/// `Ok(None)` means the device answered but had no usable data for the field.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Returns `Ok(false)` when the device rejects the credentials.
    async fn authenticate(&self) -> anyhow::Result<bool>;

    async fn fetch_meters(&self) -> anyhow::Result<Option<MetersSnapshot>>;

    /// Charge level in percent. A level of exactly zero is reported as `None`.
    async fn fetch_battery_level(&self) -> anyhow::Result<Option<f64>>;

    async fn fetch_grid_connected(&self) -> anyhow::Result<Option<bool>>;
}
