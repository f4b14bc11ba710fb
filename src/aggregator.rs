use crate::device_client::{MeterReading, MetersSnapshot};
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Everything published for one poll of the device. Only ever built complete.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub battery: MeterReading,
    pub grid: MeterReading,
    pub load: MeterReading,
    pub solar: MeterReading,
    /// Percent, 0-100
    pub battery_level: f64,
    pub grid_connected: bool,
}

/// The fields that were absent from a poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissingData {
    pub meters: bool,
    pub battery_level: bool,
    pub grid_connected: bool,
}

impl fmt::Display for MissingData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.meters, "meters"),
            (self.battery_level, "battery level"),
            (self.grid_connected, "grid status"),
        ]
        .into_iter()
        .filter_map(|(missing, name)| missing.then_some(name))
        .collect();
        write!(f, "{}", names.join(", "))
    }
}

/// Combines the three fetch results into a snapshot.
/// Any absent input fails the whole aggregation; nothing is converted or defaulted.
pub fn aggregate(
    meters: Option<MetersSnapshot>,
    battery_level: Option<f64>,
    grid_connected: Option<bool>,
) -> Result<SensorSnapshot, MissingData> {
    match (meters, battery_level, grid_connected) {
        (Some(meters), Some(battery_level), Some(grid_connected)) => Ok(SensorSnapshot {
            battery: meters.battery,
            grid: meters.grid,
            load: meters.load,
            solar: meters.solar,
            battery_level,
            grid_connected,
        }),
        (meters, battery_level, grid_connected) => Err(MissingData {
            meters: meters.is_none(),
            battery_level: battery_level.is_none(),
            grid_connected: grid_connected.is_none(),
        }),
    }
}
