//! Declarative description of the sensors exposed for a Powerwall, and their
//! rendering into Home Assistant style entity states.

use crate::aggregator::SensorSnapshot;
use serde_derive::Serialize;

pub const DOMAIN: &str = "powerwall";
pub const DEVICE_NAME: &str = "Powerwall";
pub const STATE_UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Power,
    Energy,
    Battery,
    Connectivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Watt,
    WattHour,
    Percentage,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Watt => "W",
            Unit::WattHour => "Wh",
            Unit::Percentage => "%",
        }
    }
}

pub struct SensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub native_unit: Unit,
    pub device_class: DeviceClass,
    pub state_class: StateClass,
    pub suggested_display_precision: Option<usize>,
    pub value_fn: fn(&SensorSnapshot) -> f64,
}

pub struct BinarySensorDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub device_class: DeviceClass,
    pub is_on: fn(&SensorSnapshot) -> bool,
}

const fn power(
    key: &'static str,
    name: &'static str,
    value_fn: fn(&SensorSnapshot) -> f64,
) -> SensorDescription {
    SensorDescription {
        key,
        name,
        native_unit: Unit::Watt,
        device_class: DeviceClass::Power,
        state_class: StateClass::Measurement,
        suggested_display_precision: None,
        value_fn,
    }
}

const fn energy(
    key: &'static str,
    name: &'static str,
    value_fn: fn(&SensorSnapshot) -> f64,
) -> SensorDescription {
    SensorDescription {
        key,
        name,
        native_unit: Unit::WattHour,
        device_class: DeviceClass::Energy,
        state_class: StateClass::TotalIncreasing,
        suggested_display_precision: None,
        value_fn,
    }
}

pub static SENSORS: [SensorDescription; 11] = [
    power("battery_power", "Battery Power", |data| data.battery.power),
    energy("battery_discharged", "Battery Discharged", |data| {
        data.battery.energy_exported
    }),
    energy("battery_charged", "Battery Charged", |data| {
        data.battery.energy_imported
    }),
    power("grid_power", "Grid Power", |data| data.grid.power),
    energy("grid_exported", "Grid Exported", |data| data.grid.energy_exported),
    energy("grid_imported", "Grid Imported", |data| data.grid.energy_imported),
    power("home_power", "Home Power", |data| data.load.power),
    energy("home_usage", "Home Usage", |data| data.load.energy_imported),
    power("solar_power", "Solar Power", |data| data.solar.power),
    energy("solar_generated", "Solar Generated", |data| {
        data.solar.energy_exported
    }),
    SensorDescription {
        key: "battery_level",
        name: "Battery Level",
        native_unit: Unit::Percentage,
        device_class: DeviceClass::Battery,
        state_class: StateClass::Measurement,
        suggested_display_precision: Some(2),
        value_fn: |data| data.battery_level,
    },
];

pub static BINARY_SENSORS: [BinarySensorDescription; 1] = [BinarySensorDescription {
    key: "grid_connected",
    name: "Grid Connected",
    device_class: DeviceClass::Connectivity,
    is_on: |data| data.grid_connected,
}];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityAttributes {
    pub friendly_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    pub device_class: DeviceClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<StateClass>,
    pub unique_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    #[serde(skip)]
    pub entity_id: String,
    pub state: String,
    pub attributes: EntityAttributes,
}

pub fn unique_id(device_id: &str, key: &str) -> String {
    format!("{device_id}_{key}")
}

fn entity_id(platform: &str, device_id: &str, key: &str) -> String {
    format!("{platform}.{}_{key}", slugify(device_id))
}

fn friendly_name(name: &str) -> String {
    format!("{DEVICE_NAME} {name}")
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        DOMAIN.to_string()
    } else {
        slug.to_string()
    }
}

fn format_value(value: f64, precision: Option<usize>) -> String {
    match precision {
        Some(precision) => format!("{value:.precision$}"),
        None => value.to_string(),
    }
}

impl SensorDescription {
    pub fn render(&self, device_id: &str, snapshot: Option<&SensorSnapshot>) -> EntityState {
        EntityState {
            entity_id: entity_id("sensor", device_id, self.key),
            state: match snapshot {
                Some(data) => {
                    format_value((self.value_fn)(data), self.suggested_display_precision)
                }
                None => STATE_UNAVAILABLE.to_string(),
            },
            attributes: EntityAttributes {
                friendly_name: friendly_name(self.name),
                unit_of_measurement: Some(self.native_unit.symbol()),
                device_class: self.device_class,
                state_class: Some(self.state_class),
                unique_id: unique_id(device_id, self.key),
            },
        }
    }
}

impl BinarySensorDescription {
    pub fn render(&self, device_id: &str, snapshot: Option<&SensorSnapshot>) -> EntityState {
        let state = match snapshot.map(self.is_on) {
            Some(true) => "on",
            Some(false) => "off",
            None => STATE_UNAVAILABLE,
        };
        EntityState {
            entity_id: entity_id("binary_sensor", device_id, self.key),
            state: state.to_string(),
            attributes: EntityAttributes {
                friendly_name: friendly_name(self.name),
                unit_of_measurement: None,
                device_class: self.device_class,
                state_class: None,
                unique_id: unique_id(device_id, self.key),
            },
        }
    }
}

/// Renders every sensor and binary sensor; all are unavailable without a snapshot
pub fn entity_states(device_id: &str, snapshot: Option<&SensorSnapshot>) -> Vec<EntityState> {
    SENSORS
        .iter()
        .map(|sensor| sensor.render(device_id, snapshot))
        .chain(
            BINARY_SENSORS
                .iter()
                .map(|sensor| sensor.render(device_id, snapshot)),
        )
        .collect()
}
