use serde_derive::{Deserialize, Serialize};

/// Body of one relay message: a batch of tag detections grouped by
/// capture location.
#[derive(Deserialize, Debug, Clone)]
pub struct RelayMessage {
    pub locs: Vec<RelayLocation>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RelayLocation {
    pub tags: Vec<TagDetection>,
}

/// One observed advertisement: sender address, signal strength and the
/// hex-encoded advertisement bytes.
#[derive(Deserialize, Debug, Clone)]
pub struct TagDetection {
    pub id: String,
    pub rssi: i16,
    pub ed: ExtraData,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ExtraData {
    pub ad: String,
}

/// Static descriptive attributes, written once per entity on first contact.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AttributeBundle {
    pub friendly_name: String,
    pub device_class: &'static str,
    pub unit_of_measurement: &'static str,
    pub icon: &'static str,
    pub mac: String,
    pub rssi: i16,
}

/// A single "set value" call against the downstream state store.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    pub entity_id: String,
    pub value: f64,
    pub rssi: i16,
    /// Measured battery voltage, attached to bare battery updates.
    pub battery_voltage: Option<f64>,
    /// Present on the first update for an entity, absent afterwards.
    pub attributes: Option<AttributeBundle>,
}
