use std::collections::HashMap;

use log::info;
use mac_address::MacAddress;

use crate::messages::{AttributeBundle, EntityUpdate};
use crate::normalize::NormalizedReading;
use crate::registry::DeviceRecord;

/// Whether a device's static entity attributes have been written yet.
/// Transitions `Uninitialized -> Initialized` exactly once, on the first
/// reading, and is never reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityState {
    Uninitialized,
    Initialized,
}

/// Decides, per reading, whether to emit fully-attributed updates (first
/// contact) or bare value updates, and drops sentinel-valued quantities.
///
/// The downstream store treats "set value with attributes" as a heavier
/// operation than "set value"; the attributes are static, so they are
/// written once per entity.
#[derive(Debug, Default)]
pub struct Reconciler {
    states: HashMap<MacAddress, EntityState>,
}

impl Reconciler {
    pub fn new() -> Self {
        Reconciler::default()
    }

    pub fn reconcile(
        &mut self,
        device: &DeviceRecord,
        reading: &NormalizedReading,
        rssi: i16,
    ) -> Vec<EntityUpdate> {
        let state = self
            .states
            .entry(device.address)
            .or_insert(EntityState::Uninitialized);
        let first_contact = *state == EntityState::Uninitialized;
        if first_contact {
            // The transition fires on the first reading no matter which
            // quantities it carries.
            info!(
                "Create entity attributes for {}/{}",
                device.address_string(),
                device.name
            );
            *state = EntityState::Initialized;
        }

        let mut updates = Vec::new();

        if reading.has_temperature() {
            updates.push(EntityUpdate {
                entity_id: device.temperature_entity.clone(),
                value: reading.temperature,
                rssi,
                battery_voltage: None,
                attributes: first_contact.then(|| AttributeBundle {
                    friendly_name: format!("{} Temperature", device.name),
                    device_class: "temperature",
                    unit_of_measurement: "°C",
                    icon: "mdi:thermometer",
                    mac: device.address_string(),
                    rssi,
                }),
            });
        }

        if reading.has_humidity() {
            updates.push(EntityUpdate {
                entity_id: device.humidity_entity.clone(),
                value: reading.humidity,
                rssi,
                battery_voltage: None,
                attributes: first_contact.then(|| AttributeBundle {
                    friendly_name: format!("{} Humidity", device.name),
                    device_class: "humidity",
                    unit_of_measurement: "%",
                    icon: "mdi:water-percent",
                    mac: device.address_string(),
                    rssi,
                }),
            });
        }

        if reading.has_battery() {
            updates.push(EntityUpdate {
                entity_id: device.battery_entity.clone(),
                value: reading.battery_percent,
                rssi,
                // The attributed first write replaces the whole bundle, so
                // voltage rides along on bare updates only.
                battery_voltage: (!first_contact).then_some(reading.battery_voltage),
                attributes: first_contact.then(|| AttributeBundle {
                    friendly_name: format!("{} Battery", device.name),
                    device_class: "battery",
                    unit_of_measurement: "%",
                    icon: "mdi:battery-bluetooth-variant",
                    mac: device.address_string(),
                    rssi,
                }),
            });
        }

        updates
    }
}
