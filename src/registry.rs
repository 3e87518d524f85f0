use std::collections::HashMap;

use log::debug;
use mac_address::MacAddress;
use thiserror::Error;

use crate::config::DeviceConfig;
use crate::decode::DecoderVariant;

/// Registry construction failures. Fatal: a registry that cannot be built
/// consistently must abort startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("device address {0} is configured more than once")]
    DuplicateAddress(MacAddress),
}

/// One configured sensor tag and its derived entity identifiers.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub address: MacAddress,
    pub name: String,
    pub variant: DecoderVariant,
    pub temperature_entity: String,
    pub humidity_entity: String,
    pub battery_entity: String,
}

impl DeviceRecord {
    fn from_config(config: &DeviceConfig) -> Self {
        let ent_name = sanitize_name(&config.name);
        DeviceRecord {
            address: config.address,
            name: config.name.clone(),
            variant: config.variant,
            temperature_entity: format!("sensor.ble_{ent_name}_temperature"),
            humidity_entity: format!("sensor.ble_{ent_name}_humidity"),
            battery_entity: format!("sensor.ble_{ent_name}_battery"),
        }
    }

    /// Address as it appears in entity attributes: lowercase, colon-delimited.
    pub fn address_string(&self) -> String {
        self.address.to_string().to_lowercase()
    }
}

/// Immutable map from hardware address to device record, built once at
/// startup.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    devices: HashMap<MacAddress, DeviceRecord>,
}

impl Registry {
    pub fn build(configs: &[DeviceConfig]) -> Result<Self, ConfigError> {
        let mut devices = HashMap::with_capacity(configs.len());
        for config in configs {
            let record = DeviceRecord::from_config(config);
            debug!("config - {} / {}", record.address_string(), record.name);
            if devices.insert(config.address, record).is_some() {
                return Err(ConfigError::DuplicateAddress(config.address));
            }
        }
        Ok(Registry { devices })
    }

    pub fn lookup(&self, address: &MacAddress) -> Option<&DeviceRecord> {
        self.devices.get(address)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Parse a hardware address as the relay formats it. Case-insensitive;
/// `:` and `-` separators are accepted and stripped.
pub fn parse_address(s: &str) -> Option<MacAddress> {
    let hex: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
    if hex.len() != 12 || !hex.is_ascii() {
        return None;
    }
    let mut bytes = [0u8; 6];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16).ok()?;
    }
    Some(MacAddress::new(bytes))
}

// Remove any non-alphanumeric characters and replace spaces with underscores
fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}
