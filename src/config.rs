use mac_address::MacAddress;
use serde_derive::Deserialize;

use crate::decode::DecoderVariant;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    /// Relay topics to subscribe to. Each carries batched tag detections.
    pub topics: Vec<String>,
    pub devices: Vec<DeviceConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DeviceConfig {
    pub address: MacAddress,
    pub name: String,
    #[serde(default)]
    pub variant: DecoderVariant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            topics = ["relay/+/adv"]

            [mqtt]
            host = "localhost"
            port = 1883
            username = "user"
            password = "pass"

            [[devices]]
            address = "A4:C1:38:DE:90:CE"
            name = "Fridge"

            [[devices]]
            address = "A4:C1:38:00:11:22"
            name = "Sauna"
            variant = "xiaomi"
        "#;
        let config: AppConfig = toml::de::from_str(config_str).unwrap();
        assert!(config.mqtt.host == "localhost");
        assert_eq!(config.topics, vec!["relay/+/adv".to_string()]);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].name, "Fridge");
        // variant defaults to xiaomi when omitted
        assert_eq!(config.devices[0].variant, DecoderVariant::Xiaomi);
        assert_eq!(
            config.devices[1].address.bytes(),
            [0xA4, 0xC1, 0x38, 0x00, 0x11, 0x22]
        );
    }
}
