use log::debug;
use rumqttc::QoS;
use serde_derive::Serialize;

use crate::messages::{AttributeBundle, EntityUpdate};

/// Downstream state store. Abstracted so the dispatcher can be driven
/// against a recording fake in tests.
pub trait StateSink {
    async fn set_state(&mut self, update: EntityUpdate) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct StateDocument<'a> {
    entity_id: &'a str,
    state: f64,
    rssi: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    battery_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<&'a AttributeBundle>,
}

/// Publishes entity state documents over MQTT, one JSON body per update,
/// to `<topic_path>/<entity_id>`.
#[derive(Debug, Clone)]
pub struct MqttStateSink {
    client: rumqttc::AsyncClient,
    topic_path: String,
}

impl MqttStateSink {
    pub fn new(client: rumqttc::AsyncClient, topic_path: String) -> Self {
        MqttStateSink { client, topic_path }
    }
}

impl StateSink for MqttStateSink {
    async fn set_state(&mut self, update: EntityUpdate) -> anyhow::Result<()> {
        let document = StateDocument {
            entity_id: &update.entity_id,
            state: update.value,
            rssi: update.rssi,
            battery_voltage: update.battery_voltage,
            attributes: update.attributes.as_ref(),
        };
        let topic = format!("{}/{}", self.topic_path, update.entity_id);
        debug!("Publishing state for {} to {}", update.entity_id, topic);
        self.client
            .publish(topic, QoS::AtMostOnce, false, serde_json::to_string(&document)?)
            .await?;
        Ok(())
    }
}
