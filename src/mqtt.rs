use std::time::Duration;

use log::{debug, error};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};

use crate::config;
use crate::dispatch::Dispatcher;
use crate::sink::{MqttStateSink, StateSink};

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    topic_path: String,
    topics: Vec<String>,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig, topics: Vec<String>) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .as_ref()
            .unwrap_or(&"tagbridge".to_string())
            .to_string();

        let mut mqttoptions = MqttOptions::new(
            publisher_id,
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                topic_path: config.topic_path.clone().unwrap_or("tagbridge".to_string()),
                topics,
            },
            eventloop,
        )
    }

    /// Sink publishing entity states over this client's connection.
    pub fn state_sink(&self) -> MqttStateSink {
        MqttStateSink::new(self.client.clone(), self.topic_path.clone())
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe_many(
                self.topics
                    .iter()
                    .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce)),
            )
            .await?;

        Ok(())
    }

    pub async fn event_loop<S: StateSink>(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        dispatcher: &mut Dispatcher<S>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received relay message on topic {}", p.topic);
                        dispatcher.handle_message(&p.payload).await;
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                }
            }
        }
    }
}
