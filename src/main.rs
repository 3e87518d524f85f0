use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use log::{info, warn};

mod config;
mod decode;
mod dispatch;
mod messages;
mod mqtt;
mod normalize;
mod reconcile;
mod registry;
mod sink;

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let options = Options::parse();

    let contents = std::fs::read_to_string(&options.config)
        .with_context(|| format!("reading {}", options.config.display()))?;
    let config: config::AppConfig =
        toml::de::from_str(&contents).context("parsing configuration")?;

    let registry = registry::Registry::build(&config.devices).context("building device registry")?;
    if registry.is_empty() {
        warn!("no devices configured, every detection will be skipped");
    }
    info!("tracking {} devices", registry.len());

    let (mqtt_client, mut eventloop) = mqtt::MqttClient::new(&config.mqtt, config.topics.clone());
    mqtt_client.subscribe().await?;

    let mut dispatcher = dispatch::Dispatcher::new(registry, mqtt_client.state_sink());
    mqtt_client.event_loop(&mut eventloop, &mut dispatcher).await;

    Ok(())
}
