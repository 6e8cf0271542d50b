//! MQTT telemetry bus
//!
//! Subscribes to the charger's sensor topics on an MQTT broker and feeds
//! every publish into the [`TelemetryBridge`].

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use tracing::{debug, error, info, warn};

use super::bridge::TelemetryBridge;
use super::{TelemetryBus, TelemetryError};
use crate::config::MqttConfig;

/// Pause before polling again after a broker error
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// MQTT implementation of [`TelemetryBus`]
pub struct MqttBus {
    broker: String,
    client: AsyncClient,
    event_loop: EventLoop,
    filters: Vec<SubscribeFilter>,
}

impl MqttBus {
    /// Prepare a client for the configured broker. Connecting happens in `run`.
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        let (client, event_loop) = AsyncClient::new(options, 16);

        Self {
            broker: format!("{}:{}", config.host, config.port),
            client,
            event_loop,
            filters: Vec::new(),
        }
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }
}

impl TelemetryBus for MqttBus {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), TelemetryError> {
        self.filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce))
            .collect();
        Ok(())
    }

    async fn run(mut self, bridge: TelemetryBridge) -> Result<(), TelemetryError> {
        info!("Connecting to MQTT broker {}", self.broker);
        let mut connected_once = false;

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!("Connected to MQTT broker with result code: {:?}", ack.code);
                    connected_once = true;
                    // Subscriptions do not survive a clean-session reconnect
                    self.client.subscribe_many(self.filters.clone()).await?;
                    info!("Subscribed to {} telemetry topics", self.filters.len());
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    // Errors are logged by the bridge; the next reading is independent
                    let _ = bridge.on_message(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) if !connected_once => {
                    error!("MQTT connection failed: {}", e);
                    return Err(TelemetryError::Connect(e.to_string()));
                }
                Err(e) => {
                    warn!("MQTT connection error: {}, retrying in {:?}", e, RETRY_DELAY);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}
