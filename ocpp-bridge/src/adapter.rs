//! Main telemetry-to-OCPP adapter
//!
//! The adapter wires a telemetry bus to the OCPP client.
//!
//! ## Message Flow
//!
//! 1. The bus delivers a reading on a subscribed topic
//! 2. The telemetry bridge parses it and queues it for the protocol engine
//! 3. The engine updates the charge point session
//! 4. The session reports MeterValues or StatusNotification to the Central System

use std::error::Error;
use std::future::Future;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::AdapterConfig;
use crate::ocpp::OcppClient;
use crate::telemetry::{MqttBus, TelemetryBridge, TelemetryBus, TopicMap};

pub type AdapterError = Box<dyn Error + Send + Sync>;

/// The main telemetry-to-OCPP adapter
pub struct Adapter {
    config: AdapterConfig,
}

impl Adapter {
    /// Create a new adapter with the given configuration
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Run against the configured MQTT broker until Ctrl-C
    pub async fn run(self) -> Result<(), AdapterError> {
        let bus = MqttBus::new(&self.config.mqtt);

        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Ctrl-C received");
        };

        self.run_until(bus, ctrl_c).await
    }

    /// Run with any telemetry bus until `shutdown` completes.
    ///
    /// Returns an error if the bus fails for good or the Central System URL
    /// is invalid.
    pub async fn run_until<B, F>(self, mut bus: B, shutdown: F) -> Result<(), AdapterError>
    where
        B: TelemetryBus,
        F: Future<Output = ()>,
    {
        info!(
            "Starting OCPP bridge: charge_point={}, csms={}",
            self.config.ocpp.charge_point_id, self.config.ocpp.csms_url
        );

        let (bridge, telemetry_rx) = TelemetryBridge::new(self.config.topics.clone());
        bus.subscribe(&bridge.topics().topics())?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = OcppClient::new(self.config.ocpp.clone(), telemetry_rx, shutdown_rx);

        let mut bus_task = tokio::spawn(bus.run(bridge));
        let client_task = client.run();
        tokio::pin!(client_task, shutdown);

        let result: Result<(), AdapterError> = tokio::select! {
            result = &mut client_task => result.map_err(Into::into),

            _ = &mut shutdown => {
                info!("Shutting down");
                let _ = shutdown_tx.send(true);
                client_task.as_mut().await.map_err(Into::into)
            }

            joined = &mut bus_task => {
                let _ = shutdown_tx.send(true);
                if let Err(e) = client_task.as_mut().await {
                    warn!("OCPP client stopped with error: {}", e);
                }
                match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => {
                        error!("Telemetry bus failed: {}", e);
                        Err(e.into())
                    }
                    Err(e) => Err(e.into()),
                }
            }
        };

        bus_task.abort();
        info!("OCPP bridge stopped");
        result
    }
}

/// Builder for the adapter
pub struct AdapterBuilder {
    config: AdapterConfig,
}

impl AdapterBuilder {
    /// Create a new adapter builder
    pub fn new() -> Self {
        Self {
            config: AdapterConfig::default(),
        }
    }

    /// Set Central System URL
    pub fn csms_url(mut self, url: impl Into<String>) -> Self {
        self.config.ocpp.csms_url = url.into();
        self
    }

    /// Set charge point ID
    pub fn charge_point_id(mut self, id: impl Into<String>) -> Self {
        self.config.ocpp.charge_point_id = id.into();
        self
    }

    /// Set vendor info
    pub fn vendor(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.config = self.config.with_vendor(vendor, model);
        self
    }

    /// Set MQTT broker
    pub fn mqtt_broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config = self.config.with_mqtt_broker(host, port);
        self
    }

    pub fn mqtt_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config = self.config.with_mqtt_credentials(username, password);
        self
    }

    /// Subscribe below a different topic base
    pub fn topic_base(mut self, base: &str) -> Self {
        self.config.topics = TopicMap::with_base(base);
        self
    }

    /// Build the adapter
    pub fn build(self) -> Adapter {
        Adapter::new(self.config)
    }
}

impl Default for AdapterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
