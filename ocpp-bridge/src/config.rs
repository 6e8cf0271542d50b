//! Configuration for the telemetry-to-OCPP adapter
//!
//! Combines settings for the OCPP client, the MQTT broker and the topic map.

use std::time::Duration;

use crate::ocpp::client::OcppClientConfig;
use crate::ocpp::correlator::CallMode;
use crate::telemetry::{MeterReportPolicy, TopicMap};

/// Complete adapter configuration
#[derive(Debug, Clone, Default)]
pub struct AdapterConfig {
    // OCPP settings
    pub ocpp: OcppClientConfig,

    // MQTT settings
    pub mqtt: MqttConfig,

    // Topic routing
    pub topics: TopicMap,
}

/// MQTT broker connection settings
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host name or address
    pub host: String,

    /// Broker port
    pub port: u16,

    /// Username (credentials are sent only when set)
    pub username: String,

    /// Password
    pub password: String,

    /// Client identifier presented to the broker
    pub client_id: String,

    /// Keep-alive interval
    pub keep_alive: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: format!("ocpp-bridge-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            keep_alive: Duration::from_secs(60),
        }
    }
}

impl AdapterConfig {
    /// Create config with basic parameters
    pub fn new(charge_point_id: impl Into<String>, csms_url: impl Into<String>) -> Self {
        Self {
            ocpp: OcppClientConfig {
                csms_url: csms_url.into(),
                charge_point_id: charge_point_id.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Set vendor info
    pub fn with_vendor(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.ocpp.vendor = vendor.into();
        self.ocpp.model = model.into();
        self
    }

    /// Set serial number
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.ocpp.serial_number = Some(serial.into());
        self
    }

    /// Set firmware version
    pub fn with_firmware(mut self, version: impl Into<String>) -> Self {
        self.ocpp.firmware_version = Some(version.into());
        self
    }

    /// Set MQTT broker address
    pub fn with_mqtt_broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.mqtt.host = host.into();
        self.mqtt.port = port;
        self
    }

    /// Set MQTT credentials
    pub fn with_mqtt_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.mqtt.username = username.into();
        self.mqtt.password = password.into();
        self
    }

    /// Replace the topic map
    pub fn with_topics(mut self, topics: TopicMap) -> Self {
        self.topics = topics;
        self
    }

    /// Set the per-call response timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.ocpp.request_timeout = timeout;
        self
    }

    /// Set the delay before reconnecting after a transport failure
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.ocpp.reconnect_delay = delay;
        self
    }

    /// Set the delay before reconnecting after BootNotification was not accepted
    pub fn with_boot_retry_delay(mut self, delay: Duration) -> Self {
        self.ocpp.boot_retry_delay = delay;
        self
    }

    pub fn with_call_mode(mut self, mode: CallMode) -> Self {
        self.ocpp.call_mode = mode;
        self
    }

    pub fn with_meter_policy(mut self, policy: MeterReportPolicy) -> Self {
        self.ocpp.meter_policy = policy;
        self
    }

    /// Disable Heartbeat calls
    pub fn without_heartbeat(mut self) -> Self {
        self.ocpp.heartbeat = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = AdapterConfig::new("CP001", "ws://localhost:9000")
            .with_vendor("JuiceBox", "JuicePass-OCPP")
            .with_serial("SN001")
            .with_mqtt_broker("broker.local", 8883)
            .with_mqtt_credentials("evse", "secret")
            .with_boot_retry_delay(Duration::ZERO)
            .with_meter_policy(MeterReportPolicy::Coalesce)
            .without_heartbeat();

        assert_eq!(config.ocpp.charge_point_id, "CP001");
        assert_eq!(config.ocpp.csms_url, "ws://localhost:9000");
        assert_eq!(config.ocpp.vendor, "JuiceBox");
        assert_eq!(config.ocpp.serial_number.as_deref(), Some("SN001"));
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.username, "evse");
        assert_eq!(config.ocpp.boot_retry_delay, Duration::ZERO);
        assert_eq!(config.ocpp.meter_policy, MeterReportPolicy::Coalesce);
        assert!(!config.ocpp.heartbeat);
    }

    #[test]
    fn test_defaults() {
        let config = AdapterConfig::default();

        assert_eq!(config.ocpp.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.ocpp.request_timeout, Duration::from_secs(30));
        assert_eq!(config.ocpp.ping_interval, Duration::from_secs(30));
        assert_eq!(config.ocpp.ping_timeout, Duration::from_secs(10));
        assert_eq!(config.ocpp.call_mode, CallMode::Serialized);
        assert_eq!(config.mqtt.port, 1883);
        assert!(config.mqtt.client_id.starts_with("ocpp-bridge-"));
        assert_eq!(config.topics.len(), 9);
    }
}
