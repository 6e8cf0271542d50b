//! Telemetry side of the bridge
//!
//! - `topics`: which bus topic feeds which measurement slot
//! - `bridge`: delivery callback and the per-event processing on the protocol engine
//! - `mqtt`: MQTT implementation of the telemetry bus

pub mod topics;
pub mod bridge;
pub mod mqtt;

use std::future::Future;

use thiserror::Error;

pub use topics::{Route, TopicMap, DEFAULT_TOPIC_BASE};
pub use bridge::{MeterReportPolicy, TelemetryBridge, TelemetryEvent};
pub use mqtt::MqttBus;

/// Errors on the telemetry side
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Payload on {topic} is not valid UTF-8")]
    InvalidUtf8 { topic: String },

    #[error("Invalid value received on topic {topic}: {payload:?}")]
    InvalidNumber { topic: String, payload: String },

    #[error("No route for topic {0}")]
    UnknownTopic(String),

    #[error("Protocol engine is gone")]
    EngineClosed,

    #[error("Telemetry bus connection failed: {0}")]
    Connect(String),

    #[error("Telemetry bus client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// A publish/subscribe source of telemetry readings
pub trait TelemetryBus: Send + 'static {
    /// Register the topics to receive
    fn subscribe(&mut self, topics: &[String]) -> Result<(), TelemetryError>;

    /// Deliver every message to `bridge` until the bus fails for good
    fn run(self, bridge: TelemetryBridge) -> impl Future<Output = Result<(), TelemetryError>> + Send + 'static;
}
