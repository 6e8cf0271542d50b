//! # OCPP Bridge
//!
//! Telemetry-to-OCPP 1.6-J adapter for chargers that cannot speak OCPP.
//!
//! The bridge subscribes to the charger's sensor readings on an MQTT broker
//! and presents the charger to a Central System as an OCPP 1.6 charge point
//! with a single connector.
//!
//! ## Architecture
//!
//! ```text
//! Charger telemetry (MQTT)
//!       │ <base>/<sensor>/state
//!       ▼
//! ┌─────────────────────────────────┐
//! │    ocpp-bridge                  │
//! │  ┌───────────┐  ┌────────────┐  │
//! │  │ Telemetry │─►│ Session    │  │
//! │  │ Bridge    │  │ Engine     │  │
//! │  └───────────┘  └─────┬──────┘  │
//! │                 ┌─────▼──────┐  │
//! │                 │ Call       │  │
//! │                 │ Correlator │  │
//! │                 └─────┬──────┘  │
//! └───────────────────────┼─────────┘
//!                         │ WebSocket JSON-RPC (ocpp1.6)
//!                         ▼
//!               OCPP Central System
//! ```
//!
//! ## Telemetry → OCPP Mapping
//!
//! | Sensor topic | OCPP |
//! |--------------|------|
//! | Voltage, Frequency, Temperature, Power-Factor | MeterValues |
//! | Current, Power | MeterValues (Current.Import, Power.Active.Import) |
//! | Max-Current-Online-Device- | MeterValues (Current.Offered) |
//! | Energy--Session- | MeterValues (Energy.Active.Import.Register) |
//! | Status | StatusNotification |
//!
//! ## Usage
//!
//! ```no_run
//! use ocpp_bridge::{Adapter, AdapterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = AdapterConfig::new("juicepassproxy", "ws://localhost:9000")
//!         .with_mqtt_broker("127.0.0.1", 1883);
//!
//!     Adapter::new(config).run().await
//! }
//! ```

pub mod ocpp;
pub mod telemetry;
pub mod config;
pub mod adapter;

pub use config::{AdapterConfig, MqttConfig};
pub use adapter::{Adapter, AdapterBuilder};

// Re-export key types
pub use ocpp::{
    ChargePointStatus, ConnectionState, Measurement, OcppClient, OcppClientConfig, OcppError,
    CallMode,
};
pub use telemetry::{MeterReportPolicy, MqttBus, TelemetryBridge, TelemetryBus, TelemetryError, TopicMap};
