//! OCPP 1.6 message types
//!
//! The subset of the OCPP 1.6-J core profile the bridge speaks:
//! - BootNotification / Heartbeat
//! - StatusNotification
//! - MeterValues

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Enumerations
// ============================================================================

/// Connector status reported in StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    #[serde(rename = "SuspendedEVSE")]
    SuspendedEvse,
    #[serde(rename = "SuspendedEV")]
    SuspendedEv,
    Finishing,
    Reserved,
    #[default]
    Unavailable,
    Faulted,
}

impl ChargePointStatus {
    /// Map a status string published by the charger.
    ///
    /// The table is exact and case-sensitive; anything it does not list
    /// is reported as `Unavailable`.
    pub fn from_observed(observed: &str) -> Self {
        match observed.trim() {
            "Available" => ChargePointStatus::Available,
            "Preparing" => ChargePointStatus::Preparing,
            "Charging" => ChargePointStatus::Charging,
            "Suspended" => ChargePointStatus::SuspendedEv,
            "Finishing" => ChargePointStatus::Finishing,
            "Reserved" => ChargePointStatus::Reserved,
            "Unavailable" => ChargePointStatus::Unavailable,
            "Faulted" => ChargePointStatus::Faulted,
            _ => ChargePointStatus::Unavailable,
        }
    }
}

/// Error code reported in StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointErrorCode {
    ConnectorLockFailure,
    #[serde(rename = "EVCommunicationError")]
    EvCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    NoError,
    OtherError,
    OverCurrentFailure,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    OverVoltage,
    WeakSignal,
}

/// Registration status for BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Measurand types for meter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurand {
    #[serde(rename = "Voltage")]
    Voltage,
    #[serde(rename = "Frequency")]
    Frequency,
    #[serde(rename = "Temperature")]
    Temperature,
    #[serde(rename = "Power.Factor")]
    PowerFactor,
    #[serde(rename = "Current.Import")]
    CurrentImport,
    #[serde(rename = "Power.Active.Import")]
    PowerActiveImport,
    #[serde(rename = "Current.Offered")]
    CurrentOffered,
    #[serde(rename = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
}

/// Unit of a sampled value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitOfMeasure {
    #[serde(rename = "V")]
    Volt,
    /// Frequency has no unit in the 1.6 schema; the errata name it Hertz.
    Hertz,
    Celsius,
    Percent,
    #[serde(rename = "A")]
    Ampere,
    #[serde(rename = "W")]
    Watt,
    #[serde(rename = "Wh")]
    WattHour,
}

// ============================================================================
// Measurement slots
// ============================================================================

/// One telemetry quantity the session accumulates between reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measurement {
    Voltage,
    Frequency,
    Temperature,
    PowerFactor,
    CurrentImport,
    PowerActiveImport,
    CurrentOffered,
    EnergyActiveImportRegister,
}

impl Measurement {
    /// All slots, in the order they appear in a MeterValues report
    pub const ALL: [Measurement; 8] = [
        Measurement::Voltage,
        Measurement::Frequency,
        Measurement::Temperature,
        Measurement::PowerFactor,
        Measurement::CurrentImport,
        Measurement::PowerActiveImport,
        Measurement::CurrentOffered,
        Measurement::EnergyActiveImportRegister,
    ];

    pub fn measurand(self) -> Measurand {
        match self {
            Measurement::Voltage => Measurand::Voltage,
            Measurement::Frequency => Measurand::Frequency,
            Measurement::Temperature => Measurand::Temperature,
            Measurement::PowerFactor => Measurand::PowerFactor,
            Measurement::CurrentImport => Measurand::CurrentImport,
            Measurement::PowerActiveImport => Measurand::PowerActiveImport,
            Measurement::CurrentOffered => Measurand::CurrentOffered,
            Measurement::EnergyActiveImportRegister => Measurand::EnergyActiveImportRegister,
        }
    }

    pub fn unit(self) -> UnitOfMeasure {
        match self {
            Measurement::Voltage => UnitOfMeasure::Volt,
            Measurement::Frequency => UnitOfMeasure::Hertz,
            Measurement::Temperature => UnitOfMeasure::Celsius,
            Measurement::PowerFactor => UnitOfMeasure::Percent,
            Measurement::CurrentImport | Measurement::CurrentOffered => UnitOfMeasure::Ampere,
            Measurement::PowerActiveImport => UnitOfMeasure::Watt,
            Measurement::EnergyActiveImportRegister => UnitOfMeasure::WattHour,
        }
    }

    /// Factor applied to the raw reading before it is reported.
    /// The charger publishes power factor as a ratio, OCPP wants percent.
    pub fn scale(self) -> f64 {
        match self {
            Measurement::PowerFactor => 100.0,
            _ => 1.0,
        }
    }

    /// Render a raw reading as an OCPP sampled value
    pub fn sample(self, raw: f64) -> SampledValue {
        SampledValue {
            value: (raw * self.scale()).to_string(),
            measurand: Some(self.measurand()),
            unit: Some(self.unit()),
        }
    }
}

// ============================================================================
// Data structures
// ============================================================================

/// Sampled value in a meter reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<Measurand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitOfMeasure>,
}

/// Meter value with timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

// ============================================================================
// Request/Response messages
// ============================================================================

/// BootNotification request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// BootNotification response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub status: RegistrationStatus,
    /// Kept as sent; Central Systems disagree on the offset suffix
    #[serde(default)]
    pub current_time: Option<String>,
    #[serde(default)]
    pub interval: i32,
}

/// Heartbeat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

/// Heartbeat response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub current_time: Option<String>,
}

/// StatusNotification request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub connector_id: u32,
    pub error_code: ChargePointErrorCode,
    pub status: ChargePointStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// MeterValues request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub connector_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    pub meter_value: Vec<MeterValue>,
}
