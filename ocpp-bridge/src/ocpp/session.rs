//! Charge point session
//!
//! Protocol-level state for the one connector the bridge models:
//! - latest reading of every measurement slot
//! - current connector status
//! - whether the Central System accepted our BootNotification
//!
//! A session lives exactly as long as one WebSocket connection. Nothing in it
//! is carried over a reconnect, so readings have to accumulate again before
//! the next meaningful MeterValues report.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::correlator::CallCorrelator;
use super::messages::*;
use super::types::*;

/// The only connector this charge point exposes
pub const CONNECTOR_ID: u32 = 1;

/// Station identity sent in BootNotification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationInfo {
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

impl StationInfo {
    fn boot_request(&self) -> BootNotificationRequest {
        BootNotificationRequest {
            charge_point_vendor: self.vendor.clone(),
            charge_point_model: self.model.clone(),
            charge_point_serial_number: self.serial_number.clone(),
            firmware_version: self.firmware_version.clone(),
        }
    }
}

/// Latest known value per measurement, absent until first reported
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementSlots {
    values: [Option<f64>; Measurement::ALL.len()],
}

impl MeasurementSlots {
    pub fn set(&mut self, slot: Measurement, value: f64) {
        self.values[slot as usize] = Some(value);
    }

    pub fn get(&self, slot: Measurement) -> Option<f64> {
        self.values[slot as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Sampled values for every slot holding a reading
    pub fn sampled_values(&self) -> Vec<SampledValue> {
        Measurement::ALL
            .iter()
            .filter_map(|slot| self.get(*slot).map(|raw| slot.sample(raw)))
            .collect()
    }
}

/// Session state for one connection to the Central System
#[derive(Debug)]
pub struct ChargePointSession {
    station: StationInfo,
    slots: MeasurementSlots,
    status: ChargePointStatus,
    boot_accepted: bool,
    heartbeat_interval: Option<u32>,
}

impl ChargePointSession {
    pub fn new(station: StationInfo) -> Self {
        Self {
            station,
            slots: MeasurementSlots::default(),
            status: ChargePointStatus::default(),
            boot_accepted: false,
            heartbeat_interval: None,
        }
    }

    pub fn slots(&self) -> &MeasurementSlots {
        &self.slots
    }

    pub fn status(&self) -> ChargePointStatus {
        self.status
    }

    pub fn is_accepted(&self) -> bool {
        self.boot_accepted
    }

    /// Heartbeat interval granted by the Central System, if any
    pub fn heartbeat_interval(&self) -> Option<u32> {
        self.heartbeat_interval
    }

    /// Store the latest reading for a slot
    pub fn record(&mut self, slot: Measurement, value: f64) {
        debug!("{:?} = {}", slot, value);
        self.slots.set(slot, value);
    }

    /// Build the MeterValues request for the current slots.
    ///
    /// Returns `None` when no slot holds a reading yet.
    pub fn meter_values_request(&self, timestamp: DateTime<Utc>) -> Option<MeterValuesRequest> {
        if self.slots.is_empty() {
            return None;
        }

        Some(MeterValuesRequest {
            connector_id: CONNECTOR_ID,
            transaction_id: None,
            meter_value: vec![MeterValue {
                timestamp,
                sampled_value: self.slots.sampled_values(),
            }],
        })
    }

    /// Map an observed status and build the StatusNotification for it
    pub fn status_notification_request(
        &mut self,
        observed: &str,
        timestamp: DateTime<Utc>,
    ) -> StatusNotificationRequest {
        self.status = ChargePointStatus::from_observed(observed);

        StatusNotificationRequest {
            connector_id: CONNECTOR_ID,
            error_code: ChargePointErrorCode::NoError,
            status: self.status,
            timestamp: Some(timestamp),
        }
    }

    /// Send BootNotification and record whether we were accepted
    pub async fn boot_notification(
        &mut self,
        correlator: &CallCorrelator,
    ) -> Result<BootNotificationResponse, OcppError> {
        let payload = serde_json::to_value(self.station.boot_request())?;
        let result = correlator.send(Action::BootNotification, payload).await?;
        let response: BootNotificationResponse = serde_json::from_value(result)?;

        self.boot_accepted = response.status == RegistrationStatus::Accepted;
        if self.boot_accepted {
            self.heartbeat_interval = u32::try_from(response.interval).ok().filter(|i| *i > 0);
            info!(
                "BootNotification accepted, heartbeat interval: {}s",
                response.interval
            );
        }

        Ok(response)
    }

    /// Send a MeterValues snapshot of every slot holding a reading.
    ///
    /// Does nothing while all slots are empty. Only transport failures are
    /// returned; anything else is logged.
    pub async fn report_meter_values(&self, correlator: &CallCorrelator) -> Result<(), OcppError> {
        let Some(request) = self.meter_values_request(Utc::now()) else {
            debug!("No readings yet, skipping MeterValues");
            return Ok(());
        };

        let payload = serde_json::to_value(&request)?;
        let count = request.meter_value[0].sampled_value.len();

        match correlator.send(Action::MeterValues, payload).await {
            Ok(_) => {
                debug!("MeterValues sent with {} sampled values", count);
                Ok(())
            }
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                error!("Failed to send MeterValues: {}", e);
                Ok(())
            }
        }
    }

    /// Send a StatusNotification for an observed charger status.
    ///
    /// Same error policy as [`Self::report_meter_values`].
    pub async fn report_status(
        &mut self,
        observed: &str,
        correlator: &CallCorrelator,
    ) -> Result<(), OcppError> {
        let request = self.status_notification_request(observed, Utc::now());
        let payload = serde_json::to_value(&request)?;

        match correlator.send(Action::StatusNotification, payload).await {
            Ok(_) => {
                debug!("StatusNotification sent: {:?} (observed {:?})", request.status, observed);
                Ok(())
            }
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                error!("Failed to send StatusNotification: {}", e);
                Ok(())
            }
        }
    }

    /// Send a Heartbeat
    pub async fn heartbeat(&self, correlator: &CallCorrelator) -> Result<(), OcppError> {
        match correlator.send(Action::Heartbeat, serde_json::to_value(HeartbeatRequest {})?).await {
            Ok(result) => {
                if let Ok(response) = serde_json::from_value::<HeartbeatResponse>(result) {
                    debug!(
                        "Heartbeat acknowledged at {}",
                        response.current_time.as_deref().unwrap_or("?")
                    );
                }
                Ok(())
            }
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                error!("Heartbeat failed: {}", e);
                Ok(())
            }
        }
    }
}
