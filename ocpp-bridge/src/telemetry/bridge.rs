//! Telemetry bridge
//!
//! Turns raw bus messages into session updates. The bus side calls
//! [`TelemetryBridge::on_message`] from whatever task or thread delivers
//! messages; the reading is parsed there and posted on a channel that only
//! the protocol engine consumes, so the session is never touched off the
//! engine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::topics::{Route, TopicMap};
use super::TelemetryError;
use crate::ocpp::correlator::CallCorrelator;
use crate::ocpp::messages::OcppError;
use crate::ocpp::session::ChargePointSession;
use crate::ocpp::types::Measurement;

/// When MeterValues go out in response to telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeterReportPolicy {
    /// One snapshot after every reading
    #[default]
    EveryUpdate,
    /// Apply every reading already queued, then send one snapshot
    Coalesce,
}

/// A parsed reading on its way to the protocol engine
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Reading { slot: Measurement, value: f64 },
    Status(String),
}

/// Delivery callback handed to the telemetry bus
#[derive(Debug, Clone)]
pub struct TelemetryBridge {
    topics: Arc<TopicMap>,
    engine_tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl TelemetryBridge {
    /// Create a bridge and the queue the protocol engine drains
    pub fn new(topics: TopicMap) -> (Self, mpsc::UnboundedReceiver<TelemetryEvent>) {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let bridge = Self {
            topics: Arc::new(topics),
            engine_tx,
        };
        (bridge, engine_rx)
    }

    pub fn topics(&self) -> &TopicMap {
        &self.topics
    }

    /// Handle one bus message. Never blocks.
    pub fn on_message(&self, topic: &str, payload: &[u8]) -> Result<(), TelemetryError> {
        let event = match self.parse(topic, payload) {
            Ok(event) => event,
            Err(TelemetryError::UnknownTopic(topic)) => {
                debug!("Ignoring message on unrouted topic {}", topic);
                return Err(TelemetryError::UnknownTopic(topic));
            }
            Err(e) => {
                error!("{}", e);
                return Err(e);
            }
        };

        debug!("Received {:?} on {}", event, topic);
        self.engine_tx
            .send(event)
            .map_err(|_| TelemetryError::EngineClosed)
    }

    fn parse(&self, topic: &str, payload: &[u8]) -> Result<TelemetryEvent, TelemetryError> {
        let route = self
            .topics
            .route(topic)
            .ok_or_else(|| TelemetryError::UnknownTopic(topic.to_string()))?;

        let text = std::str::from_utf8(payload).map_err(|_| TelemetryError::InvalidUtf8 {
            topic: topic.to_string(),
        })?;

        match route {
            Route::Status => Ok(TelemetryEvent::Status(text.trim().to_string())),
            Route::Slot(slot) => {
                let value = text
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| TelemetryError::InvalidNumber {
                        topic: topic.to_string(),
                        payload: text.to_string(),
                    })?;
                Ok(TelemetryEvent::Reading { slot, value })
            }
        }
    }
}

/// Drop an event that arrived while no accepted session exists
pub fn discard(event: &TelemetryEvent) {
    warn!("OCPP session not ready, telemetry ignored: {:?}", event);
}

/// Apply one event to the session without reporting meter values
async fn apply(
    session: &mut ChargePointSession,
    event: TelemetryEvent,
    correlator: &CallCorrelator,
) -> Result<(), OcppError> {
    match event {
        TelemetryEvent::Reading { slot, value } => {
            session.record(slot, value);
            Ok(())
        }
        TelemetryEvent::Status(status) => session.report_status(&status, correlator).await,
    }
}

/// Process an event on the protocol engine, then report meter values.
///
/// Under [`MeterReportPolicy::Coalesce`] every event already waiting in
/// `queue` is applied before the single report.
pub async fn process_event(
    session: &mut ChargePointSession,
    event: TelemetryEvent,
    queue: &mut mpsc::UnboundedReceiver<TelemetryEvent>,
    correlator: &CallCorrelator,
    policy: MeterReportPolicy,
) -> Result<(), OcppError> {
    apply(session, event, correlator).await?;

    if policy == MeterReportPolicy::Coalesce {
        while let Ok(event) = queue.try_recv() {
            apply(session, event, correlator).await?;
        }
    }

    session.report_meter_values(correlator).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::correlator::CallMode;
    use crate::ocpp::messages::{Call, CallResult, OcppMessage};
    use crate::ocpp::session::StationInfo;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    const VOLTAGE: &str = "hmd/sensor/JuiceBox/Voltage/state";
    const CURRENT: &str = "hmd/sensor/JuiceBox/Current/state";
    const STATUS: &str = "hmd/sensor/JuiceBox/Status/state";

    fn session() -> ChargePointSession {
        ChargePointSession::new(StationInfo {
            vendor: "JuiceBox".to_string(),
            model: "JuicePass-OCPP".to_string(),
            serial_number: None,
            firmware_version: None,
        })
    }

    /// Correlator whose every CALL is answered with an empty CALLRESULT.
    /// Answered calls are forwarded on the returned receiver.
    fn answering_correlator() -> (Arc<CallCorrelator>, mpsc::UnboundedReceiver<Call>) {
        let (tx, mut wire) = mpsc::channel(16);
        let correlator = Arc::new(CallCorrelator::new(tx, Duration::from_secs(5), CallMode::Serialized));
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        let responder = correlator.clone();
        tokio::spawn(async move {
            while let Some(Message::Text(text)) = wire.recv().await {
                if let Ok(OcppMessage::Call(call)) = OcppMessage::parse(text.as_bytes()) {
                    let result = CallResult::new(call.message_id.clone(), serde_json::json!({})).unwrap();
                    let _ = seen_tx.send(call);
                    responder.handle_incoming(OcppMessage::CallResult(result));
                }
            }
        });

        (correlator, seen_rx)
    }

    fn drain(seen: &mut mpsc::UnboundedReceiver<Call>) -> Vec<Call> {
        let mut calls = Vec::new();
        while let Ok(call) = seen.try_recv() {
            calls.push(call);
        }
        calls
    }

    #[test]
    fn test_routes_numeric_reading() {
        let (bridge, mut engine) = TelemetryBridge::new(TopicMap::default());

        bridge.on_message(VOLTAGE, b" 237.5\n").unwrap();
        assert_eq!(
            engine.try_recv().unwrap(),
            TelemetryEvent::Reading { slot: Measurement::Voltage, value: 237.5 }
        );
    }

    #[test]
    fn test_routes_status() {
        let (bridge, mut engine) = TelemetryBridge::new(TopicMap::default());

        bridge.on_message(STATUS, b"Charging").unwrap();
        assert_eq!(engine.try_recv().unwrap(), TelemetryEvent::Status("Charging".to_string()));
    }

    #[test]
    fn test_bad_payloads_are_dropped() {
        let (bridge, mut engine) = TelemetryBridge::new(TopicMap::default());

        assert!(matches!(
            bridge.on_message(CURRENT, b"abc"),
            Err(TelemetryError::InvalidNumber { .. })
        ));
        assert!(matches!(
            bridge.on_message(CURRENT, b"NaN"),
            Err(TelemetryError::InvalidNumber { .. })
        ));
        assert!(matches!(
            bridge.on_message(CURRENT, &[0xff, 0xfe]),
            Err(TelemetryError::InvalidUtf8 { .. })
        ));
        assert!(engine.try_recv().is_err());

        // Later readings still get through
        bridge.on_message(CURRENT, b"16").unwrap();
        assert_eq!(
            engine.try_recv().unwrap(),
            TelemetryEvent::Reading { slot: Measurement::CurrentImport, value: 16.0 }
        );
    }

    #[test]
    fn test_unknown_topic_is_ignored() {
        let (bridge, mut engine) = TelemetryBridge::new(TopicMap::default());

        assert!(matches!(
            bridge.on_message("hmd/sensor/JuiceBox/Uptime/state", b"12"),
            Err(TelemetryError::UnknownTopic(_))
        ));
        assert!(engine.try_recv().is_err());
    }

    #[test]
    fn test_engine_gone() {
        let (bridge, engine) = TelemetryBridge::new(TopicMap::default());
        drop(engine);

        assert!(matches!(bridge.on_message(VOLTAGE, b"230"), Err(TelemetryError::EngineClosed)));
    }

    #[tokio::test]
    async fn test_voltage_reading_sends_one_meter_values() {
        let (correlator, mut seen) = answering_correlator();
        let (bridge, mut queue) = TelemetryBridge::new(TopicMap::default());
        let mut session = session();

        bridge.on_message(VOLTAGE, b"237.5").unwrap();
        let event = queue.recv().await.unwrap();
        process_event(&mut session, event, &mut queue, &correlator, MeterReportPolicy::EveryUpdate)
            .await
            .unwrap();

        let calls = drain(&mut seen);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].action, "MeterValues");
        assert_eq!(
            calls[0].payload["meterValue"][0]["sampledValue"],
            serde_json::json!([{"value": "237.5", "measurand": "Voltage", "unit": "V"}])
        );
    }

    #[tokio::test]
    async fn test_status_sends_notification_then_meter_values() {
        let (correlator, mut seen) = answering_correlator();
        let (bridge, mut queue) = TelemetryBridge::new(TopicMap::default());
        let mut session = session();
        session.record(Measurement::CurrentImport, 32.0);

        bridge.on_message(STATUS, b"Charging").unwrap();
        let event = queue.recv().await.unwrap();
        process_event(&mut session, event, &mut queue, &correlator, MeterReportPolicy::EveryUpdate)
            .await
            .unwrap();

        let calls = drain(&mut seen);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].action, "StatusNotification");
        assert_eq!(calls[0].payload["status"], "Charging");
        assert_eq!(calls[0].payload["connectorId"], 1);
        assert_eq!(calls[0].payload["errorCode"], "NoError");
        assert_eq!(calls[1].action, "MeterValues");
        assert_eq!(
            calls[1].payload["meterValue"][0]["sampledValue"][0]["measurand"],
            "Current.Import"
        );
    }

    #[tokio::test]
    async fn test_status_without_readings_sends_only_notification() {
        let (correlator, mut seen) = answering_correlator();
        let (_bridge, mut queue) = TelemetryBridge::new(TopicMap::default());
        let mut session = session();

        let event = TelemetryEvent::Status("Available".to_string());
        process_event(&mut session, event, &mut queue, &correlator, MeterReportPolicy::EveryUpdate)
            .await
            .unwrap();

        let calls = drain(&mut seen);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].action, "StatusNotification");
    }

    #[tokio::test]
    async fn test_every_update_reports_each_reading() {
        let (correlator, mut seen) = answering_correlator();
        let (bridge, mut queue) = TelemetryBridge::new(TopicMap::default());
        let mut session = session();

        bridge.on_message(VOLTAGE, b"230").unwrap();
        bridge.on_message(CURRENT, b"abc").unwrap_err();
        bridge.on_message(CURRENT, b"16").unwrap();

        while let Ok(event) = queue.try_recv() {
            process_event(&mut session, event, &mut queue, &correlator, MeterReportPolicy::EveryUpdate)
                .await
                .unwrap();
        }

        let calls = drain(&mut seen);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].payload["meterValue"][0]["sampledValue"].as_array().unwrap().len(), 1);
        assert_eq!(calls[1].payload["meterValue"][0]["sampledValue"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_coalesce_sends_single_snapshot() {
        let (correlator, mut seen) = answering_correlator();
        let (bridge, mut queue) = TelemetryBridge::new(TopicMap::default());
        let mut session = session();

        bridge.on_message(VOLTAGE, b"230").unwrap();
        bridge.on_message(CURRENT, b"16").unwrap();
        bridge.on_message(VOLTAGE, b"231").unwrap();

        let event = queue.recv().await.unwrap();
        process_event(&mut session, event, &mut queue, &correlator, MeterReportPolicy::Coalesce)
            .await
            .unwrap();

        let calls = drain(&mut seen);
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].payload["meterValue"][0]["sampledValue"],
            serde_json::json!([
                {"value": "231", "measurand": "Voltage", "unit": "V"},
                {"value": "16", "measurand": "Current.Import", "unit": "A"}
            ])
        );
    }
}
