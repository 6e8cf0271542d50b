//! OCPP WebSocket client
//!
//! Implements the connection supervisor for the Central System link.
//! Handles:
//! - WebSocket connection with the OCPP 1.6 subprotocol
//! - Keepalive pings and pong timeout
//! - BootNotification handshake gating telemetry
//! - Reconnection after transport failures or boot rejection
//!
//! Each connection runs its receive loop and its session engine as two
//! futures polled by the same task, so the session and the correlator are
//! only ever touched from one place.

use std::future::Future;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::{header, HeaderValue},
        protocol::WebSocketConfig,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::correlator::{CallCorrelator, CallMode, Dispatch};
use super::messages::*;
use super::session::{ChargePointSession, StationInfo};
use crate::telemetry::bridge::{discard, process_event, MeterReportPolicy, TelemetryEvent};

/// OCPP 1.6 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// How long a closing connection gets to flush its Close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the OCPP client
#[derive(Debug, Clone)]
pub struct OcppClientConfig {
    /// Central System WebSocket URL (without charge point id)
    pub csms_url: String,
    /// Charge point identity (appended to the URL path)
    pub charge_point_id: String,
    /// Vendor name
    pub vendor: String,
    /// Model name
    pub model: String,
    /// Serial number (optional)
    pub serial_number: Option<String>,
    /// Firmware version (optional)
    pub firmware_version: Option<String>,
    /// Delay before reconnecting after a transport failure
    pub reconnect_delay: Duration,
    /// Delay before reconnecting after BootNotification was not accepted
    pub boot_retry_delay: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// WebSocket ping interval
    pub ping_interval: Duration,
    /// Maximum wait for a pong
    pub ping_timeout: Duration,
    /// Whether CALLs are sent one at a time
    pub call_mode: CallMode,
    /// When telemetry triggers MeterValues
    pub meter_policy: MeterReportPolicy,
    /// Send Heartbeat at the interval granted on boot
    pub heartbeat: bool,
}

impl Default for OcppClientConfig {
    fn default() -> Self {
        Self {
            csms_url: "ws://0.0.0.0:9000".to_string(),
            charge_point_id: "juicepassproxy".to_string(),
            vendor: "JuiceBox".to_string(),
            model: "JuicePass-OCPP".to_string(),
            serial_number: None,
            firmware_version: None,
            reconnect_delay: Duration::from_secs(5),
            boot_retry_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            call_mode: CallMode::Serialized,
            meter_policy: MeterReportPolicy::EveryUpdate,
            heartbeat: true,
        }
    }
}

impl OcppClientConfig {
    pub fn station_info(&self) -> StationInfo {
        StationInfo {
            vendor: self.vendor.clone(),
            model: self.model.clone(),
            serial_number: self.serial_number.clone(),
            firmware_version: self.firmware_version.clone(),
        }
    }
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, possibly waiting to retry
    Disconnected,
    /// Opening the WebSocket
    Connecting,
    /// Connected, BootNotification outstanding
    Handshaking,
    /// Boot accepted, telemetry flows
    Ready,
    /// Stopping for good
    ShuttingDown,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why a connection ended
#[derive(Debug)]
enum ConnectionOutcome {
    Lost(OcppError),
    BootRejected,
    Shutdown,
}

/// OCPP WebSocket client
pub struct OcppClient {
    config: OcppClientConfig,
    telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl OcppClient {
    /// Create a new OCPP client.
    ///
    /// `telemetry_rx` is the queue fed by the telemetry bridge; setting
    /// `shutdown_rx` to `true` stops the client.
    pub fn new(
        config: OcppClientConfig,
        telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            telemetry_rx,
            state_tx,
            shutdown_rx,
        }
    }

    /// Watch the connection state
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run the client connection loop until shutdown
    pub async fn run(mut self) -> Result<(), OcppError> {
        let url = build_ocpp_url(&self.config.csms_url, &self.config.charge_point_id);
        url.as_str()
            .into_client_request()
            .map_err(|e| OcppError::InvalidUrl(format!("{}: {}", url, e)))?;

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            set_state(&self.state_tx, ConnectionState::Connecting);
            info!("Connecting to Central System: {}", url);

            let delay = match self.connect_and_run(&url).await {
                ConnectionOutcome::Shutdown => break,
                ConnectionOutcome::BootRejected => self.config.boot_retry_delay,
                ConnectionOutcome::Lost(e) => {
                    error!("Connection error: {}", e);
                    self.config.reconnect_delay
                }
            };

            set_state(&self.state_tx, ConnectionState::Disconnected);
            if !delay.is_zero() {
                info!("Reconnecting in {:?}", delay);
            }

            let wait = tokio::time::sleep(delay);
            if until(wait, &mut self.telemetry_rx, &mut self.shutdown_rx).await.is_none() {
                break;
            }
        }

        set_state(&self.state_tx, ConnectionState::ShuttingDown);
        info!("OCPP client stopped");
        Ok(())
    }

    /// Connect and run until disconnection
    async fn connect_and_run(&mut self, url: &str) -> ConnectionOutcome {
        let mut request = match url.into_client_request() {
            Ok(request) => request,
            Err(e) => return ConnectionOutcome::Lost(e.into()),
        };
        request.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(OCPP_SUBPROTOCOL),
        );

        let ws_config = WebSocketConfig {
            max_message_size: Some(64 * 1024),
            max_frame_size: Some(16 * 1024),
            ..Default::default()
        };

        let connect = connect_async_with_config(request, Some(ws_config), false);
        let (ws_stream, response) =
            match until(connect, &mut self.telemetry_rx, &mut self.shutdown_rx).await {
                None => return ConnectionOutcome::Shutdown,
                Some(Err(e)) => return ConnectionOutcome::Lost(e.into()),
                Some(Ok(connection)) => connection,
            };

        // Verify subprotocol
        let accepted_protocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());

        if accepted_protocol != Some(OCPP_SUBPROTOCOL) {
            return ConnectionOutcome::Lost(OcppError::SubprotocolRejected(
                accepted_protocol.map(str::to_string),
            ));
        }

        info!("WebSocket connected to {}", url);
        set_state(&self.state_tx, ConnectionState::Handshaking);

        let (ws_tx, ws_rx) = ws_stream.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Message>(64);
        let writer = tokio::spawn(write_loop(ws_tx, outgoing_rx));

        let correlator = CallCorrelator::new(
            outgoing_tx.clone(),
            self.config.request_timeout,
            self.config.call_mode,
        );

        let outcome = tokio::select! {
            reason = receive_loop(
                ws_rx,
                &correlator,
                &outgoing_tx,
                self.config.ping_interval,
                self.config.ping_timeout,
            ) => ConnectionOutcome::Lost(reason),
            outcome = drive_session(
                &self.config,
                &self.state_tx,
                &correlator,
                &mut self.telemetry_rx,
            ) => outcome,
            _ = shutdown_requested(&mut self.shutdown_rx) => ConnectionOutcome::Shutdown,
        };

        correlator.fail_all();
        drop(correlator);

        if let ConnectionOutcome::Shutdown = outcome {
            set_state(&self.state_tx, ConnectionState::ShuttingDown);
            let _ = outgoing_tx.send(Message::Close(None)).await;
            drop(outgoing_tx);
            if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
                warn!("WebSocket close did not complete in {:?}", CLOSE_TIMEOUT);
            }
        } else {
            drop(outgoing_tx);
            writer.abort();
        }

        outcome
    }
}

/// Boot the session, then feed it telemetry until the connection ends
async fn drive_session(
    config: &OcppClientConfig,
    state_tx: &watch::Sender<ConnectionState>,
    correlator: &CallCorrelator,
    telemetry_rx: &mut mpsc::UnboundedReceiver<TelemetryEvent>,
) -> ConnectionOutcome {
    let mut session = ChargePointSession::new(config.station_info());

    let boot = {
        let handshake = session.boot_notification(correlator);
        tokio::pin!(handshake);
        loop {
            tokio::select! {
                result = &mut handshake => break result,
                Some(event) = telemetry_rx.recv() => discard(&event),
            }
        }
    };

    match boot {
        Ok(_) if session.is_accepted() => {}
        Ok(response) => {
            warn!("BootNotification not accepted: {:?}", response.status);
            return ConnectionOutcome::BootRejected;
        }
        Err(e) if e.is_transport() => return ConnectionOutcome::Lost(e),
        Err(e) => {
            error!("BootNotification failed: {}", e);
            return ConnectionOutcome::BootRejected;
        }
    }

    set_state(state_tx, ConnectionState::Ready);

    let mut heartbeat = match (config.heartbeat, session.heartbeat_interval()) {
        (true, Some(secs)) => {
            let period = Duration::from_secs(u64::from(secs));
            Some(tokio::time::interval_at(Instant::now() + period, period))
        }
        _ => None,
    };
    let mut telemetry_open = true;

    loop {
        let result = tokio::select! {
            event = telemetry_rx.recv(), if telemetry_open => match event {
                Some(event) => {
                    process_event(&mut session, event, telemetry_rx, correlator, config.meter_policy).await
                }
                None => {
                    warn!("Telemetry source closed");
                    telemetry_open = false;
                    Ok(())
                }
            },
            _ = tick(&mut heartbeat) => session.heartbeat(correlator).await,
        };

        if let Err(e) = result {
            return ConnectionOutcome::Lost(e);
        }
    }
}

/// Read frames until the transport fails, answering pings and dispatching answers
async fn receive_loop(
    mut ws_rx: SplitStream<WsStream>,
    correlator: &CallCorrelator,
    outgoing_tx: &mpsc::Sender<Message>,
    ping_interval: Duration,
    ping_timeout: Duration,
) -> OcppError {
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    debug!("Received: {}", text);
                    handle_frame(text.as_bytes(), correlator, outgoing_tx).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    pong_deadline = None;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed by server: {:?}", frame);
                    return OcppError::ConnectionClosed;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("Ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return OcppError::WebSocket(e),
                None => {
                    info!("WebSocket stream ended");
                    return OcppError::ConnectionClosed;
                }
            },

            _ = ping.tick() => {
                if outgoing_tx.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                    return OcppError::ConnectionClosed;
                }
                pong_deadline.get_or_insert(Instant::now() + ping_timeout);
            }

            _ = tokio::time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                return OcppError::PingTimeout(ping_timeout);
            }
        }
    }
}

/// Decode one text frame and hand it to the correlator
async fn handle_frame(bytes: &[u8], correlator: &CallCorrelator, outgoing_tx: &mpsc::Sender<Message>) {
    let message = match OcppMessage::parse(bytes) {
        Ok(message) => message,
        Err(e) if e.is_malformed() => {
            warn!("Discarding malformed frame: {}", e);
            return;
        }
        Err(e) => {
            error!("Failed to decode frame: {}", e);
            return;
        }
    };

    let message_id = message.message_id().to_string();
    match correlator.handle_incoming(message) {
        Dispatch::Matched => debug!("Answer for {} delivered", message_id),
        Dispatch::Unmatched => {}
        Dispatch::NotAResponse(call) => {
            warn!("Central System request {} is not supported", call.action);
            let reply = CallError::new(
                call.message_id,
                ErrorCode::NotImplemented,
                format!("{} is not supported", call.action),
            );
            match reply.to_text() {
                Ok(text) => {
                    let _ = outgoing_tx.send(Message::Text(text.into())).await;
                }
                Err(e) => error!("Failed to serialize CALLERROR: {}", e),
            }
        }
    }
}

/// Forward queued frames to the socket
async fn write_loop(mut ws_tx: SplitSink<WsStream, Message>, mut outgoing_rx: mpsc::Receiver<Message>) {
    while let Some(msg) = outgoing_rx.recv().await {
        if let Message::Text(text) = &msg {
            debug!("Sending: {}", text);
        }
        let closing = matches!(msg, Message::Close(_));

        if let Err(e) = ws_tx.send(msg).await {
            error!("Failed to send WebSocket message: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}

/// Drive `fut` while discarding telemetry; `None` if shutdown came first
async fn until<F: Future>(
    fut: F,
    telemetry_rx: &mut mpsc::UnboundedReceiver<TelemetryEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            output = &mut fut => return Some(output),
            _ = shutdown_requested(shutdown_rx) => return None,
            Some(event) = telemetry_rx.recv() => discard(&event),
        }
    }
}

async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    if shutdown_rx.wait_for(|stop| *stop).await.is_err() {
        // Sender gone: nobody can ask us to stop any more
        std::future::pending::<()>().await;
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn set_state(state_tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    state_tx.send_if_modified(|current| {
        if *current == state {
            return false;
        }
        debug!("Connection state: {} -> {}", current, state);
        *current = state;
        true
    });
}

/// Build the full OCPP WebSocket URL
pub fn build_ocpp_url(base_url: &str, charge_point_id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), charge_point_id)
}
