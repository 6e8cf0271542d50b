//! OCPP 1.6-J protocol implementation
//!
//! This module provides the charge point side of the bridge, talking to a
//! Central System:
//! - `types`: OCPP message payloads and measurement slots
//! - `messages`: JSON-RPC framing (CALL, CALLRESULT, CALLERROR)
//! - `correlator`: matching CALLRESULT/CALLERROR frames to outstanding CALLs
//! - `client`: WebSocket connection supervisor
//! - `session`: charge point state for one connection

pub mod types;
pub mod messages;
pub mod correlator;
pub mod client;
pub mod session;

pub use types::*;
pub use messages::*;
pub use correlator::{CallCorrelator, CallMode, Dispatch};
pub use client::{ConnectionState, OcppClient, OcppClientConfig};
pub use session::{ChargePointSession, MeasurementSlots, StationInfo, CONNECTOR_ID};
