//! Request/response correlation for outbound CALLs
//!
//! Every CALL the charge point sends is tracked until the Central System
//! answers it with a CALLRESULT or CALLERROR carrying the same message id,
//! the request times out, or the connection goes away.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use super::messages::*;

/// How many CALLs may be outstanding at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallMode {
    /// One CALL in flight; later sends wait their turn (OCPP 1.6 core profile)
    #[default]
    Serialized,
    /// Any number of CALLs in flight
    Concurrent,
}

/// What happened to a frame passed to [`CallCorrelator::handle_incoming`]
#[derive(Debug)]
pub enum Dispatch {
    /// Completed a pending call
    Matched,
    /// No call with this id is pending (late or duplicate answer)
    Unmatched,
    /// The frame is a request from the Central System, not an answer
    NotAResponse(Call),
}

/// Pending request awaiting response
struct PendingCall {
    action: Action,
    deadline: Instant,
    response_tx: oneshot::Sender<Result<Value, OcppError>>,
}

/// Tracks outstanding CALLs for one connection
pub struct CallCorrelator {
    outgoing_tx: mpsc::Sender<Message>,
    pending: Mutex<HashMap<String, PendingCall>>,
    in_flight: tokio::sync::Mutex<()>,
    timeout: Duration,
    mode: CallMode,
}

impl CallCorrelator {
    pub fn new(outgoing_tx: mpsc::Sender<Message>, timeout: Duration, mode: CallMode) -> Self {
        Self {
            outgoing_tx,
            pending: Mutex::new(HashMap::new()),
            in_flight: tokio::sync::Mutex::new(()),
            timeout,
            mode,
        }
    }

    /// Number of calls awaiting an answer
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send a CALL and wait for its answer.
    ///
    /// Resolves to the CALLRESULT payload, `RemoteError` for a CALLERROR,
    /// `Timeout` when no answer arrives in time, or `ConnectionClosed` when
    /// the connection drops first.
    pub async fn send(&self, action: Action, payload: Value) -> Result<Value, OcppError> {
        let _turn = match self.mode {
            CallMode::Serialized => Some(self.in_flight.lock().await),
            CallMode::Concurrent => None,
        };

        let (response_tx, response_rx) = oneshot::channel();
        let message_id = {
            let mut pending = self.pending.lock();
            let mut message_id = Uuid::new_v4().to_string();
            while pending.contains_key(&message_id) {
                message_id = Uuid::new_v4().to_string();
            }
            pending.insert(
                message_id.clone(),
                PendingCall {
                    action,
                    deadline: Instant::now() + self.timeout,
                    response_tx,
                },
            );
            message_id
        };

        let text = match Call::new(message_id.clone(), action, payload).to_text() {
            Ok(text) => text,
            Err(e) => {
                self.pending.lock().remove(&message_id);
                return Err(e);
            }
        };

        debug!("Sending {} ({})", action, message_id);
        if self.outgoing_tx.send(Message::Text(text.into())).await.is_err() {
            self.pending.lock().remove(&message_id);
            return Err(OcppError::ConnectionClosed);
        }

        match tokio::time::timeout(self.timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OcppError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&message_id);
                warn!("{} ({}) timed out after {:?}", action, message_id, self.timeout);
                Err(OcppError::Timeout)
            }
        }
    }

    /// Route an inbound frame to the call it answers
    pub fn handle_incoming(&self, message: OcppMessage) -> Dispatch {
        let (message_id, outcome) = match message {
            OcppMessage::Call(call) => return Dispatch::NotAResponse(call),
            OcppMessage::CallResult(result) => (result.message_id, Ok(result.payload)),
            OcppMessage::CallError(error) => (error.message_id.clone(), Err(error.into_error())),
        };

        let Some(call) = self.pending.lock().remove(&message_id) else {
            warn!("Discarding answer for unknown message id {}", message_id);
            return Dispatch::Unmatched;
        };

        if Instant::now() > call.deadline {
            debug!("{} ({}) answered past its deadline", call.action, message_id);
        }

        // The caller may have given up already; nothing else to do then.
        let _ = call.response_tx.send(outcome);
        Dispatch::Matched
    }

    /// Fail every pending call with `ConnectionClosed`
    pub fn fail_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (message_id, call) in drained {
            debug!("Failing {} ({}): connection lost", call.action, message_id);
            let _ = call.response_tx.send(Err(OcppError::ConnectionClosed));
        }
    }
}
