//! Events handed to the transaction user and commands fed into a
//! transaction's own event loop (spec.md §4.5 expansion), grounded on
//! `dialog-core::transaction::{TransactionEvent, InternalTransactionCommand}`.

use sip_core::types::{Request, Response};

use crate::key::TransactionKey;
use crate::state::TransactionState;

/// Delivered to the transaction user via `mpsc::Sender<TransactionEvent>`.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    StateChanged { key: TransactionKey, state: TransactionState },
    ProvisionalResponse { key: TransactionKey, response: Response },
    FinalResponse { key: TransactionKey, response: Response },
    /// A UAS transaction received its request (spec.md §6 "request_received").
    NewServerRequest { key: TransactionKey, request: Request },
    TransportError { key: TransactionKey, detail: String },
    TransactionTerminated { key: TransactionKey },
    Error { key: TransactionKey, detail: String },
}

impl TransactionEvent {
    pub fn key(&self) -> &TransactionKey {
        match self {
            TransactionEvent::StateChanged { key, .. }
            | TransactionEvent::ProvisionalResponse { key, .. }
            | TransactionEvent::FinalResponse { key, .. }
            | TransactionEvent::NewServerRequest { key, .. }
            | TransactionEvent::TransportError { key, .. }
            | TransactionEvent::TransactionTerminated { key }
            | TransactionEvent::Error { key, .. } => key,
        }
    }
}

/// Fed into a transaction's own command channel — by the manager on
/// message arrival, by the timer task on expiry, or by the TU to cancel.
#[derive(Debug, Clone)]
pub enum InternalTransactionCommand {
    ProcessRequest(Request),
    ProcessResponse(Response),
    /// The TU asking a server transaction to send a response (spec.md
    /// §4.5 "UAS INVITE"/"UAS non-INVITE" state machines).
    SendResponse(Response),
    Timer(TimerFired),
    TransitionTo(TransactionState),
    Terminate,
}

/// Which named timer (spec.md §4.5 "Timers") fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerFired {
    /// INVITE client retransmit (A) / non-INVITE client retransmit (E).
    Retransmit,
    /// Client transaction timeout (B/F).
    Timeout,
    /// Wait for response retransmits after a client transaction completes (D/K).
    WaitForRetransmits,
    /// UAS INVITE final-response retransmit (G).
    ResponseRetransmit,
    /// UAS INVITE wait for ACK (H).
    WaitForAck,
    /// UAS INVITE wait for ACK retransmits in Confirmed (I).
    WaitForAckRetransmits,
    /// UAS non-INVITE wait for request retransmits in Completed (J).
    WaitForRequestRetransmits,
}
