//! UAS INVITE / UAS non-INVITE state machines (spec.md §4.5).

use std::sync::Arc;
use std::time::Duration;

use sip_core::types::{Method, Request, Response};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::{InternalTransactionCommand, TimerFired, TransactionEvent};
use crate::server::data::ServerTransactionData;
use crate::state::{TransactionKind, TransactionState};
use crate::timer::TimerFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBehavior {
    Invite,
    NonInvite,
}

impl ServerBehavior {
    pub fn kind(self) -> TransactionKind {
        match self {
            ServerBehavior::Invite => TransactionKind::ServerInvite,
            ServerBehavior::NonInvite => TransactionKind::ServerNonInvite,
        }
    }

    pub fn initial_state(self) -> TransactionState {
        match self {
            ServerBehavior::Invite => TransactionState::Proceeding,
            ServerBehavior::NonInvite => TransactionState::Trying,
        }
    }
}

pub async fn run_event_loop(behavior: ServerBehavior, data: Arc<ServerTransactionData>, mut cmd_rx: mpsc::Receiver<InternalTransactionCommand>) {
    let _ = data.events_tx.send(TransactionEvent::NewServerRequest {
        key: data.id.clone(),
        request: data.request.lock().await.clone(),
    }).await;

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            InternalTransactionCommand::SendResponse(resp) => {
                if let Err(e) = on_send_response(behavior, &data, resp).await {
                    warn!(id = %data.id, error = %e, "error sending response");
                }
            }
            InternalTransactionCommand::ProcessRequest(req) => {
                on_duplicate_request(behavior, &data, req).await;
            }
            InternalTransactionCommand::Timer(timer) => {
                on_timer(behavior, &data, timer).await;
            }
            InternalTransactionCommand::TransitionTo(state) => {
                let _ = data.state.validate_transition(state);
            }
            InternalTransactionCommand::Terminate => break,
            InternalTransactionCommand::ProcessResponse(_) => {
                debug!(id = %data.id, "server transaction ignores injected responses");
            }
        }
        if data.state.get() == TransactionState::Terminated {
            break;
        }
    }
    let _ = data.events_tx.send(TransactionEvent::TransactionTerminated { key: data.id.clone() }).await;
}

async fn send_via_transport(data: &Arc<ServerTransactionData>, resp: &mut Response) {
    if let Err(e) = data.transport.send_response(resp, data.remote_addr, data.protocol, data.channel_id, data.connection_id).await {
        warn!(id = %data.id, error = %e, "response send failed");
        let _ = data.events_tx.send(TransactionEvent::TransportError { key: data.id.clone(), detail: e.to_string() }).await;
    }
}

async fn on_send_response(behavior: ServerBehavior, data: &Arc<ServerTransactionData>, mut resp: Response) -> crate::error::Result<()> {
    send_via_transport(data, &mut resp).await;

    if resp.status_code.is_provisional() {
        data.state.validate_transition(TransactionState::Proceeding)?;
        *data.last_response.lock().await = Some(resp);
        return Ok(());
    }

    *data.last_response.lock().await = Some(resp.clone());
    data.state.validate_transition(TransactionState::Completed)?;

    match behavior {
        ServerBehavior::Invite => {
            if resp.status_code.is_success() {
                data.state.validate_transition(TransactionState::Terminated)?;
            } else {
                let reliable = data.reliable;
                let wait_h = data.timer_settings.t1 * 64;
                TimerFactory::spawn_retransmit_schedule(data.cmd_tx.clone(), data.timer_settings, reliable, wait_h, TimerFired::ResponseRetransmit, TimerFired::WaitForAck);
            }
        }
        ServerBehavior::NonInvite => {
            let wait = if data.reliable { Duration::ZERO } else { data.timer_settings.t1 * 64 };
            TimerFactory::spawn_oneshot(data.cmd_tx.clone(), wait, TimerFired::WaitForRequestRetransmits);
        }
    }
    Ok(())
}

/// A duplicate arrival of the original request, or an ACK (spec.md §4.5
/// "Matching"): retransmit whatever is currently buffered rather than
/// re-running application logic.
async fn on_duplicate_request(behavior: ServerBehavior, data: &Arc<ServerTransactionData>, req: Request) {
    if behavior == ServerBehavior::Invite && req.method == Method::Ack {
        if data.state.get() == TransactionState::Completed {
            if data.state.validate_transition(TransactionState::Confirmed).is_ok() {
                let wait = if data.reliable { Duration::ZERO } else { data.timer_settings.t4 };
                TimerFactory::spawn_oneshot(data.cmd_tx.clone(), wait, TimerFired::WaitForAckRetransmits);
            }
        }
        return;
    }

    let state = data.state.get();
    let stored = data.last_response.lock().await.clone();
    match (state, stored) {
        (TransactionState::Proceeding, Some(mut resp)) | (TransactionState::Completed, Some(mut resp)) => {
            debug!(id = %data.id, "retransmitting buffered response for duplicate request");
            send_via_transport(data, &mut resp).await;
        }
        _ => {}
    }
}

async fn on_timer(_behavior: ServerBehavior, data: &Arc<ServerTransactionData>, timer: TimerFired) {
    match timer {
        TimerFired::ResponseRetransmit => {
            if data.state.get() == TransactionState::Completed {
                if let Some(mut resp) = data.last_response.lock().await.clone() {
                    send_via_transport(data, &mut resp).await;
                }
            }
        }
        TimerFired::WaitForAck => {
            if data.state.get() == TransactionState::Completed {
                let _ = data.events_tx.send(TransactionEvent::Error { key: data.id.clone(), detail: "ACK never arrived".into() }).await;
                let _ = data.state.validate_transition(TransactionState::Terminated);
            }
        }
        TimerFired::WaitForAckRetransmits | TimerFired::WaitForRequestRetransmits => {
            let _ = data.state.validate_transition(TransactionState::Terminated);
        }
        _ => {}
    }
}
