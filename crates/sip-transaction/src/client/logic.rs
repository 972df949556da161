//! UAC INVITE / UAC non-INVITE state machines (spec.md §4.5), driven by a
//! per-transaction `tokio::spawn`ed loop — grounded on the shape of
//! `transaction-core::transaction::runner::run_transaction_loop`, simplified
//! from its fully generic `<D, TH, L>` parameterization to a single enum
//! dispatch since this engine only ever instantiates four concrete
//! machines, not an open set of pluggable ones.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::builders::build_ack;
use crate::client::data::ClientTransactionData;
use crate::event::{InternalTransactionCommand, TimerFired, TransactionEvent};
use crate::state::{TransactionKind, TransactionState};
use crate::timer::TimerFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientBehavior {
    Invite,
    NonInvite,
}

impl ClientBehavior {
    pub fn kind(self) -> TransactionKind {
        match self {
            ClientBehavior::Invite => TransactionKind::ClientInvite,
            ClientBehavior::NonInvite => TransactionKind::ClientNonInvite,
        }
    }

    pub fn initial_state(self) -> TransactionState {
        match self {
            ClientBehavior::Invite => TransactionState::Calling,
            ClientBehavior::NonInvite => TransactionState::Trying,
        }
    }
}

/// Send the request for the first time and arm the retransmit/timeout
/// timers (Timer A/B for INVITE, E/F for non-INVITE — spec.md §4.5
/// "Timers").
pub async fn start(data: Arc<ClientTransactionData>) {
    let mut req = data.request.lock().await.clone();
    if let Err(e) = data
        .transport
        .send_request(&mut req, Some(data.remote_addr), data.protocol, data.channel_id, false)
        .await
    {
        warn!(id = %data.id, error = %e, "initial request send failed");
        let _ = data.events_tx.send(TransactionEvent::TransportError { key: data.id.clone(), detail: e.to_string() }).await;
    }
    *data.request.lock().await = req;

    let reliable = data.reliable;
    let timeout = data.timer_settings.t1 * 64;
    TimerFactory::spawn_retransmit_schedule(data.cmd_tx.clone(), data.timer_settings, reliable, timeout, TimerFired::Retransmit, TimerFired::Timeout);
}

pub async fn run_event_loop(behavior: ClientBehavior, data: Arc<ClientTransactionData>, mut cmd_rx: mpsc::Receiver<InternalTransactionCommand>) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            InternalTransactionCommand::ProcessResponse(resp) => {
                if let Err(e) = on_response(behavior, &data, resp).await {
                    warn!(id = %data.id, error = %e, "error handling response");
                }
            }
            InternalTransactionCommand::Timer(timer) => {
                on_timer(behavior, &data, timer).await;
            }
            InternalTransactionCommand::TransitionTo(state) => {
                let _ = data.state.validate_transition(state);
            }
            InternalTransactionCommand::Terminate => break,
            InternalTransactionCommand::ProcessRequest(_) => {
                debug!(id = %data.id, "client transaction ignores inbound requests");
            }
            InternalTransactionCommand::SendResponse(_) => {
                debug!(id = %data.id, "client transaction ignores injected responses to send");
            }
        }
        if data.state.get() == TransactionState::Terminated {
            break;
        }
    }
    let _ = data.events_tx.send(TransactionEvent::TransactionTerminated { key: data.id.clone() }).await;
}

async fn on_response(behavior: ClientBehavior, data: &Arc<ClientTransactionData>, resp: sip_core::types::Response) -> crate::error::Result<()> {
    *data.last_response.lock().await = Some(resp.clone());

    if resp.status_code.is_provisional() {
        data.state.validate_transition(TransactionState::Proceeding)?;
        let _ = data.events_tx.send(TransactionEvent::ProvisionalResponse { key: data.id.clone(), response: resp }).await;
        return Ok(());
    }

    match behavior {
        ClientBehavior::Invite => {
            if resp.status_code.is_success() {
                data.state.validate_transition(TransactionState::Terminated)?;
                let _ = data.events_tx.send(TransactionEvent::FinalResponse { key: data.id.clone(), response: resp }).await;
            } else {
                data.state.validate_transition(TransactionState::Completed)?;
                let invite = data.request.lock().await.clone();
                let mut ack = build_ack(&invite, &resp);
                let _ = data.transport.send_request(&mut ack, Some(data.remote_addr), data.protocol, data.channel_id, false).await;
                let _ = data.events_tx.send(TransactionEvent::FinalResponse { key: data.id.clone(), response: resp }).await;

                let wait = if data.reliable { Duration::ZERO } else { data.timer_settings.t1 * 64 };
                TimerFactory::spawn_oneshot(data.cmd_tx.clone(), wait, TimerFired::WaitForRetransmits);
            }
        }
        ClientBehavior::NonInvite => {
            data.state.validate_transition(TransactionState::Completed)?;
            let _ = data.events_tx.send(TransactionEvent::FinalResponse { key: data.id.clone(), response: resp }).await;
            let wait = if data.reliable { Duration::ZERO } else { data.timer_settings.t4 };
            TimerFactory::spawn_oneshot(data.cmd_tx.clone(), wait, TimerFired::WaitForRetransmits);
        }
    }
    Ok(())
}

async fn on_timer(behavior: ClientBehavior, data: &Arc<ClientTransactionData>, timer: TimerFired) {
    match timer {
        TimerFired::Retransmit => {
            let retransmittable = match behavior {
                ClientBehavior::Invite => data.state.get() == TransactionState::Calling,
                ClientBehavior::NonInvite => matches!(data.state.get(), TransactionState::Trying | TransactionState::Proceeding),
            };
            if retransmittable {
                let mut req = data.request.lock().await.clone();
                let _ = data.transport.send_request(&mut req, Some(data.remote_addr), data.protocol, data.channel_id, false).await;
            }
        }
        TimerFired::Timeout => {
            let still_waiting = match behavior {
                ClientBehavior::Invite => data.state.get() == TransactionState::Calling,
                ClientBehavior::NonInvite => matches!(data.state.get(), TransactionState::Trying | TransactionState::Proceeding),
            };
            if still_waiting {
                let _ = data.events_tx.send(TransactionEvent::Error { key: data.id.clone(), detail: "transaction timed out".into() }).await;
                let _ = data.state.validate_transition(TransactionState::Terminated);
            }
        }
        TimerFired::WaitForRetransmits => {
            let _ = data.state.validate_transition(TransactionState::Terminated);
        }
        _ => {}
    }
}
