//! Client transaction data (spec.md §4.5), grounded on
//! `dialog-core::transaction::client::data::ClientTransactionData` —
//! including its `Drop`-aborts-the-event-loop discipline.

use std::net::SocketAddr;
use std::sync::Arc;

use sip_core::types::{ChannelId, Protocol, Request, Response};
use sip_transport::transport::Transport;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::event::{InternalTransactionCommand, TransactionEvent};
use crate::key::TransactionKey;
use crate::state::AtomicTransactionState;
use crate::timer::TimerSettings;

pub type CommandSender = mpsc::Sender<InternalTransactionCommand>;

#[derive(Debug)]
pub struct ClientTransactionData {
    pub id: TransactionKey,
    pub state: Arc<AtomicTransactionState>,
    pub request: Arc<Mutex<Request>>,
    pub last_response: Arc<Mutex<Option<Response>>>,
    pub remote_addr: SocketAddr,
    pub protocol: Protocol,
    /// Whether wire retransmits are suppressed — true for a
    /// connection-oriented protocol, or when `disable_retransmit_sending`
    /// (spec.md §6) forces the same behavior onto an unreliable one.
    pub reliable: bool,
    pub channel_id: Option<ChannelId>,
    pub transport: Transport,
    pub events_tx: mpsc::Sender<TransactionEvent>,
    pub cmd_tx: CommandSender,
    pub event_loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    pub timer_settings: TimerSettings,
}

impl Drop for ClientTransactionData {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.event_loop_handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
                debug!(id = %self.id, "aborted client transaction event loop");
            }
        }
    }
}
