//! The transaction engine façade (spec.md §4.5 "Capacity" / "Matching"),
//! grounded on `dialog-core::transaction::TransactionManager`: a
//! `DashMap`-backed table per side, Via-branch based matching, and the
//! soft capacity cap that fails loudly instead of silently dropping.
//!
//! Follows `sip_transport::transport::Transport`'s `Arc<Inner>` shape —
//! cheap to clone, background tasks hold their own `Arc<Inner>` clone
//! rather than a back-pointer into the manager (spec.md §9 "Cyclic
//! references").

pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use sip_core::types::{ChannelId, ConnectionId, Method, Protocol, Request, Response, StatusCode};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::builders::{build_cancel, build_response};
use crate::client::data::ClientTransactionData;
use crate::client::logic::{self, ClientBehavior};
use crate::error::{Error, Result};
use crate::event::{InternalTransactionCommand, TransactionEvent};
use crate::key::TransactionKey;
use crate::server::data::ServerTransactionData;
use crate::server::logic::{self as server_logic, ServerBehavior};
use crate::state::AtomicTransactionState;
use crate::timer::TimerSettings;
pub use types::StrayRequest;

#[derive(Debug, Clone, Copy)]
pub struct TransactionManagerConfig {
    pub max_pending_transactions: usize,
    pub disable_retransmit_sending: bool,
    pub timer_settings: TimerSettings,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        TransactionManagerConfig {
            max_pending_transactions: 5000,
            disable_retransmit_sending: false,
            timer_settings: TimerSettings::default(),
        }
    }
}

struct Inner {
    transport: sip_transport::transport::Transport,
    config: TransactionManagerConfig,
    clients: DashMap<TransactionKey, Arc<ClientTransactionData>>,
    servers: DashMap<TransactionKey, Arc<ServerTransactionData>>,
    events_tx: mpsc::Sender<TransactionEvent>,
}

#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<Inner>,
}

impl TransactionManager {
    pub fn new(transport: sip_transport::transport::Transport, config: TransactionManagerConfig) -> (Self, mpsc::Receiver<TransactionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(1024);
        let inner = Arc::new(Inner {
            transport,
            config,
            clients: DashMap::new(),
            servers: DashMap::new(),
            events_tx,
        });
        (TransactionManager { inner }, events_rx)
    }

    pub async fn client_state(&self, key: &TransactionKey) -> Option<crate::state::TransactionState> {
        Some(self.inner.clients.get(key)?.state.get())
    }

    pub async fn server_state(&self, key: &TransactionKey) -> Option<crate::state::TransactionState> {
        Some(self.inner.servers.get(key)?.state.get())
    }

    /// The request a server transaction is buffering, for a TU that needs
    /// to build a response carrying the same dialog-identifying headers.
    pub async fn server_request(&self, key: &TransactionKey) -> Option<Request> {
        let entry = self.inner.servers.get(key)?.clone();
        let req = entry.request.lock().await.clone();
        Some(req)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.clients.len() + self.inner.servers.len()
    }

    fn check_capacity(&self) -> Result<()> {
        if self.pending_count() >= self.inner.config.max_pending_transactions {
            return Err(Error::TooManyTransactions(self.pending_count()));
        }
        Ok(())
    }

    fn reliable_for(&self, protocol: Protocol) -> bool {
        protocol.is_reliable() || self.inner.config.disable_retransmit_sending
    }

    /// Start a new UAC transaction for `request`, generating an RFC 3261
    /// branch if one isn't already present, and send it.
    pub async fn create_client_transaction(&self, mut request: Request, dst: SocketAddr, protocol: Protocol, channel_id_hint: Option<ChannelId>) -> Result<TransactionKey> {
        self.check_capacity()?;

        let needs_branch = !request.header.top_via().map(|v| v.is_rfc3261_branch()).unwrap_or(false);
        if needs_branch {
            let branch = format!("{}{:032x}", sip_core::types::via::MAGIC_COOKIE, rand::random::<u128>());
            request.header.push_via(sip_core::types::Via::new(protocol.as_str().to_ascii_lowercase(), "0.0.0.0", branch));
        }

        let behavior = if request.method.is_invite() { ClientBehavior::Invite } else { ClientBehavior::NonInvite };
        let key = TransactionKey::for_request(&request, false).ok_or_else(|| Error::NoSuchTransaction("request has no Via".into()))?;
        if self.inner.clients.contains_key(&key) {
            return Err(Error::DuplicateTransaction(key.to_string()));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let data = Arc::new(ClientTransactionData {
            id: key.clone(),
            state: Arc::new(AtomicTransactionState::new(behavior.kind(), behavior.initial_state())),
            request: Arc::new(Mutex::new(request)),
            last_response: Arc::new(Mutex::new(None)),
            remote_addr: dst,
            protocol,
            reliable: self.reliable_for(protocol),
            channel_id: channel_id_hint,
            transport: self.inner.transport.clone(),
            events_tx: self.inner.events_tx.clone(),
            cmd_tx,
            event_loop_handle: Arc::new(Mutex::new(None)),
            timer_settings: self.inner.config.timer_settings,
        });

        self.inner.clients.insert(key.clone(), data.clone());
        let inner = self.inner.clone();
        let loop_data = data.clone();
        let loop_key = key.clone();
        let handle = tokio::spawn(async move {
            logic::start(loop_data.clone()).await;
            logic::run_event_loop(behavior, loop_data, cmd_rx).await;
            inner.clients.remove(&loop_key);
        });
        *data.event_loop_handle.lock().await = Some(handle);

        Ok(key)
    }

    async fn create_server_transaction(&self, request: Request, remote: SocketAddr, protocol: Protocol, channel_id: Option<ChannelId>, connection_id: Option<ConnectionId>) -> Result<TransactionKey> {
        self.check_capacity()?;

        let behavior = if request.method.is_invite() { ServerBehavior::Invite } else { ServerBehavior::NonInvite };
        let key = TransactionKey::for_request(&request, true).ok_or_else(|| Error::NoSuchTransaction("request has no Via".into()))?;
        if self.inner.servers.contains_key(&key) {
            return Err(Error::DuplicateTransaction(key.to_string()));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let data = Arc::new(ServerTransactionData {
            id: key.clone(),
            state: Arc::new(AtomicTransactionState::new(behavior.kind(), behavior.initial_state())),
            request: Arc::new(Mutex::new(request)),
            last_response: Arc::new(Mutex::new(None)),
            remote_addr: remote,
            protocol,
            reliable: self.reliable_for(protocol),
            channel_id,
            connection_id,
            transport: self.inner.transport.clone(),
            events_tx: self.inner.events_tx.clone(),
            cmd_tx,
            event_loop_handle: Arc::new(Mutex::new(None)),
            timer_settings: self.inner.config.timer_settings,
        });

        self.inner.servers.insert(key.clone(), data.clone());
        let inner = self.inner.clone();
        let loop_data = data.clone();
        let loop_key = key.clone();
        let handle = tokio::spawn(async move {
            server_logic::run_event_loop(behavior, loop_data, cmd_rx).await;
            inner.servers.remove(&loop_key);
        });
        *data.event_loop_handle.lock().await = Some(handle);

        Ok(key)
    }

    /// Feed an inbound request through the matching algorithm (spec.md
    /// §4.5 "Matching"). Returns the request back as a [`StrayRequest`]
    /// when it was an ACK with no matching INVITE — the caller (typically
    /// a dialog layer, out of this engine's scope) decides what to do
    /// with it.
    pub async fn handle_inbound_request(&self, request: Request, remote: SocketAddr, protocol: Protocol, channel_id: Option<ChannelId>, connection_id: Option<ConnectionId>) -> Result<Option<StrayRequest>> {
        let Some(key) = TransactionKey::for_request(&request, true) else {
            return Ok(Some(StrayRequest { request, source: remote }));
        };

        if let Some(entry) = self.inner.servers.get(&key) {
            let _ = entry.cmd_tx.send(InternalTransactionCommand::ProcessRequest(request)).await;
            return Ok(None);
        }

        if request.method == Method::Ack {
            debug!(%key, "ACK matched no server transaction, surfacing as stray");
            return Ok(Some(StrayRequest { request, source: remote }));
        }

        if request.method == Method::Cancel {
            let invite_key = key.with_method(Method::Invite);
            if let Some(invite_entry) = self.inner.servers.get(&invite_key) {
                let invite_request = invite_entry.request.lock().await.clone();
                let terminated = build_response(&invite_request, StatusCode::REQUEST_TERMINATED);
                let _ = invite_entry.cmd_tx.send(InternalTransactionCommand::SendResponse(terminated)).await;

                let mut ok = build_response(&request, StatusCode::OK);
                let _ = self.inner.transport.send_response(&mut ok, remote, protocol, channel_id, connection_id).await;
            } else {
                let mut not_found = build_response(&request, StatusCode::new(481).expect("481 is a valid status code"));
                let _ = self.inner.transport.send_response(&mut not_found, remote, protocol, channel_id, connection_id).await;
            }
            return Ok(None);
        }

        self.create_server_transaction(request, remote, protocol, channel_id, connection_id).await?;
        Ok(None)
    }

    /// Feed an inbound response through client-side matching.
    pub async fn handle_inbound_response(&self, response: Response) {
        let Some(key) = TransactionKey::for_response(&response, false) else {
            debug!("response has no Via, dropping");
            return;
        };
        match self.inner.clients.get(&key) {
            Some(entry) => {
                let _ = entry.cmd_tx.send(InternalTransactionCommand::ProcessResponse(response)).await;
            }
            None => debug!(%key, "response matched no client transaction, dropping"),
        }
    }

    /// Ask a server transaction to send a response (spec.md §4.5 UAS state
    /// machines — the TU drives final/provisional responses through here
    /// rather than calling the transport directly, so retransmit timers
    /// stay consistent with the state machine).
    pub async fn send_response(&self, key: &TransactionKey, response: Response) -> Result<()> {
        let entry = self.inner.servers.get(key).ok_or_else(|| Error::NoSuchTransaction(key.to_string()))?;
        entry
            .cmd_tx
            .send(InternalTransactionCommand::SendResponse(response))
            .await
            .map_err(|_| Error::NoSuchTransaction(key.to_string()))
    }

    /// TU-initiated CANCEL of an in-flight client INVITE transaction.
    pub async fn cancel_client_transaction(&self, key: &TransactionKey, dst: SocketAddr, protocol: Protocol) -> Result<()> {
        let entry = self.inner.clients.get(key).ok_or_else(|| Error::NoSuchTransaction(key.to_string()))?;
        let invite = entry.request.lock().await.clone();
        let channel_id = entry.channel_id;
        drop(entry);
        let mut cancel = build_cancel(&invite);
        self.inner.transport.send_request(&mut cancel, Some(dst), protocol, channel_id, false).await?;
        Ok(())
    }
}
