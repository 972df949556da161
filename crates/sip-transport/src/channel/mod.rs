//! Per-transport endpoint management (spec.md §4.3). Four implementors
//! behind one object-safe trait, following the `UdpTransport` /
//! `UdpListener` / `UdpSender` split the teacher uses for its single UDP
//! implementation, generalized to TCP/TLS/WS.

#[cfg(feature = "tcp")]
pub mod tcp;
#[cfg(feature = "tls")]
pub mod tls;
pub mod udp;
#[cfg(feature = "ws")]
pub mod ws;

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use sip_core::types::{ChannelId, ConnectionId, Protocol};

use crate::error::Result;

/// IPv4 vs IPv6, for the outbound channel selection algorithm (spec.md
/// §4.4 step 1: "no channel exists matching p and dst.family").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: SocketAddr) -> Self {
        if addr.is_ipv6() {
            AddressFamily::V6
        } else {
            AddressFamily::V4
        }
    }
}

/// An event a channel surfaces to the owning [`crate::transport::Transport`]
/// (spec.md §4.3 "an event: message_received").
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    MessageReceived {
        local: SocketAddr,
        remote: SocketAddr,
        bytes: Bytes,
        connection_id: Option<ConnectionId>,
    },
    ConnectionClosed {
        remote: SocketAddr,
        connection_id: ConnectionId,
    },
    Error {
        detail: String,
    },
}

/// The common channel contract (spec.md §4.3 "Common contract").
#[async_trait]
pub trait Channel: Send + Sync {
    fn channel_id(&self) -> ChannelId;

    fn protocol(&self) -> Protocol;

    /// The local endpoint(s) this channel is bound to. A wildcard bind
    /// enumerates the machine's local addresses (spec.md §4.3, and the
    /// open question in spec.md §9 about `IPAddress.Any` bindings: we
    /// compare against all machine-local addresses rather than a single
    /// narrow host check).
    fn listening_endpoints(&self) -> Vec<SocketAddr>;

    fn is_wildcard_bound(&self) -> bool {
        self.listening_endpoints().iter().any(|a| a.ip().is_unspecified())
    }

    fn supports_protocol(&self, p: Protocol) -> bool {
        self.protocol() == p
    }

    fn supports_address_family(&self, af: AddressFamily) -> bool {
        self.listening_endpoints().iter().any(|a| AddressFamily::of(*a) == af)
            || self.is_wildcard_bound()
    }

    async fn send(
        &self,
        dst: SocketAddr,
        bytes: Bytes,
        can_initiate_connection: bool,
        connection_id_hint: Option<ConnectionId>,
    ) -> Result<()>;

    async fn close(&self, reason: &str);

    fn is_closed(&self) -> bool;
}

pub(crate) const DEFAULT_CHANNEL_EVENT_CAPACITY: usize = 256;

pub(crate) fn channel_event_pair() -> (mpsc::Sender<ChannelEvent>, mpsc::Receiver<ChannelEvent>) {
    mpsc::channel(DEFAULT_CHANNEL_EVENT_CAPACITY)
}
