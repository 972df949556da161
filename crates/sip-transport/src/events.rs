//! Events surfaced to higher layers (spec.md §6 "Event surface") and the
//! registration-list extension points spec.md §9 calls for ("Event-based
//! extension points" — model the original's multicast event fields as
//! registration lists of listener capabilities, invoked from a snapshot").

use std::net::SocketAddr;
use std::sync::Arc;

use sip_core::types::{Message, Request, Response};

/// A message delivered to the transaction engine / TU.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    RequestReceived {
        local: SocketAddr,
        remote: SocketAddr,
        request: Box<Request>,
    },
    ResponseReceived {
        local: SocketAddr,
        remote: SocketAddr,
        response: Box<Response>,
    },
}

impl TransportEvent {
    pub fn from_message(local: SocketAddr, remote: SocketAddr, message: Message) -> Self {
        match message {
            Message::Request(r) => TransportEvent::RequestReceived {
                local,
                remote,
                request: Box::new(r),
            },
            Message::Response(r) => TransportEvent::ResponseReceived {
                local,
                remote,
                response: Box::new(r),
            },
        }
    }
}

/// Diagnostic trace events (spec.md §6): request-in/out, response-in/out,
/// bad-request/response, and retransmit notices.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    RequestIn { local: SocketAddr, remote: SocketAddr, summary: String },
    RequestOut { local: SocketAddr, remote: SocketAddr, summary: String },
    ResponseIn { local: SocketAddr, remote: SocketAddr, summary: String },
    ResponseOut { local: SocketAddr, remote: SocketAddr, summary: String },
    BadRequest { remote: SocketAddr, detail: String },
    BadResponse { remote: SocketAddr, detail: String },
    RequestRetransmit { remote: SocketAddr, summary: String },
    ResponseRetransmit { remote: SocketAddr, summary: String },
}

/// A registered STUN hook, invoked with `(local, remote, raw_bytes)` for
/// any datagram the transport's demultiplexer classifies as STUN (spec.md
/// §4.2 "Delivery").
pub type StunHook = Arc<dyn Fn(SocketAddr, SocketAddr, bytes::Bytes) + Send + Sync>;

/// A registered trace listener.
pub type TraceListener = Arc<dyn Fn(&TraceEvent) + Send + Sync>;

/// Snapshot-on-invoke registration list (spec.md §9): listeners are
/// appended under a write lock and the whole list is cloned out from under
/// a read lock before iterating, so a listener can never observe another
/// listener being added mid-dispatch.
#[derive(Default)]
pub struct ListenerRegistry<T: Clone> {
    listeners: parking_lot::RwLock<Vec<T>>,
}

impl<T: Clone> ListenerRegistry<T> {
    pub fn new() -> Self {
        ListenerRegistry {
            listeners: parking_lot::RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, listener: T) {
        self.listeners.write().push(listener);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.listeners.read().clone()
    }
}
