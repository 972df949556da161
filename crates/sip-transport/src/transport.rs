//! The transport hub (C4, spec.md §4.4): the channel set, the inbound work
//! queue and its single-consumer worker, outbound channel selection, and
//! the receive pipeline that turns raw bytes into a dispatched
//! [`TransportEvent`] or a trace.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};

use sip_core::stun;
use sip_core::types::{
    BodyEncoding, ChannelId, ConnectionId, CSeq, Message, Method, Protocol, Request, Response, StatusCode, Uri,
};

use crate::channel::udp::UdpChannel;
#[cfg(feature = "tcp")]
use crate::channel::tcp::TcpChannel;
#[cfg(feature = "tls")]
use crate::channel::tls::TlsChannel;
#[cfg(feature = "ws")]
use crate::channel::ws::WsChannel;
use crate::channel::{self, AddressFamily, Channel, ChannelEvent};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::events::{ListenerRegistry, StunHook, TraceEvent, TraceListener, TransportEvent};
use crate::resolver::{AsyncLookup, CacheLookup, Resolver};
use crate::router::{self, RequestHeaderHook, ResponseHeaderHook};

/// An item handed from a channel's receive task to the single inbound
/// worker (spec.md §5 "one single-consumer inbound worker").
struct InboundItem {
    channel_id: ChannelId,
    local: SocketAddr,
    remote: SocketAddr,
    bytes: Bytes,
    connection_id: Option<ConnectionId>,
}

/// If the OS has no route-table introspection available, this is our best
/// approximation of outbound channel selection steps 5/6 (spec.md §4.4):
/// open an unconnected UDP socket, `connect` it toward `dst` without
/// sending anything, and ask the kernel which local address it would use.
fn preferred_local_ip(dst: IpAddr) -> Option<IpAddr> {
    let bind_addr: SocketAddr = if dst.is_ipv4() { "0.0.0.0:0".parse().unwrap() } else { "[::]:0".parse().unwrap() };
    let socket = std::net::UdpSocket::bind(bind_addr).ok()?;
    socket.connect(SocketAddr::new(dst, 9)).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

struct Inner {
    config: TransportConfig,
    channels: DashMap<ChannelId, Arc<dyn Channel>>,
    next_channel_id: AtomicU64,
    resolver: Arc<dyn Resolver>,
    inbound_tx: mpsc::Sender<InboundItem>,
    events_tx: mpsc::Sender<TransportEvent>,
    stun_hooks: ListenerRegistry<StunHook>,
    trace_listeners: ListenerRegistry<TraceListener>,
    request_hook: RwLock<Option<RequestHeaderHook>>,
    response_hook: RwLock<Option<ResponseHeaderHook>>,
    shutdown_tx: watch::Sender<bool>,
}

/// The multi-channel SIP transport. Cheap to clone; clones share the same
/// channel set and inbound pipeline.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Treat `0.0.0.0` / `::` as the blackhole destination (spec.md §4.4).
fn is_blackhole(addr: SocketAddr) -> bool {
    addr.ip().is_unspecified()
}

/// The inbound queue capacity substituted for the "0 means unlimited"
/// config knob (spec.md §6): a bounded channel sized generously rather
/// than a genuinely unbounded one, so a stalled consumer still bounds
/// memory growth.
const UNLIMITED_QUEUE_SUBSTITUTE: usize = 65_536;

impl Transport {
    pub fn new(config: TransportConfig, resolver: Arc<dyn Resolver>) -> (Self, mpsc::Receiver<TransportEvent>) {
        let capacity = if config.max_in_message_queue == 0 {
            UNLIMITED_QUEUE_SUBSTITUTE
        } else {
            config.max_in_message_queue
        };
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            config,
            channels: DashMap::new(),
            next_channel_id: AtomicU64::new(1),
            resolver,
            inbound_tx,
            events_tx,
            stun_hooks: ListenerRegistry::new(),
            trace_listeners: ListenerRegistry::new(),
            request_hook: RwLock::new(None),
            response_hook: RwLock::new(None),
            shutdown_tx,
        });

        spawn_inbound_worker(inner.clone(), inbound_rx, shutdown_rx);
        (Transport { inner }, events_rx)
    }

    pub fn register_stun_hook(&self, hook: StunHook) {
        self.inner.stun_hooks.register(hook);
    }

    pub fn register_trace_listener(&self, listener: TraceListener) {
        self.inner.trace_listeners.register(listener);
    }

    pub async fn set_request_hook(&self, hook: Option<RequestHeaderHook>) {
        *self.inner.request_hook.write().await = hook;
    }

    pub async fn set_response_hook(&self, hook: Option<ResponseHeaderHook>) {
        *self.inner.response_hook.write().await = hook;
    }

    /// The local endpoint a previously bound channel is listening on, for
    /// callers (and tests) that only have the `ChannelId` `bind_*` returned.
    pub fn channel_local_addr(&self, id: ChannelId) -> Option<SocketAddr> {
        self.inner.channels.get(&id)?.listening_endpoints().into_iter().next()
    }

    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        for entry in self.inner.channels.iter() {
            let channel = entry.value().clone();
            tokio::spawn(async move { channel.close("transport shutting down").await });
        }
    }

    fn next_channel_id(&self) -> ChannelId {
        ChannelId(self.inner.next_channel_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register_channel(&self, id: ChannelId, channel: Arc<dyn Channel>, rx: mpsc::Receiver<ChannelEvent>) {
        self.inner.channels.insert(id, channel);
        spawn_forwarder(self.inner.clone(), id, rx);
    }

    pub async fn bind_udp(&self, addr: SocketAddr) -> Result<ChannelId> {
        let id = self.next_channel_id();
        let (tx, rx) = channel::channel_event_pair();
        let ch = UdpChannel::bind(id, addr, tx).await?;
        self.register_channel(id, Arc::new(ch), rx);
        debug!(%addr, channel = id.0, "registered UDP channel");
        Ok(id)
    }

    #[cfg(feature = "tcp")]
    pub async fn bind_tcp(&self, addr: SocketAddr) -> Result<ChannelId> {
        let id = self.next_channel_id();
        let (tx, rx) = channel::channel_event_pair();
        let ch = TcpChannel::bind(id, addr, tx, self.inner.config.max_message_size, self.inner.config.connect_timeout).await?;
        self.register_channel(id, Arc::new(ch), rx);
        debug!(%addr, channel = id.0, "registered TCP channel");
        Ok(id)
    }

    #[cfg(feature = "tls")]
    pub async fn bind_tls(
        &self,
        addr: SocketAddr,
        server_config: Arc<rustls::ServerConfig>,
        client_config: Arc<rustls::ClientConfig>,
    ) -> Result<ChannelId> {
        let id = self.next_channel_id();
        let (tx, rx) = channel::channel_event_pair();
        let ch = TlsChannel::bind(
            id,
            addr,
            server_config,
            client_config,
            tx,
            self.inner.config.max_message_size,
            self.inner.config.connect_timeout,
        )
        .await?;
        self.register_channel(id, Arc::new(ch), rx);
        debug!(%addr, channel = id.0, "registered TLS channel");
        Ok(id)
    }

    #[cfg(feature = "ws")]
    pub async fn bind_ws(&self, addr: SocketAddr) -> Result<ChannelId> {
        let id = self.next_channel_id();
        let (tx, rx) = channel::channel_event_pair();
        let ch = WsChannel::bind(id, addr, tx).await?;
        self.register_channel(id, Arc::new(ch), rx);
        debug!(%addr, channel = id.0, "registered WS channel");
        Ok(id)
    }

    /// Outbound channel selection (spec.md §4.4, 7-step fallback).
    fn select_channel(
        &self,
        protocol: Protocol,
        dst: SocketAddr,
        channel_id_hint: Option<ChannelId>,
    ) -> Option<Arc<dyn Channel>> {
        let family = AddressFamily::of(dst);
        let matching: Vec<Arc<dyn Channel>> = self
            .inner
            .channels
            .iter()
            .filter(|e| e.value().supports_protocol(protocol) && e.value().supports_address_family(family))
            .map(|e| e.value().clone())
            .collect();
        if matching.is_empty() {
            return None;
        }

        if let Some(hint) = channel_id_hint {
            if let Some(c) = matching.iter().find(|c| c.channel_id() == hint) {
                return Some(c.clone());
            }
        }
        if let Some(c) = matching.iter().find(|c| c.is_wildcard_bound()) {
            return Some(c.clone());
        }
        if let Some(c) = matching.iter().find(|c| c.listening_endpoints().iter().any(|a| a.ip() == dst.ip())) {
            return Some(c.clone());
        }
        if let Some(local_ip) = preferred_local_ip(dst.ip()) {
            if let Some(c) = matching.iter().find(|c| c.listening_endpoints().iter().any(|a| a.ip() == local_ip)) {
                return Some(c.clone());
            }
        }
        matching.into_iter().next()
    }

    async fn ensure_channel(&self, protocol: Protocol, dst: SocketAddr, is_for_response: bool) -> Result<()> {
        let family = AddressFamily::of(dst);
        let exists = self
            .inner
            .channels
            .iter()
            .any(|e| e.value().supports_protocol(protocol) && e.value().supports_address_family(family));
        if exists {
            return Ok(());
        }
        if is_for_response || !self.inner.config.can_create_missing_channels {
            return Err(Error::NoChannelAvailable { protocol, addr: dst });
        }
        match protocol {
            Protocol::Udp => {
                let bind_addr: SocketAddr = if family == AddressFamily::V4 {
                    "0.0.0.0:0".parse().unwrap()
                } else {
                    "[::]:0".parse().unwrap()
                };
                self.bind_udp(bind_addr).await?;
                Ok(())
            }
            other => Err(Error::NoChannelAvailable { protocol: other, addr: dst }),
        }
    }

    async fn resolve_destination(&self, uri: &Uri, wait_for_dns: bool) -> Result<SocketAddr> {
        let prefer_v6 = self.inner.config.prefer_ipv6_name_resolution;
        match self.inner.resolver.resolve_from_cache(uri, prefer_v6) {
            CacheLookup::Found(addr) => Ok(addr),
            CacheLookup::Empty => Err(Error::HostNotFound(uri.host.to_string())),
            CacheLookup::None if wait_for_dns => {
                let (_cancel_tx, cancel_rx) = watch::channel(false);
                match self.inner.resolver.resolve_async(uri, prefer_v6, cancel_rx).await {
                    AsyncLookup::Found(addr) => Ok(addr),
                    AsyncLookup::Empty => Err(Error::HostNotFound(uri.host.to_string())),
                }
            }
            CacheLookup::None => {
                let resolver = self.inner.resolver.clone();
                let uri = uri.clone();
                let (_cancel_tx, cancel_rx) = watch::channel(false);
                tokio::spawn(async move {
                    let _ = resolver.resolve_async(&uri, prefer_v6, cancel_rx).await;
                });
                Err(Error::InProgress)
            }
        }
    }

    /// Send a request, resolving `request_uri` if `dst` is not given.
    pub async fn send_request(
        &self,
        req: &mut Request,
        dst: Option<SocketAddr>,
        protocol: Protocol,
        channel_id_hint: Option<ChannelId>,
        wait_for_dns: bool,
    ) -> Result<()> {
        let dst = match dst {
            Some(d) => d,
            None => self.resolve_destination(&req.request_uri, wait_for_dns).await?,
        };
        if is_blackhole(dst) {
            return Ok(());
        }

        self.ensure_channel(protocol, dst, false).await?;
        let channel = self
            .select_channel(protocol, dst, channel_id_hint)
            .ok_or(Error::NoChannelAvailable { protocol, addr: dst })?;
        let local = channel
            .listening_endpoints()
            .into_iter()
            .next()
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0));

        let hook = self.inner.request_hook.read().await.clone();
        router::prepare_outbound_request(req, local, dst, protocol, self.inner.config.contact_host.as_deref(), hook.as_ref());

        self.emit_trace(TraceEvent::RequestOut {
            local,
            remote: dst,
            summary: format!("{} {}", req.method, req.request_uri),
        });

        let bytes = sip_core::codec::serialize_request(req);
        channel.send(dst, bytes, true, None).await
    }

    /// Send a response back to `dst` (no DNS resolution — responses are
    /// routed back along the path the request arrived on).
    pub async fn send_response(
        &self,
        resp: &mut Response,
        dst: SocketAddr,
        protocol: Protocol,
        channel_id_hint: Option<ChannelId>,
        connection_id_hint: Option<ConnectionId>,
    ) -> Result<()> {
        if is_blackhole(dst) {
            return Ok(());
        }
        let channel = self
            .select_channel(protocol, dst, channel_id_hint)
            .ok_or(Error::NoChannelAvailable { protocol, addr: dst })?;
        let local = channel
            .listening_endpoints()
            .into_iter()
            .next()
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0));

        let hook = self.inner.response_hook.read().await.clone();
        router::prepare_outbound_response(resp, local, dst, protocol, self.inner.config.contact_host.as_deref(), hook.as_ref());

        self.emit_trace(TraceEvent::ResponseOut {
            local,
            remote: dst,
            summary: format!("{} {}", resp.status_code, resp.reason),
        });

        let bytes = sip_core::codec::serialize_response(resp);
        channel.send(dst, bytes, false, connection_id_hint).await
    }

    fn emit_trace(&self, event: TraceEvent) {
        for listener in self.inner.trace_listeners.snapshot() {
            listener(&event);
        }
    }
}

fn spawn_forwarder(inner: Arc<Inner>, channel_id: ChannelId, mut rx: mpsc::Receiver<ChannelEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ChannelEvent::MessageReceived { local, remote, bytes, connection_id } => {
                    let item = InboundItem { channel_id, local, remote, bytes, connection_id };
                    if inner.inbound_tx.try_send(item).is_err() {
                        warn!(channel = channel_id.0, "inbound queue full, dropping datagram");
                    }
                }
                ChannelEvent::ConnectionClosed { remote, connection_id } => {
                    debug!(channel = channel_id.0, %remote, connection = connection_id.0, "connection closed");
                }
                ChannelEvent::Error { detail } => {
                    warn!(channel = channel_id.0, detail, "channel error");
                }
            }
        }
    });
}

fn spawn_inbound_worker(inner: Arc<Inner>, mut rx: mpsc::Receiver<InboundItem>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                item = rx.recv() => {
                    match item {
                        Some(item) => process_inbound(&inner, item).await,
                        None => break,
                    }
                }
            }
        }
    });
}

/// The six-step receive pipeline (spec.md §4.4 "Receive pipeline").
async fn process_inbound(inner: &Arc<Inner>, item: InboundItem) {
    let InboundItem { channel_id, local, remote, bytes, connection_id } = item;

    // Step 1: STUN demultiplex.
    if stun::Message::looks_like_stun(&bytes) {
        for hook in inner.stun_hooks.snapshot() {
            hook(local, remote, bytes.clone());
        }
        return;
    }

    // Step 2: size check.
    if bytes.len() > inner.config.max_message_size {
        warn!(%remote, len = bytes.len(), "oversize message dropped before parse");
        emit_trace_static(inner, TraceEvent::BadRequest { remote, detail: "message exceeds configured maximum size".into() });
        if looks_like_request(&bytes) {
            reply_with_stock_status(inner, channel_id, connection_id, remote, StatusCode::RequestEntityTooLarge).await;
        }
        return;
    }

    // Step 3: empty / ping detection.
    if sip_core::parser::is_ping_body(&bytes) {
        return;
    }

    // Step 4: cheap heuristic before a full parse.
    let head = &bytes[..bytes.len().min(64)];
    if !head.windows(3).any(|w| w == b"SIP") {
        emit_trace_static(inner, TraceEvent::BadRequest { remote, detail: "payload does not look like SIP".into() });
        return;
    }

    // Step 5: parse.
    let message = match sip_core::parser::parse_message(&bytes, BodyEncoding::Utf8) {
        Ok(m) => m,
        Err(e) => {
            warn!(%remote, error = %e, "failed to parse inbound message");
            let status = e.status_code();
            emit_trace_static(inner, TraceEvent::BadRequest { remote, detail: e.to_string() });
            if looks_like_request(&bytes) {
                reply_with_stock_status(inner, channel_id, connection_id, remote, status).await;
            }
            return;
        }
    };

    let mut message = message;
    if let Message::Request(req) = &mut message {
        router::preprocess_route(req, |uri| {
            let uri_host = uri.host.to_string();
            inner.channels.iter().any(|e| {
                let c = e.value();
                c.is_wildcard_bound() || c.listening_endpoints().iter().any(|a| a.ip().to_string() == uri_host)
            })
        });
    }

    // Protocol-policy rejections (spec.md §7), checked after parse, before dispatch.
    if let Message::Request(req) = &message {
        if req.method != Method::Options && req.header.max_forwards == Some(0) {
            emit_trace_static(inner, TraceEvent::BadRequest { remote, detail: "Max-Forwards reached zero".into() });
            reply_to_request(inner, channel_id, connection_id, remote, req, StatusCode::TooManyHops).await;
            return;
        }
        if !req.header.require.is_empty() {
            emit_trace_static(inner, TraceEvent::BadRequest { remote, detail: format!("unsupported Require: {}", req.header.require.join(", ")) });
            let mut resp = build_error_response(req, StatusCode::BadExtension);
            resp.header.unsupported = req.header.require.clone();
            send_response_via(inner, channel_id, connection_id, remote, &mut resp).await;
            return;
        }
    }

    match &message {
        Message::Request(r) => emit_trace_static(inner, TraceEvent::RequestIn { local, remote, summary: format!("{} {}", r.method, r.request_uri) }),
        Message::Response(r) => emit_trace_static(inner, TraceEvent::ResponseIn { local, remote, summary: format!("{} {}", r.status_code, r.reason) }),
    }

    // Step 6: dispatch up to the consumer (transaction engine / TU).
    let event = TransportEvent::from_message(local, remote, message);
    if inner.events_tx.send(event).await.is_err() {
        debug!("no consumer for transport events, dropping");
    }
}

fn emit_trace_static(inner: &Arc<Inner>, event: TraceEvent) {
    for listener in inner.trace_listeners.snapshot() {
        listener(&event);
    }
}

/// Cheap request-vs-response discrimination for messages too broken (or too
/// large) to fully parse: a status line starts with the SIP version token,
/// a request line never does (spec.md §7 "if a request, return an error
/// response").
fn looks_like_request(bytes: &[u8]) -> bool {
    !bytes.starts_with(b"SIP/2.0")
}

/// A stock error response echoing the request's dialog-identifying headers,
/// grounded the same way as `sip_transaction::builders::build_response`
/// (duplicated here since `sip-transport` can't depend on `sip-transaction`
/// to reuse it directly).
fn build_error_response(request: &Request, status: StatusCode) -> Response {
    let mut resp = Response::from_status(status);
    resp.header.call_id = request.header.call_id.clone();
    resp.header.from = request.header.from.clone();
    resp.header.to = request.header.to.clone();
    resp.header.via = request.header.via.clone();
    resp.header.cseq = Some(CSeq {
        seq: request.header.cseq.as_ref().map(|c| c.seq).unwrap_or(1),
        method: request.method.clone(),
    });
    resp
}

/// Send a bare status-code response back to `remote` when the inbound bytes
/// didn't parse far enough to build a proper echoed response (oversize, or
/// a parse failure too broken to recover a `Request`).
async fn reply_with_stock_status(
    inner: &Arc<Inner>,
    channel_id: ChannelId,
    connection_id: Option<ConnectionId>,
    remote: SocketAddr,
    status: StatusCode,
) {
    let mut resp = Response::from_status(status);
    send_response_via(inner, channel_id, connection_id, remote, &mut resp).await;
}

async fn reply_to_request(
    inner: &Arc<Inner>,
    channel_id: ChannelId,
    connection_id: Option<ConnectionId>,
    remote: SocketAddr,
    request: &Request,
    status: StatusCode,
) {
    let mut resp = build_error_response(request, status);
    send_response_via(inner, channel_id, connection_id, remote, &mut resp).await;
}

async fn send_response_via(
    inner: &Arc<Inner>,
    channel_id: ChannelId,
    connection_id: Option<ConnectionId>,
    remote: SocketAddr,
    resp: &mut Response,
) {
    let protocol = inner.channels.get(&channel_id).map(|c| c.protocol()).unwrap_or(Protocol::Udp);
    let transport = Transport { inner: inner.clone() };
    if let Err(e) = transport.send_response(resp, remote, protocol, Some(channel_id), connection_id).await {
        warn!(%remote, error = %e, "failed to send error response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use sip_core::types::{Method, Uri};
    use std::time::Duration;

    fn resolver() -> Arc<StaticResolver> {
        Arc::new(StaticResolver::new())
    }

    #[tokio::test]
    async fn blackhole_destination_succeeds_without_a_channel() {
        let (transport, _events) = Transport::new(TransportConfig::default(), resolver());
        let mut req = Request::new(Method::Options, Uri::sip("0.0.0.0"));
        let dst: SocketAddr = "0.0.0.0:5060".parse().unwrap();
        transport.send_request(&mut req, Some(dst), Protocol::Udp, None, false).await.unwrap();
    }

    #[tokio::test]
    async fn round_trips_a_request_through_two_udp_transports() {
        let (a, _events_a) = Transport::new(TransportConfig::default(), resolver());
        let (b, mut events_b) = Transport::new(TransportConfig::default(), resolver());
        a.bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_id = b.bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.channel_local_addr(b_id).unwrap();

        let mut req = Request::new(Method::Options, Uri::sip("bob.example"));
        req.header.call_id = Some("call-1".into());
        transport_test_send(&a, &mut req, b_addr).await;

        let event = tokio::time::timeout(Duration::from_secs(2), events_b.recv()).await.unwrap().unwrap();
        match event {
            TransportEvent::RequestReceived { request, .. } => assert_eq!(request.call_id(), Some("call-1")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    async fn transport_test_send(t: &Transport, req: &mut Request, dst: SocketAddr) {
        t.send_request(req, Some(dst), Protocol::Udp, None, false).await.unwrap();
    }

    #[tokio::test]
    async fn inbound_queue_drops_newest_message_when_full() {
        let mut config = TransportConfig::default();
        config.max_in_message_queue = 1;
        let (transport, _events) = Transport::new(config, resolver());
        let id = transport.bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = transport.channel_local_addr(id).unwrap();
        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for i in 0..20 {
            let msg = format!("OPTIONS sip:bob@example.com SIP/2.0\r\nVia: SIP/2.0/UDP h;branch=z9hG4bK{i}\r\nContent-Length: 0\r\n\r\n");
            sender.send_to(msg.as_bytes(), addr).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
