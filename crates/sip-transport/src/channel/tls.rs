//! TLS channel: the same connection-pool shape as [`super::tcp`], but each
//! connection is wrapped in a TLS session. The listening side uses the
//! server certificate handed to [`TlsChannel::bind`]; the connecting side
//! performs standard certificate validation against the `rustls::ClientConfig`
//! supplied at construction (spec.md §4.3 "TLS uses the provided server
//! certificate when listening and does standard certificate validation
//! when connecting").

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rustls::{ClientConfig, ServerConfig, ServerName};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, error, warn};

use sip_core::framing::StreamFramer;
use sip_core::types::{ChannelId, ConnectionId, Protocol};

use crate::channel::{Channel, ChannelEvent};
use crate::error::{Error, Result};

/// Object-safe union of the two `tokio_rustls` stream types so the
/// connection pool can treat inbound and outbound TLS sessions uniformly.
trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

struct Connection {
    id: ConnectionId,
    write_half: Mutex<WriteHalf<Box<dyn AsyncStream>>>,
}

struct Inner {
    local_addr: SocketAddr,
    closed: AtomicBool,
    events_tx: mpsc::Sender<ChannelEvent>,
    connections: DashMap<SocketAddr, Arc<Connection>>,
    next_connection_id: AtomicU64,
    max_message_size: usize,
    connect_timeout: Duration,
    client_config: Arc<ClientConfig>,
}

#[derive(Clone)]
pub struct TlsChannel {
    id: ChannelId,
    inner: Arc<Inner>,
}

impl TlsChannel {
    pub async fn bind(
        id: ChannelId,
        addr: SocketAddr,
        server_config: Arc<ServerConfig>,
        client_config: Arc<ClientConfig>,
        events_tx: mpsc::Sender<ChannelEvent>,
        max_message_size: usize,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "TLS channel listening");
        let channel = TlsChannel {
            id,
            inner: Arc::new(Inner {
                local_addr,
                closed: AtomicBool::new(false),
                events_tx,
                connections: DashMap::new(),
                next_connection_id: AtomicU64::new(1),
                max_message_size,
                connect_timeout,
                client_config,
            }),
        };
        channel.spawn_accept_loop(listener, TlsAcceptor::from(server_config));
        Ok(channel)
    }

    fn spawn_accept_loop(&self, listener: TcpListener, acceptor: TlsAcceptor) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while !inner.closed.load(Ordering::Relaxed) {
                let (tcp, remote) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!(error = %e, "TLS accept error");
                        continue;
                    }
                };
                if let Err(e) = tcp.set_linger(Some(Duration::ZERO)) {
                    warn!(error = %e, "failed to set SO_LINGER=0 on TLS stream");
                }
                match acceptor.accept(tcp).await {
                    Ok(tls) => {
                        Self::adopt_connection(inner.clone(), Box::new(tls), remote);
                    }
                    Err(e) => warn!(%remote, error = %e, "TLS handshake failed"),
                }
            }
        });
    }

    fn adopt_connection(inner: Arc<Inner>, stream: Box<dyn AsyncStream>, remote: SocketAddr) -> Arc<Connection> {
        let connection_id = ConnectionId(inner.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (mut read_half, write_half): (ReadHalf<Box<dyn AsyncStream>>, WriteHalf<Box<dyn AsyncStream>>) =
            tokio::io::split(stream);
        let connection = Arc::new(Connection {
            id: connection_id,
            write_half: Mutex::new(write_half),
        });
        inner.connections.insert(remote, connection.clone());

        let inner_for_read = inner.clone();
        tokio::spawn(async move {
            let mut framer = StreamFramer::new(inner_for_read.max_message_size);
            let mut buf = [0u8; 8192];
            loop {
                let n = match read_half.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!(%remote, error = %e, "TLS read error");
                        break;
                    }
                };
                framer.feed(&buf[..n]);
                match framer.drain_messages() {
                    Ok(messages) => {
                        for msg in messages {
                            let event = ChannelEvent::MessageReceived {
                                local: inner_for_read.local_addr,
                                remote,
                                bytes: msg,
                                connection_id: Some(connection_id),
                            };
                            if inner_for_read.events_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(%remote, error = %e, "oversize TLS message, dropping connection");
                        break;
                    }
                }
            }
            inner_for_read.connections.remove(&remote);
            let _ = inner_for_read
                .events_tx
                .send(ChannelEvent::ConnectionClosed { remote, connection_id })
                .await;
        });

        connection
    }

    async fn connect(inner: Arc<Inner>, dst: SocketAddr, connect_timeout: Duration) -> Result<Arc<Connection>> {
        let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(dst))
            .await
            .map_err(|_| Error::OperationAborted)??;
        let _ = tcp.set_linger(Some(Duration::ZERO));
        let connector = TlsConnector::from(inner.client_config.clone());
        let server_name = ServerName::IpAddress(dst.ip());
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        Ok(Self::adopt_connection(inner, Box::new(tls), dst))
    }
}

#[async_trait]
impl Channel for TlsChannel {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tls
    }

    fn listening_endpoints(&self) -> Vec<SocketAddr> {
        vec![self.inner.local_addr]
    }

    async fn send(
        &self,
        dst: SocketAddr,
        bytes: Bytes,
        can_initiate_connection: bool,
        connection_id_hint: Option<ConnectionId>,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ShuttingDown);
        }

        let existing = self
            .inner
            .connections
            .get(&dst)
            .map(|c| c.clone())
            .filter(|c| connection_id_hint.map_or(true, |hint| hint == c.id));

        let connection = match existing {
            Some(c) => c,
            None if can_initiate_connection => {
                Self::connect(self.inner.clone(), dst, self.inner.connect_timeout).await?
            }
            None => return Err(Error::NotConnected),
        };

        let mut guard = connection.write_half.lock().await;
        guard.write_all(&bytes).await?;
        Ok(())
    }

    async fn close(&self, reason: &str) {
        debug!(reason, "closing TLS channel");
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.connections.clear();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}
