//! TCP channel: a pool of established connections keyed by remote endpoint
//! (spec.md §4.3 "TCP/TLS"). A new connection is opened on demand only
//! when `can_initiate_connection=true`. Sockets are opened with
//! `SO_LINGER=0` so a closed socket doesn't tie up the port in TIME_WAIT
//! (spec.md §4.3, with the TIME_WAIT caveat from spec.md §9 left
//! undocumented-workaround, as directed).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use sip_core::framing::StreamFramer;
use sip_core::types::{ChannelId, ConnectionId, Protocol};

use crate::channel::{Channel, ChannelEvent};
use crate::error::{Error, Result};

struct Connection {
    id: ConnectionId,
    write_half: Mutex<tokio::net::tcp::OwnedWriteHalf>,
}

struct Inner {
    local_addr: SocketAddr,
    closed: AtomicBool,
    events_tx: mpsc::Sender<ChannelEvent>,
    connections: DashMap<SocketAddr, Arc<Connection>>,
    next_connection_id: AtomicU64,
    max_message_size: usize,
    connect_timeout: Duration,
}

/// TCP channel for SIP messages.
#[derive(Clone)]
pub struct TcpChannel {
    id: ChannelId,
    inner: Arc<Inner>,
}

fn disable_linger(stream: &TcpStream) {
    if let Err(e) = stream.set_linger(Some(Duration::ZERO)) {
        warn!(error = %e, "failed to set SO_LINGER=0 on TCP stream");
    }
}

impl TcpChannel {
    pub async fn bind(
        id: ChannelId,
        addr: SocketAddr,
        events_tx: mpsc::Sender<ChannelEvent>,
        max_message_size: usize,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "TCP channel listening");
        let channel = TcpChannel {
            id,
            inner: Arc::new(Inner {
                local_addr,
                closed: AtomicBool::new(false),
                events_tx,
                connections: DashMap::new(),
                next_connection_id: AtomicU64::new(1),
                max_message_size,
                connect_timeout,
            }),
        };
        channel.spawn_accept_loop(listener);
        Ok(channel)
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while !inner.closed.load(Ordering::Relaxed) {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        disable_linger(&stream);
                        Self::adopt_connection(inner.clone(), stream, remote);
                    }
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!(error = %e, "TCP accept error");
                    }
                }
            }
        });
    }

    fn adopt_connection(inner: Arc<Inner>, stream: TcpStream, remote: SocketAddr) -> Arc<Connection> {
        let connection_id = ConnectionId(inner.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (mut read_half, write_half) = stream.into_split();
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
                        warn!(%remote, error = %e, "TCP read error");
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
                        warn!(%remote, error = %e, "oversize TCP message, dropping connection");
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
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(dst))
            .await
            .map_err(|_| Error::OperationAborted)??;
        disable_linger(&stream);
        Ok(Self::adopt_connection(inner, stream, dst))
    }
}

#[async_trait]
impl Channel for TcpChannel {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tcp
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

        let existing = self.inner.connections.get(&dst).map(|c| c.clone()).filter(|c| {
            connection_id_hint.is_none_or_eq(c.id)
        });

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
        debug!(reason, "closing TCP channel");
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.connections.clear();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

trait OptionConnectionIdExt {
    fn is_none_or_eq(self, id: ConnectionId) -> bool;
}

impl OptionConnectionIdExt for Option<ConnectionId> {
    fn is_none_or_eq(self, id: ConnectionId) -> bool {
        match self {
            None => true,
            Some(hint) => hint == id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_core::framing::DEFAULT_MAX_MESSAGE_SIZE;
    use serial_test::serial;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    #[serial]
    async fn delivers_ten_fragmented_requests_over_one_connection() {
        let (tx, mut rx) = crate::channel::channel_event_pair();
        let server = TcpChannel::bind(
            ChannelId(1),
            "127.0.0.1:0".parse().unwrap(),
            tx,
            DEFAULT_MAX_MESSAGE_SIZE,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let addr = server.listening_endpoints()[0];

        let mut client = TcpStream::connect(addr).await.unwrap();
        for i in 0..10 {
            let msg = format!(
                "OPTIONS sip:bob@example.com SIP/2.0\r\nVia: SIP/2.0/TCP h;branch=z9hG4bK{i}\r\nContent-Length: 0\r\n\r\n"
            );
            client.write_all(msg.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let mut received = 0;
        while received < 10 {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(ChannelEvent::MessageReceived { .. })) => received += 1,
                Ok(Some(_)) => {}
                _ => break,
            }
        }
        assert_eq!(received, 10);
    }
}
