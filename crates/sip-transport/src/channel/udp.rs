//! UDP channel: connectionless, `connection_id_hint` ignored (spec.md §4.3
//! "UDP"). Grounded on `UdpTransport`/`UdpListener`/`UdpSender`: an
//! `Arc<Inner>` holding the socket, an `AtomicBool` closed flag, and a
//! spawned receive loop that forwards datagrams to the owning transport.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use sip_core::framing::frame_datagram;
use sip_core::types::{ChannelId, ConnectionId, Protocol};

use crate::channel::{Channel, ChannelEvent};
use crate::error::{Error, Result};

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

struct Inner {
    socket: UdpSocket,
    closed: AtomicBool,
    local_addr: SocketAddr,
    events_tx: mpsc::Sender<ChannelEvent>,
}

/// UDP channel for SIP messages. One datagram is at most one SIP message
/// (spec.md §4.1 "Datagram"); boundary detection is just a size check.
#[derive(Clone)]
pub struct UdpChannel {
    id: ChannelId,
    inner: Arc<Inner>,
}

impl UdpChannel {
    pub async fn bind(id: ChannelId, addr: SocketAddr, events_tx: mpsc::Sender<ChannelEvent>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        debug!(%local_addr, "UDP channel bound");
        let channel = UdpChannel {
            id,
            inner: Arc::new(Inner {
                socket,
                closed: AtomicBool::new(false),
                local_addr,
                events_tx,
            }),
        };
        channel.spawn_receive_loop();
        Ok(channel)
    }

    fn spawn_receive_loop(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            while !inner.closed.load(Ordering::Relaxed) {
                match inner.socket.recv_from(&mut buf).await {
                    Ok((len, remote)) => {
                        let datagram = match frame_datagram(&buf[..len], MAX_DATAGRAM_SIZE) {
                            Ok(d) => d,
                            Err(e) => {
                                warn!(%remote, error = %e, "oversize UDP datagram dropped");
                                continue;
                            }
                        };
                        let event = ChannelEvent::MessageReceived {
                            local: inner.local_addr,
                            remote,
                            bytes: Bytes::copy_from_slice(datagram),
                            connection_id: None,
                        };
                        if inner.events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!(error = %e, "UDP recv error");
                        let _ = inner
                            .events_tx
                            .send(ChannelEvent::Error { detail: e.to_string() })
                            .await;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Channel for UdpChannel {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    fn listening_endpoints(&self) -> Vec<SocketAddr> {
        vec![self.inner.local_addr]
    }

    async fn send(
        &self,
        dst: SocketAddr,
        bytes: Bytes,
        _can_initiate_connection: bool,
        _connection_id_hint: Option<ConnectionId>,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ShuttingDown);
        }
        self.inner.socket.send_to(&bytes, dst).await?;
        Ok(())
    }

    async fn close(&self, reason: &str) {
        debug!(reason, "closing UDP channel");
        self.inner.closed.store(true, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn sends_and_receives_a_datagram() {
        let (tx_a, _rx_a) = crate::channel::channel_event_pair();
        let (tx_b, mut rx_b) = crate::channel::channel_event_pair();
        let a = UdpChannel::bind(ChannelId(1), "127.0.0.1:0".parse().unwrap(), tx_a).await.unwrap();
        let b = UdpChannel::bind(ChannelId(2), "127.0.0.1:0".parse().unwrap(), tx_b).await.unwrap();
        let b_addr = b.listening_endpoints()[0];

        a.send(b_addr, Bytes::from_static(b"ping"), false, None).await.unwrap();

        let event = rx_b.recv().await.unwrap();
        match event {
            ChannelEvent::MessageReceived { bytes, .. } => assert_eq!(&bytes[..], b"ping"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
