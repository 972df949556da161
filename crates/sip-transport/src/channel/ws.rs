//! WebSocket channel (spec.md §4.3 "WebSocket", RFC 7118): server-side
//! listens on a WS URL path; client-side initiates via `ws://`/`wss://`.
//! SIP messages are sent as single WebSocket TEXT messages. Fragmented WS
//! frames are reassembled by `tokio-tungstenite` before a complete
//! message reaches us, matching the crate's normal `Message::Text` API —
//! `sip_core::framing::WsFrameReassembler` exists for callers working at
//! the raw frame level, which this channel doesn't need to.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use sip_core::types::{ChannelId, ConnectionId, Protocol};

use crate::channel::{Channel, ChannelEvent};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, WsMessage>;

struct Connection {
    id: ConnectionId,
    sink: Mutex<WsSink>,
}

struct Inner {
    local_addr: SocketAddr,
    closed: AtomicBool,
    events_tx: mpsc::Sender<ChannelEvent>,
    connections: DashMap<SocketAddr, Arc<Connection>>,
    next_connection_id: AtomicU64,
}

#[derive(Clone)]
pub struct WsChannel {
    id: ChannelId,
    inner: Arc<Inner>,
}

impl WsChannel {
    pub async fn bind(id: ChannelId, addr: SocketAddr, events_tx: mpsc::Sender<ChannelEvent>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "WS channel listening");
        let channel = WsChannel {
            id,
            inner: Arc::new(Inner {
                local_addr,
                closed: AtomicBool::new(false),
                events_tx,
                connections: DashMap::new(),
                next_connection_id: AtomicU64::new(1),
            }),
        };
        channel.spawn_accept_loop(listener);
        Ok(channel)
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            while !inner.closed.load(Ordering::Relaxed) {
                let (tcp, remote) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!(error = %e, "WS accept error");
                        continue;
                    }
                };
                let inner = inner.clone();
                tokio::spawn(async move {
                    match tokio_tungstenite::accept_async(MaybeTlsStream::Plain(tcp)).await {
                        Ok(ws) => Self::adopt_connection(inner, ws, remote).await,
                        Err(e) => warn!(%remote, error = %e, "WS handshake failed"),
                    }
                });
            }
        });
    }

    async fn adopt_connection(inner: Arc<Inner>, ws: WsStream, remote: SocketAddr) {
        let connection_id = ConnectionId(inner.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (sink, mut stream) = ws.split();
        let connection = Arc::new(Connection {
            id: connection_id,
            sink: Mutex::new(sink),
        });
        inner.connections.insert(remote, connection);

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    let event = ChannelEvent::MessageReceived {
                        local: inner.local_addr,
                        remote,
                        bytes: Bytes::from(text.into_bytes()),
                        connection_id: Some(connection_id),
                    };
                    if inner.events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Binary(data)) => {
                    let event = ChannelEvent::MessageReceived {
                        local: inner.local_addr,
                        remote,
                        bytes: Bytes::from(data),
                        connection_id: Some(connection_id),
                    };
                    if inner.events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(%remote, error = %e, "WS read error");
                    break;
                }
            }
        }
        inner.connections.remove(&remote);
        let _ = inner
            .events_tx
            .send(ChannelEvent::ConnectionClosed { remote, connection_id })
            .await;
    }

    async fn connect(inner: Arc<Inner>, url: &str) -> Result<(SocketAddr, Arc<Connection>)> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let remote: SocketAddr = url
            .trim_start_matches("ws://")
            .trim_start_matches("wss://")
            .parse()
            .map_err(|_| Error::WebSocket(format!("cannot derive remote endpoint from {url}")))?;
        let connection_id = ConnectionId(inner.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (sink, mut stream) = ws.split();
        let connection = Arc::new(Connection {
            id: connection_id,
            sink: Mutex::new(sink),
        });
        inner.connections.insert(remote, connection.clone());

        let inner_for_read = inner.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        let event = ChannelEvent::MessageReceived {
                            local: inner_for_read.local_addr,
                            remote,
                            bytes: Bytes::from(text.into_bytes()),
                            connection_id: Some(connection_id),
                        };
                        if inner_for_read.events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Binary(data)) => {
                        let event = ChannelEvent::MessageReceived {
                            local: inner_for_read.local_addr,
                            remote,
                            bytes: Bytes::from(data),
                            connection_id: Some(connection_id),
                        };
                        if inner_for_read.events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            inner_for_read.connections.remove(&remote);
        });

        Ok((remote, connection))
    }
}

#[async_trait]
impl Channel for WsChannel {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    fn protocol(&self) -> Protocol {
        Protocol::Ws
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
                let url = format!("ws://{dst}/");
                let (_remote, conn) = Self::connect(self.inner.clone(), &url).await?;
                conn
            }
            None => return Err(Error::NotConnected),
        };

        let text = String::from_utf8_lossy(&bytes).into_owned();
        let mut guard = connection.sink.lock().await;
        guard
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        Ok(())
    }

    async fn close(&self, reason: &str) {
        debug!(reason, "closing WS channel");
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.connections.clear();
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
    async fn relays_a_large_round_trip_message() {
        let (tx_server, mut rx_server) = crate::channel::channel_event_pair();
        let server = WsChannel::bind(ChannelId(1), "127.0.0.1:0".parse().unwrap(), tx_server)
            .await
            .unwrap();
        let addr = server.listening_endpoints()[0];

        let (tx_client, _rx_client) = crate::channel::channel_event_pair();
        let client_inner = Arc::new(Inner {
            local_addr: "127.0.0.1:0".parse().unwrap(),
            closed: AtomicBool::new(false),
            events_tx: tx_client,
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        });
        let url = format!("ws://{addr}/");
        let (_remote, conn) = WsChannel::connect(client_inner, &url).await.unwrap();

        let random: String = "x".repeat(1000);
        let payload = format!(
            "OPTIONS sip:bob@example.com SIP/2.0\r\nX-Request-Random: {random}\r\nX-Request-Final: TheEnd\r\nContent-Length: 0\r\n\r\n"
        );
        conn.sink.lock().await.send(WsMessage::Text(payload)).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx_server.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ChannelEvent::MessageReceived { bytes, .. } => {
                let text = String::from_utf8_lossy(&bytes);
                assert!(text.contains("X-Request-Final: TheEnd"));
                assert!(text.contains(&random));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
