use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// The transport protocols a channel or Via header may carry (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
            Protocol::Tls => "TLS",
            Protocol::Ws => "WS",
            Protocol::Wss => "WSS",
        }
    }

    /// Whether this protocol delivers messages reliably and in order,
    /// which determines retransmit suppression (spec.md §4.5 "Timers").
    pub fn is_reliable(&self) -> bool {
        !matches!(self, Protocol::Udp)
    }

    pub fn is_connection_oriented(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Tls | Protocol::Ws | Protocol::Wss)
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Protocol::Tls | Protocol::Wss)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "UDP" => Protocol::Udp,
            "TCP" => Protocol::Tcp,
            "TLS" => Protocol::Tls,
            "WS" => Protocol::Ws,
            "WSS" => Protocol::Wss,
            other => return Err(crate::error::Error::Other(format!("unknown transport {other}"))),
        })
    }
}

/// Opaque identifier for a local channel, assigned by the transport when
/// the channel is created (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

/// Opaque identifier for a single connection-oriented session on a channel
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// `{ protocol, address, port, channel_id?, connection_id? }` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SipEndpoint {
    pub protocol: Protocol,
    pub addr: SocketAddr,
    pub channel_id: Option<ChannelId>,
    pub connection_id: Option<ConnectionId>,
}

impl SipEndpoint {
    pub fn new(protocol: Protocol, addr: SocketAddr) -> Self {
        SipEndpoint {
            protocol,
            addr,
            channel_id: None,
            connection_id: None,
        }
    }

    pub fn with_channel(mut self, channel_id: ChannelId) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn with_connection(mut self, connection_id: ConnectionId) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The blackhole destination (spec.md §4.4): sends succeed silently
    /// without wire activity.
    pub fn is_blackhole(&self) -> bool {
        self.addr.ip().is_unspecified()
    }
}

impl fmt::Display for SipEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol, self.addr)
    }
}
