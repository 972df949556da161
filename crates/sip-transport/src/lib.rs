//! # sip-transport
//!
//! Multi-channel SIP transport (C3/C4/C6): UDP/TCP/TLS/WebSocket channels
//! behind one [`Channel`] trait, a [`transport::Transport`] hub that picks
//! a channel for an outbound message and runs the receive pipeline for
//! inbound bytes, and the stateless header-rewriting/routing functions
//! applied on both sides.
//!
//! DNS resolution, dialog state, and certificate provisioning live outside
//! this crate — see [`resolver::Resolver`] for the capability this crate
//! consumes rather than implements.

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod resolver;
pub mod router;
pub mod transport;

pub use error::{Error, Result};

pub mod prelude {
    pub use crate::channel::{AddressFamily, Channel, ChannelEvent};
    pub use crate::config::TransportConfig;
    pub use crate::error::{Error, Result};
    pub use crate::events::{ListenerRegistry, StunHook, TraceEvent, TraceListener, TransportEvent};
    pub use crate::resolver::{AsyncLookup, CacheLookup, Resolver, StaticResolver};
    pub use crate::router::{RequestHeaderHook, ResponseHeaderHook};
    pub use crate::transport::Transport;
}
