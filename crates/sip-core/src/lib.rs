//! # sip-core
//!
//! Wire-level SIP message types, parsing, serialization, transport framing,
//! and an embedded STUN codec.
//!
//! This crate covers the parts of a SIP stack that are independent of any
//! particular transport or transaction state machine:
//!
//! - **Message types** ([`types`]): [`Request`], [`Response`], [`Message`],
//!   and the strongly-typed header fields a proxy or transaction layer
//!   needs to inspect (Via, Route/Record-Route, CSeq, branch parameters).
//! - **Parsing** ([`parser`]): a liberal-in text parser from raw bytes to
//!   [`Message`], tolerant of bare LF line endings and header folding.
//! - **Serialization** ([`codec`]): canonical, stable-ordered byte output.
//! - **Framing** ([`framing`]): per-transport message-boundary detection —
//!   one-shot for datagrams, `Content-Length`-delimited accumulation for
//!   streams, fragment reassembly for WebSocket.
//! - **STUN** ([`stun`]): just enough of RFC 5389 to demultiplex STUN
//!   traffic arriving on a SIP transport's socket and answer Binding
//!   requests.
//!
//! Nothing in this crate owns a socket or a timer; see `sip-transport` and
//! `sip-transaction` for those.

pub mod codec;
pub mod error;
pub mod framing;
pub mod parser;
pub mod stun;
pub mod types;

pub use error::{Error, Result};

/// Re-exports of the types most callers need, mirroring the flat import
/// style used throughout this workspace.
pub mod prelude {
    pub use crate::codec::{serialize_message, serialize_request, serialize_response};
    pub use crate::error::{Error, HeaderField, Result};
    pub use crate::framing::{DEFAULT_MAX_MESSAGE_SIZE, StreamFramer, WsFrameReassembler, frame_datagram};
    pub use crate::parser::{find_header_end, is_ping_body, parse_message};
    pub use crate::types::{
        BodyEncoding, CSeq, ChannelId, ConnectionId, Header, HeaderName, Message, Method, NameAddr,
        Param, Protocol, Request, Response, SipEndpoint, StatusCode, Uri, Via,
    };
    pub use crate::stun;
}
