//! Minimal STUN (RFC 5389) codec used by the transport layer to demultiplex
//! STUN binding requests arriving on the same socket as SIP traffic
//! (spec.md §4.2 "Embedded STUN demultiplexing"). This is not a full
//! ICE/TURN agent: it only encodes and decodes enough of the wire format
//! for a transport to answer a Binding request or recognize that a
//! datagram isn't a STUN message at all.

pub mod attribute;
pub mod message;

pub use attribute::{Attribute, AttributeType};
pub use message::{Header, Message, MessageClass, Method, TransactionId, MAGIC_COOKIE};
