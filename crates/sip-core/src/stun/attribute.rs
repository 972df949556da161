//! STUN attribute type/value codec (RFC 5389 §15, RFC 5766/6156 TURN
//! extensions, RFC 8445 ICE extensions). Grounded on the attribute table in
//! `ice_core::stun`, but attribute types are plain `u16` newtypes rather
//! than a `#[repr(u16)]` enum carrying a data variant — `#[repr(u16)]`
//! only controls the discriminant of unit-only enums, so a `Other(u16)`
//! variant on such an enum does not do what it looks like it does.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::Error;

use super::message::{MAGIC_COOKIE, TransactionId};

/// A known or unknown STUN attribute type (RFC 5389 §18.2 and TURN/ICE
/// extensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeType(pub u16);

impl AttributeType {
    pub const MAPPED_ADDRESS: AttributeType = AttributeType(0x0001);
    pub const USERNAME: AttributeType = AttributeType(0x0006);
    pub const MESSAGE_INTEGRITY: AttributeType = AttributeType(0x0008);
    pub const ERROR_CODE: AttributeType = AttributeType(0x0009);
    pub const UNKNOWN_ATTRIBUTES: AttributeType = AttributeType(0x000A);
    pub const REALM: AttributeType = AttributeType(0x0014);
    pub const NONCE: AttributeType = AttributeType(0x0015);
    pub const XOR_MAPPED_ADDRESS: AttributeType = AttributeType(0x0020);
    pub const SOFTWARE: AttributeType = AttributeType(0x8022);
    pub const FINGERPRINT: AttributeType = AttributeType(0x8028);
    pub const PRIORITY: AttributeType = AttributeType(0x0024);
    pub const USE_CANDIDATE: AttributeType = AttributeType(0x0025);
    pub const ICE_CONTROLLED: AttributeType = AttributeType(0x8029);
    pub const ICE_CONTROLLING: AttributeType = AttributeType(0x802A);
    // TURN (RFC 5766 / 6156).
    pub const CHANNEL_NUMBER: AttributeType = AttributeType(0x000C);
    pub const LIFETIME: AttributeType = AttributeType(0x000D);
    pub const XOR_PEER_ADDRESS: AttributeType = AttributeType(0x0012);
    pub const DATA: AttributeType = AttributeType(0x0013);
    pub const XOR_RELAYED_ADDRESS: AttributeType = AttributeType(0x0016);
    pub const REQUESTED_TRANSPORT: AttributeType = AttributeType(0x0019);

    /// Attributes above this threshold can be ignored by a receiver that
    /// doesn't understand them without failing the whole message (RFC 5389
    /// §15).
    pub fn is_comprehension_optional(self) -> bool {
        self.0 >= 0x8000
    }
}

impl From<u16> for AttributeType {
    fn from(v: u16) -> Self {
        AttributeType(v)
    }
}

impl From<AttributeType> for u16 {
    fn from(t: AttributeType) -> Self {
        t.0
    }
}

/// A decoded STUN attribute. Attributes whose semantics we don't need are
/// kept as raw bytes under [`Attribute::Other`] so the message can still be
/// forwarded or re-fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    MappedAddress(SocketAddr),
    XorMappedAddress(SocketAddr),
    XorRelayedAddress(SocketAddr),
    XorPeerAddress(SocketAddr),
    Username(String),
    Realm(String),
    Nonce(String),
    Software(String),
    ErrorCode { code: u16, reason: String },
    MessageIntegrity([u8; 20]),
    Fingerprint(u32),
    Priority(u32),
    UseCandidate,
    IceControlled(u64),
    IceControlling(u64),
    ChannelNumber(u16),
    Lifetime(u32),
    RequestedTransport(u8),
    Other(AttributeType, Bytes),
}

impl Attribute {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            Attribute::MappedAddress(_) => AttributeType::MAPPED_ADDRESS,
            Attribute::XorMappedAddress(_) => AttributeType::XOR_MAPPED_ADDRESS,
            Attribute::XorRelayedAddress(_) => AttributeType::XOR_RELAYED_ADDRESS,
            Attribute::XorPeerAddress(_) => AttributeType::XOR_PEER_ADDRESS,
            Attribute::Username(_) => AttributeType::USERNAME,
            Attribute::Realm(_) => AttributeType::REALM,
            Attribute::Nonce(_) => AttributeType::NONCE,
            Attribute::Software(_) => AttributeType::SOFTWARE,
            Attribute::ErrorCode { .. } => AttributeType::ERROR_CODE,
            Attribute::MessageIntegrity(_) => AttributeType::MESSAGE_INTEGRITY,
            Attribute::Fingerprint(_) => AttributeType::FINGERPRINT,
            Attribute::Priority(_) => AttributeType::PRIORITY,
            Attribute::UseCandidate => AttributeType::USE_CANDIDATE,
            Attribute::IceControlled(_) => AttributeType::ICE_CONTROLLED,
            Attribute::IceControlling(_) => AttributeType::ICE_CONTROLLING,
            Attribute::ChannelNumber(_) => AttributeType::CHANNEL_NUMBER,
            Attribute::Lifetime(_) => AttributeType::LIFETIME,
            Attribute::RequestedTransport(_) => AttributeType::REQUESTED_TRANSPORT,
            Attribute::Other(t, _) => *t,
        }
    }

    pub(super) fn decode(
        attr_type: AttributeType,
        value: &[u8],
        transaction_id: &TransactionId,
    ) -> Result<Attribute, Error> {
        Ok(match attr_type {
            AttributeType::MAPPED_ADDRESS => Attribute::MappedAddress(decode_address(value)?),
            AttributeType::XOR_MAPPED_ADDRESS => {
                Attribute::XorMappedAddress(decode_xor_address(value, transaction_id)?)
            }
            AttributeType::XOR_RELAYED_ADDRESS => {
                Attribute::XorRelayedAddress(decode_xor_address(value, transaction_id)?)
            }
            AttributeType::XOR_PEER_ADDRESS => {
                Attribute::XorPeerAddress(decode_xor_address(value, transaction_id)?)
            }
            AttributeType::USERNAME => Attribute::Username(decode_utf8(value)?),
            AttributeType::REALM => Attribute::Realm(decode_utf8(value)?),
            AttributeType::NONCE => Attribute::Nonce(decode_utf8(value)?),
            AttributeType::SOFTWARE => Attribute::Software(decode_utf8(value)?),
            AttributeType::ERROR_CODE => {
                if value.len() < 4 {
                    return Err(Error::Stun("ERROR-CODE too short".into()));
                }
                let class = value[2] as u16;
                let number = value[3] as u16;
                let code = class * 100 + number;
                let reason = decode_utf8(&value[4..])?;
                Attribute::ErrorCode { code, reason }
            }
            AttributeType::MESSAGE_INTEGRITY => {
                if value.len() != 20 {
                    return Err(Error::Stun("MESSAGE-INTEGRITY must be 20 bytes".into()));
                }
                let mut buf = [0u8; 20];
                buf.copy_from_slice(value);
                Attribute::MessageIntegrity(buf)
            }
            AttributeType::FINGERPRINT => {
                if value.len() != 4 {
                    return Err(Error::Stun("FINGERPRINT must be 4 bytes".into()));
                }
                Attribute::Fingerprint(u32::from_be_bytes(value.try_into().unwrap()))
            }
            AttributeType::PRIORITY => {
                Attribute::Priority(u32::from_be_bytes(value.try_into().map_err(|_| Error::Stun("bad PRIORITY".into()))?))
            }
            AttributeType::USE_CANDIDATE => Attribute::UseCandidate,
            AttributeType::ICE_CONTROLLED => {
                Attribute::IceControlled(u64::from_be_bytes(value.try_into().map_err(|_| Error::Stun("bad ICE-CONTROLLED".into()))?))
            }
            AttributeType::ICE_CONTROLLING => {
                Attribute::IceControlling(u64::from_be_bytes(value.try_into().map_err(|_| Error::Stun("bad ICE-CONTROLLING".into()))?))
            }
            AttributeType::CHANNEL_NUMBER => {
                if value.len() < 2 {
                    return Err(Error::Stun("CHANNEL-NUMBER too short".into()));
                }
                Attribute::ChannelNumber(u16::from_be_bytes([value[0], value[1]]))
            }
            AttributeType::LIFETIME => {
                Attribute::Lifetime(u32::from_be_bytes(value.try_into().map_err(|_| Error::Stun("bad LIFETIME".into()))?))
            }
            AttributeType::REQUESTED_TRANSPORT => {
                if value.is_empty() {
                    return Err(Error::Stun("REQUESTED-TRANSPORT too short".into()));
                }
                Attribute::RequestedTransport(value[0])
            }
            other => Attribute::Other(other, Bytes::copy_from_slice(value)),
        })
    }

    pub(super) fn encode_value(&self, transaction_id: &TransactionId, buf: &mut BytesMut) {
        match self {
            Attribute::MappedAddress(addr) => encode_address(*addr, buf),
            Attribute::XorMappedAddress(addr) => encode_xor_address(*addr, transaction_id, buf),
            Attribute::XorRelayedAddress(addr) => encode_xor_address(*addr, transaction_id, buf),
            Attribute::XorPeerAddress(addr) => encode_xor_address(*addr, transaction_id, buf),
            Attribute::Username(s) | Attribute::Realm(s) | Attribute::Nonce(s) | Attribute::Software(s) => {
                buf.put_slice(s.as_bytes());
            }
            Attribute::ErrorCode { code, reason } => {
                buf.put_u16(0);
                buf.put_u8((*code / 100) as u8);
                buf.put_u8((*code % 100) as u8);
                buf.put_slice(reason.as_bytes());
            }
            Attribute::MessageIntegrity(mac) => buf.put_slice(mac),
            Attribute::Fingerprint(crc) => buf.put_u32(*crc),
            Attribute::Priority(p) => buf.put_u32(*p),
            Attribute::UseCandidate => {}
            Attribute::IceControlled(tie) | Attribute::IceControlling(tie) => buf.put_u64(*tie),
            Attribute::ChannelNumber(n) => {
                buf.put_u16(*n);
                buf.put_u16(0);
            }
            Attribute::Lifetime(secs) => buf.put_u32(*secs),
            Attribute::RequestedTransport(proto) => {
                buf.put_u8(*proto);
                buf.put_slice(&[0u8; 3]);
            }
            Attribute::Other(_, data) => buf.put_slice(data),
        }
    }
}

fn decode_utf8(value: &[u8]) -> Result<String, Error> {
    std::str::from_utf8(value)
        .map(|s| s.to_string())
        .map_err(|e| Error::Stun(format!("invalid UTF-8 attribute value: {e}")))
}

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

fn decode_address(value: &[u8]) -> Result<SocketAddr, Error> {
    let mut buf = value;
    if buf.remaining() < 4 {
        return Err(Error::Stun("address attribute too short".into()));
    }
    let _reserved = buf.get_u8();
    let family = buf.get_u8();
    let port = buf.get_u16();
    let ip = match family {
        FAMILY_IPV4 => {
            if buf.remaining() < 4 {
                return Err(Error::Stun("truncated IPv4 address".into()));
            }
            IpAddr::V4(Ipv4Addr::new(buf.get_u8(), buf.get_u8(), buf.get_u8(), buf.get_u8()))
        }
        FAMILY_IPV6 => {
            if buf.remaining() < 16 {
                return Err(Error::Stun("truncated IPv6 address".into()));
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => return Err(Error::Stun(format!("unknown address family {other}"))),
    };
    Ok(SocketAddr::new(ip, port))
}

fn encode_address(addr: SocketAddr, buf: &mut BytesMut) {
    buf.put_u8(0);
    match addr {
        SocketAddr::V4(a) => {
            buf.put_u8(FAMILY_IPV4);
            buf.put_u16(a.port());
            buf.put_slice(&a.ip().octets());
        }
        SocketAddr::V6(a) => {
            buf.put_u8(FAMILY_IPV6);
            buf.put_u16(a.port());
            buf.put_slice(&a.ip().octets());
        }
    }
}

/// XOR-MAPPED-ADDRESS (RFC 5389 §15.2): the port and address are XORed with
/// the magic cookie (and, for IPv6, the transaction ID too) so that
/// middleboxes rewriting plain MAPPED-ADDRESS payloads can't also mangle
/// this one.
fn decode_xor_address(value: &[u8], transaction_id: &TransactionId) -> Result<SocketAddr, Error> {
    let mut buf = value;
    if buf.remaining() < 4 {
        return Err(Error::Stun("xor-address attribute too short".into()));
    }
    let _reserved = buf.get_u8();
    let family = buf.get_u8();
    let xport = buf.get_u16();
    let port = xport ^ ((MAGIC_COOKIE >> 16) as u16);
    let ip = match family {
        FAMILY_IPV4 => {
            if buf.remaining() < 4 {
                return Err(Error::Stun("truncated IPv4 xor-address".into()));
            }
            let xaddr = buf.get_u32();
            IpAddr::V4(Ipv4Addr::from(xaddr ^ MAGIC_COOKIE))
        }
        FAMILY_IPV6 => {
            if buf.remaining() < 16 {
                return Err(Error::Stun("truncated IPv6 xor-address".into()));
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            let mut pad = [0u8; 16];
            pad[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
            pad[4..].copy_from_slice(&transaction_id.0);
            for (o, p) in octets.iter_mut().zip(pad.iter()) {
                *o ^= p;
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => return Err(Error::Stun(format!("unknown address family {other}"))),
    };
    Ok(SocketAddr::new(ip, port))
}

fn encode_xor_address(addr: SocketAddr, transaction_id: &TransactionId, buf: &mut BytesMut) {
    buf.put_u8(0);
    let xport = addr.port() ^ ((MAGIC_COOKIE >> 16) as u16);
    match addr {
        SocketAddr::V4(a) => {
            buf.put_u8(FAMILY_IPV4);
            buf.put_u16(xport);
            let xaddr = u32::from(*a.ip()) ^ MAGIC_COOKIE;
            buf.put_u32(xaddr);
        }
        SocketAddr::V6(a) => {
            buf.put_u8(FAMILY_IPV6);
            buf.put_u16(xport);
            let mut pad = [0u8; 16];
            pad[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
            pad[4..].copy_from_slice(&transaction_id.0);
            let octets = a.ip().octets();
            let mut out = [0u8; 16];
            for i in 0..16 {
                out[i] = octets[i] ^ pad[i];
            }
            buf.put_slice(&out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_mapped_address_round_trips_ipv4() {
        let tid = TransactionId([7u8; 12]);
        let addr: SocketAddr = "203.0.113.5:54321".parse().unwrap();
        let mut buf = BytesMut::new();
        encode_xor_address(addr, &tid, &mut buf);
        let decoded = decode_xor_address(&buf, &tid).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn xor_mapped_address_round_trips_ipv6() {
        let tid = TransactionId([9u8; 12]);
        let addr: SocketAddr = "[2001:db8::1]:4242".parse().unwrap();
        let mut buf = BytesMut::new();
        encode_xor_address(addr, &tid, &mut buf);
        let decoded = decode_xor_address(&buf, &tid).unwrap();
        assert_eq!(decoded, addr);
    }
}
