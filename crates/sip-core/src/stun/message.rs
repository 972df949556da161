//! STUN message framing (RFC 5389 §6): a 20-byte header followed by a
//! sequence of TLV attributes, each padded to a 4-byte boundary.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::Error;

use super::attribute::{Attribute, AttributeType};

/// Fixed magic cookie (RFC 5389 §6) distinguishing STUN from the STUN
/// Classic wire format and seeding the XOR transform on mapped addresses.
pub const MAGIC_COOKIE: u32 = 0x2112_A442;
const HEADER_LEN: usize = 20;
type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionId(pub [u8; 12]);

impl TransactionId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        TransactionId(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Request,
    Indication,
    SuccessResponse,
    ErrorResponse,
}

impl MessageClass {
    fn bits(self) -> u16 {
        match self {
            MessageClass::Request => 0b00,
            MessageClass::Indication => 0b01,
            MessageClass::SuccessResponse => 0b10,
            MessageClass::ErrorResponse => 0b11,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits {
            0b00 => MessageClass::Request,
            0b01 => MessageClass::Indication,
            0b10 => MessageClass::SuccessResponse,
            _ => MessageClass::ErrorResponse,
        }
    }
}

/// STUN method (the low 12 bits of the message type). Only the methods the
/// transport layer's demultiplexer and a bare-bones TURN client need are
/// named; anything else decodes to [`Method::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Binding,
    Allocate,
    Refresh,
    Send,
    Data,
    CreatePermission,
    ChannelBind,
    Other(u16),
}

impl Method {
    fn value(self) -> u16 {
        match self {
            Method::Binding => 0x001,
            Method::Allocate => 0x003,
            Method::Refresh => 0x004,
            Method::Send => 0x006,
            Method::Data => 0x007,
            Method::CreatePermission => 0x008,
            Method::ChannelBind => 0x009,
            Method::Other(v) => v,
        }
    }

    fn from_value(v: u16) -> Self {
        match v {
            0x001 => Method::Binding,
            0x003 => Method::Allocate,
            0x004 => Method::Refresh,
            0x006 => Method::Send,
            0x007 => Method::Data,
            0x008 => Method::CreatePermission,
            0x009 => Method::ChannelBind,
            other => Method::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub class: MessageClass,
    pub method: Method,
    pub transaction_id: TransactionId,
}

/// Split a 14-bit method/class value into the message type word (RFC 5389
/// §6: the class bits are interleaved into the method bits, not appended).
fn encode_message_type(class: MessageClass, method: Method) -> u16 {
    let m = method.value();
    let c = class.bits();
    let c0 = c & 0b1;
    let c1 = (c >> 1) & 0b1;
    (m & 0b1111) | (c0 << 4) | (((m >> 4) & 0b111) << 5) | (c1 << 8) | (((m >> 7) & 0b1_1111) << 9)
}

fn decode_message_type(raw: u16) -> (MessageClass, Method) {
    let c0 = (raw >> 4) & 0b1;
    let c1 = (raw >> 8) & 0b1;
    let class = MessageClass::from_bits((c1 << 1) | c0);
    let m_low = raw & 0b1111;
    let m_mid = (raw >> 5) & 0b111;
    let m_high = (raw >> 9) & 0b1_1111;
    let method = Method::from_value((m_high << 7) | (m_mid << 4) | m_low);
    (class, method)
}

/// A fully decoded STUN message: header plus ordered attribute list.
/// Attribute order is preserved so MESSAGE-INTEGRITY and FINGERPRINT (which
/// must be the last one or two attributes, RFC 5389 §15.4-15.5) can be
/// validated against the bytes that actually preceded them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub attributes: Vec<Attribute>,
}

impl Message {
    pub fn new(class: MessageClass, method: Method, transaction_id: TransactionId) -> Self {
        Message {
            header: Header {
                class,
                method,
                transaction_id,
            },
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn get(&self, attr_type: AttributeType) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attribute_type() == attr_type)
    }

    /// Heuristic demultiplexer used by the transport layer to decide
    /// whether an inbound datagram is STUN rather than SIP before parsing
    /// it as either (spec.md §4.2): the first two bits must be zero and the
    /// magic cookie must be present at the expected offset.
    pub fn looks_like_stun(buf: &[u8]) -> bool {
        if buf.len() < HEADER_LEN {
            return false;
        }
        let first_byte = buf[0];
        if first_byte & 0b1100_0000 != 0 {
            return false;
        }
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        cookie == MAGIC_COOKIE
    }

    /// Decode a complete STUN message. `buf` must contain exactly one
    /// message (the transport hands us one UDP datagram at a time).
    pub fn decode(buf: &[u8]) -> Result<Message, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Stun("message shorter than STUN header".into()));
        }
        let mut header_buf = &buf[..HEADER_LEN];
        let type_word = header_buf.get_u16();
        if type_word & 0b1100_0000_0000_0000 != 0 {
            return Err(Error::Stun("top two bits of STUN type must be zero".into()));
        }
        let length = header_buf.get_u16() as usize;
        let cookie = header_buf.get_u32();
        if cookie != MAGIC_COOKIE {
            return Err(Error::Stun("bad STUN magic cookie".into()));
        }
        let mut tid = [0u8; 12];
        header_buf.copy_to_slice(&mut tid);
        let transaction_id = TransactionId(tid);

        let body = &buf[HEADER_LEN..];
        if body.len() < length {
            return Err(Error::Stun("STUN message shorter than declared length".into()));
        }
        let (class, method) = decode_message_type(type_word);

        let mut attributes = Vec::new();
        let mut cursor = &body[..length];
        while cursor.remaining() >= 4 {
            let attr_type = AttributeType(cursor.get_u16());
            let attr_len = cursor.get_u16() as usize;
            if cursor.remaining() < attr_len {
                return Err(Error::Stun("truncated STUN attribute".into()));
            }
            let value = &cursor[..attr_len];
            attributes.push(Attribute::decode(attr_type, value, &transaction_id)?);
            let padded = pad4(attr_len);
            cursor.advance(padded);
        }

        Ok(Message {
            header: Header {
                class,
                method,
                transaction_id,
            },
            attributes,
        })
    }

    /// Encode without a MESSAGE-INTEGRITY/FINGERPRINT trailer.
    pub fn encode(&self) -> Bytes {
        self.encode_inner(None, false)
    }

    /// Encode, appending MESSAGE-INTEGRITY (HMAC-SHA1 over everything
    /// preceding it, keyed by `key`) and then FINGERPRINT (RFC 5389
    /// §15.4-15.5). The length field covers each trailer as it's added, per
    /// the "that attribute as well" wording in the RFC.
    pub fn encode_signed(&self, key: &[u8]) -> Bytes {
        self.encode_inner(Some(key), true)
    }

    fn encode_inner(&self, integrity_key: Option<&[u8]>, fingerprint: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 64);
        self.write_header_and_attributes(&mut buf, 0);

        if let Some(key) = integrity_key {
            let mic_len_with_self = (buf.len() - HEADER_LEN) + 24; // + type/len/value of MI attr
            set_length(&mut buf, mic_len_with_self as u16);
            let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(&buf);
            let tag = mac.finalize().into_bytes();
            let mut mic = [0u8; 20];
            mic.copy_from_slice(&tag);
            write_attribute(&mut buf, AttributeType::MESSAGE_INTEGRITY, &Attribute::MessageIntegrity(mic), &self.header.transaction_id);
        }

        if fingerprint {
            let fp_len_with_self = (buf.len() - HEADER_LEN) + 8;
            set_length(&mut buf, fp_len_with_self as u16);
            let crc = crc32(&buf) ^ 0x5354_554E;
            write_attribute(&mut buf, AttributeType::FINGERPRINT, &Attribute::Fingerprint(crc), &self.header.transaction_id);
        }

        let final_len = (buf.len() - HEADER_LEN) as u16;
        set_length(&mut buf, final_len);
        buf.freeze()
    }

    fn write_header_and_attributes(&self, buf: &mut BytesMut, placeholder_len: u16) {
        let type_word = encode_message_type(self.header.class, self.header.method);
        buf.put_u16(type_word);
        buf.put_u16(placeholder_len);
        buf.put_u32(MAGIC_COOKIE);
        buf.put_slice(&self.header.transaction_id.0);
        for attr in &self.attributes {
            write_attribute(buf, attr.attribute_type(), attr, &self.header.transaction_id);
        }
    }

    /// Verify a trailing MESSAGE-INTEGRITY attribute against `key`, over the
    /// raw bytes that produced this message (RFC 5389 §15.4). The caller
    /// must supply the original wire bytes since recomputation needs the
    /// length field as it stood when the MAC was taken.
    pub fn verify_integrity(raw: &[u8], key: &[u8]) -> Result<bool, Error> {
        let mic_pos = find_attribute_offset(raw, AttributeType::MESSAGE_INTEGRITY)?;
        let Some(pos) = mic_pos else { return Ok(false) };
        let mut prefix = BytesMut::from(&raw[..pos]);
        let covered_len = (pos - HEADER_LEN + 24) as u16;
        set_length(&mut prefix, covered_len);
        let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(&prefix);
        let expected = mac.finalize().into_bytes();
        let actual = &raw[pos + 4..pos + 24];
        Ok(expected.as_slice() == actual)
    }
}

fn find_attribute_offset(raw: &[u8], target: AttributeType) -> Result<Option<usize>, Error> {
    if raw.len() < HEADER_LEN {
        return Err(Error::Stun("message shorter than STUN header".into()));
    }
    let declared_len = u16::from_be_bytes([raw[2], raw[3]]) as usize;
    let mut offset = HEADER_LEN;
    let end = HEADER_LEN + declared_len.min(raw.len() - HEADER_LEN);
    while offset + 4 <= end {
        let attr_type = AttributeType(u16::from_be_bytes([raw[offset], raw[offset + 1]]));
        let attr_len = u16::from_be_bytes([raw[offset + 2], raw[offset + 3]]) as usize;
        if attr_type == target {
            return Ok(Some(offset));
        }
        offset += 4 + pad4(attr_len);
    }
    Ok(None)
}

fn write_attribute(buf: &mut BytesMut, attr_type: AttributeType, attr: &Attribute, transaction_id: &TransactionId) {
    buf.put_u16(attr_type.0);
    let len_pos = buf.len();
    buf.put_u16(0);
    let value_start = buf.len();
    attr.encode_value(transaction_id, buf);
    let value_len = buf.len() - value_start;
    buf[len_pos..len_pos + 2].copy_from_slice(&(value_len as u16).to_be_bytes());
    for _ in 0..pad4(value_len) - value_len {
        buf.put_u8(0);
    }
}

fn set_length(buf: &mut BytesMut, length: u16) {
    buf[2..4].copy_from_slice(&length.to_be_bytes());
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

fn crc32(data: &[u8]) -> u32 {
    const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    CRC.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn message_type_round_trips_for_known_methods() {
        for class in [
            MessageClass::Request,
            MessageClass::Indication,
            MessageClass::SuccessResponse,
            MessageClass::ErrorResponse,
        ] {
            let word = encode_message_type(class, Method::Binding);
            let (c, m) = decode_message_type(word);
            assert_eq!(c, class);
            assert_eq!(m, Method::Binding);
        }
    }

    #[test]
    fn binding_request_type_matches_rfc_constant() {
        assert_eq!(encode_message_type(MessageClass::Request, Method::Binding), 0x0001);
        assert_eq!(
            encode_message_type(MessageClass::SuccessResponse, Method::Binding),
            0x0101
        );
        assert_eq!(encode_message_type(MessageClass::ErrorResponse, Method::Binding), 0x0111);
    }

    #[test]
    fn encodes_and_decodes_binding_response_with_xor_mapped_address() {
        let tid = TransactionId::random();
        let addr: SocketAddr = "192.0.2.1:9999".parse().unwrap();
        let msg = Message::new(MessageClass::SuccessResponse, Method::Binding, tid)
            .with_attribute(Attribute::XorMappedAddress(addr));
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.header.class, MessageClass::SuccessResponse);
        assert_eq!(decoded.get(AttributeType::XOR_MAPPED_ADDRESS), Some(&Attribute::XorMappedAddress(addr)));
    }

    #[test]
    fn recognizes_stun_vs_non_stun_buffers() {
        let tid = TransactionId::random();
        let msg = Message::new(MessageClass::Request, Method::Binding, tid);
        let encoded = msg.encode();
        assert!(Message::looks_like_stun(&encoded));
        assert!(!Message::looks_like_stun(b"INVITE sip:bob@example.com SIP/2.0\r\n"));
    }

    #[test]
    fn signed_message_integrity_verifies() {
        let tid = TransactionId::random();
        let key = b"shared-secret";
        let msg = Message::new(MessageClass::Request, Method::Binding, tid)
            .with_attribute(Attribute::Username("alice".into()));
        let encoded = msg.encode_signed(key);
        assert!(Message::verify_integrity(&encoded, key).unwrap());
        assert!(!Message::verify_integrity(&encoded, b"wrong-key").unwrap());
    }
}
