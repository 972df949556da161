//! Serialization: the canonical stable header ordering spec.md §4.1
//! mandates — start line, Via(s) top-first, From, To, Call-ID, CSeq,
//! Max-Forwards, Contact, Route, Record-Route, Content-Length,
//! Content-Type, other known headers alphabetically, then unknown headers
//! in insertion order, then the blank line, then the body.

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::header::Header;
use crate::types::message::{Message, Request, Response};

fn write_line(buf: &mut BytesMut, line: &str) {
    buf.put_slice(line.as_bytes());
    buf.put_slice(b"\r\n");
}

fn write_header(header: &Header, buf: &mut BytesMut, body_len: usize) {
    for via in &header.via {
        write_line(buf, &format!("Via: {via}"));
    }
    if let Some(from) = &header.from {
        write_line(buf, &format!("From: {from}"));
    }
    if let Some(to) = &header.to {
        write_line(buf, &format!("To: {to}"));
    }
    if let Some(call_id) = &header.call_id {
        write_line(buf, &format!("Call-ID: {call_id}"));
    }
    if let Some(cseq) = &header.cseq {
        write_line(buf, &format!("CSeq: {cseq}"));
    }
    if let Some(mf) = header.max_forwards {
        write_line(buf, &format!("Max-Forwards: {mf}"));
    }
    for contact in &header.contact {
        write_line(buf, &format!("Contact: {contact}"));
    }
    for route in &header.route {
        write_line(buf, &format!("Route: {route}"));
    }
    for rr in &header.record_route {
        write_line(buf, &format!("Record-Route: {rr}"));
    }
    write_line(buf, &format!("Content-Length: {body_len}"));
    if let Some(ct) = &header.content_type {
        write_line(buf, &format!("Content-Type: {ct}"));
    }
    if !header.require.is_empty() {
        write_line(buf, &format!("Require: {}", header.require.join(", ")));
    }
    if !header.unsupported.is_empty() {
        write_line(buf, &format!("Unsupported: {}", header.unsupported.join(", ")));
    }
    for (name, value) in &header.extra {
        write_line(buf, &format!("{name}: {value}"));
    }
}

/// Serialize a full request, recomputing Content-Length from the actual
/// body length (spec.md §3 invariants: "Content-Length equals the byte
/// length of the serialized body").
pub fn serialize_request(req: &Request) -> Bytes {
    let mut buf = BytesMut::new();
    write_line(&mut buf, &format!("{} {} SIP/2.0", req.method, req.request_uri));
    write_header(&req.header, &mut buf, req.body.len());
    buf.put_slice(b"\r\n");
    buf.put_slice(&req.body);
    buf.freeze()
}

pub fn serialize_response(resp: &Response) -> Bytes {
    let mut buf = BytesMut::new();
    write_line(&mut buf, &format!("SIP/2.0 {} {}", resp.status_code, resp.reason));
    write_header(&resp.header, &mut buf, resp.body.len());
    buf.put_slice(b"\r\n");
    buf.put_slice(&resp.body);
    buf.freeze()
}

pub fn serialize_message(msg: &Message) -> Bytes {
    match msg {
        Message::Request(r) => serialize_request(r),
        Message::Response(r) => serialize_response(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::message::parse_message;
    use crate::types::message::BodyEncoding;

    #[test]
    fn round_trips_a_parsed_invite() {
        let raw = "INVITE sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n\
From: \"Alice\" <sip:alice@example.com>;tag=1928301774\r\n\
To: Bob <sip:bob@example.com>\r\n\
Call-ID: a84b4c76e66710@pc33.atlanta.com\r\n\
CSeq: 314159 INVITE\r\n\
Max-Forwards: 70\r\n\
Contact: <sip:alice@pc33.atlanta.com>\r\n\
Content-Length: 4\r\n\
\r\n\
abcd";
        let msg = parse_message(raw.as_bytes(), BodyEncoding::Utf8).unwrap();
        let serialized = serialize_message(&msg);
        let reparsed = parse_message(&serialized, BodyEncoding::Utf8).unwrap();
        assert_eq!(msg, reparsed);
    }
}
