//! Whole-message parsing: split a byte buffer into a start line and header
//! block, unfold continuation lines, dispatch each header line to the
//! typed-field parser in [`crate::parser::headers`], and assemble the
//! [`Message`]. Grounded on `rvoip_sip_core`'s parser but restructured to
//! the text-first design spec.md §4.1 calls for (liberal in, strict out).

use bytes::Bytes;

use crate::error::{Error, HeaderField};
use crate::parser::headers as hparse;
use crate::types::header::Header;
use crate::types::header_name::HeaderName;
use crate::types::message::{Message, Request, Response};
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;

/// Unfold SIP header continuation lines (a line beginning with SP or HTAB
/// is a continuation of the previous line, RFC 3261 §7.3.1) and split on
/// bare or CRLF newlines, tolerating either per spec.md §4.1 "liberal in
/// what it accepts".
fn unfold_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.split("\r\n").flat_map(|s| s.split('\n')) {
        if (raw.starts_with(' ') || raw.starts_with('\t')) && !lines.is_empty() {
            let folded = lines.last_mut().unwrap();
            folded.push(' ');
            folded.push_str(raw.trim());
        } else {
            lines.push(raw.to_string());
        }
    }
    lines
}

/// Find the header/body boundary (CRLF-CRLF, tolerating a bare LF-LF).
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = find_subslice(buf, b"\r\n\r\n") {
        return Some(pos + 4);
    }
    find_subslice(buf, b"\n\n").map(|pos| pos + 2)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A body consisting only of CRLF (or LF), or nothing, is a NAT keep-alive
/// (spec.md §4.1 "Ping detection") and must be dropped silently by callers.
pub fn is_ping_body(body: &[u8]) -> bool {
    body.is_empty() || body.iter().all(|&b| b == b'\r' || b == b'\n')
}

enum StartLine {
    Request { method: Method, uri: Uri },
    Response { status: StatusCode, reason: String },
}

fn parse_start_line(line: &str) -> Result<StartLine, Error> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("SIP/2.0") {
        let rest = rest.trim();
        let (code, reason) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let code: u16 = code.parse().map_err(|_| Error::Validation {
            field: HeaderField::StartLine,
            status: StatusCode::BadRequest,
            detail: format!("invalid status code: {code}"),
        })?;
        let status = StatusCode::new(code).map_err(|_| Error::Validation {
            field: HeaderField::StartLine,
            status: StatusCode::BadRequest,
            detail: format!("status code out of range: {code}"),
        })?;
        Ok(StartLine::Response {
            status,
            reason: reason.trim().to_string(),
        })
    } else {
        let mut parts = line.splitn(3, char::is_whitespace);
        let method = parts.next().unwrap_or("").trim();
        let uri = parts.next().unwrap_or("").trim();
        let version = parts.next().unwrap_or("").trim();
        if method.is_empty() || uri.is_empty() {
            return Err(Error::Validation {
                field: HeaderField::StartLine,
                status: StatusCode::BadRequest,
                detail: format!("malformed start line: {line}"),
            });
        }
        if !version.is_empty() && !version.trim_start().starts_with("SIP/") {
            return Err(Error::Validation {
                field: HeaderField::StartLine,
                status: StatusCode::BadRequest,
                detail: format!("unsupported SIP version: {version}"),
            });
        }
        let method: Method = method
            .parse()
            .map_err(|_| Error::Validation {
                field: HeaderField::StartLine,
                status: StatusCode::BadRequest,
                detail: format!("invalid method: {method}"),
            })?;
        let uri = crate::parser::uri::parse_uri_complete(uri).map_err(|_| Error::Validation {
            field: HeaderField::StartLine,
            status: StatusCode::BadRequest,
            detail: format!("invalid request-uri: {uri}"),
        })?;
        Ok(StartLine::Request { method, uri })
    }
}

fn apply_header_line(header: &mut Header, raw: &str) -> Result<(), Error> {
    let (name, value) = raw.split_once(':').ok_or_else(|| Error::Validation {
        field: HeaderField::Unknown,
        status: StatusCode::BadRequest,
        detail: format!("malformed header line: {raw}"),
    })?;
    let name = HeaderName::parse(name.trim());
    let value = value.trim();

    match name {
        HeaderName::Via => {
            for part in hparse::split_comma_list(value) {
                header.via.push(hparse::parse_via(&part)?);
            }
        }
        HeaderName::From => header.from = Some(hparse::parse_name_addr(value, HeaderField::From)?),
        HeaderName::To => header.to = Some(hparse::parse_name_addr(value, HeaderField::To)?),
        HeaderName::CallId => header.call_id = Some(value.to_string()),
        HeaderName::CSeq => header.cseq = Some(hparse::parse_cseq(value)?),
        HeaderName::MaxForwards => {
            header.max_forwards = Some(value.parse().map_err(|_| Error::Validation {
                field: HeaderField::Unknown,
                status: StatusCode::BadRequest,
                detail: format!("invalid Max-Forwards: {value}"),
            })?)
        }
        HeaderName::Contact => {
            if value == "*" {
                // The special "Contact: *" form used by REGISTER (unbind all);
                // represented as an empty contact list for this header line.
            } else {
                for part in hparse::split_comma_list(value) {
                    header.contact.push(hparse::parse_name_addr(&part, HeaderField::Contact)?);
                }
            }
        }
        HeaderName::Route => {
            for part in hparse::split_comma_list(value) {
                header.route.push(hparse::parse_name_addr(&part, HeaderField::Route)?);
            }
        }
        HeaderName::RecordRoute => {
            for part in hparse::split_comma_list(value) {
                header
                    .record_route
                    .push(hparse::parse_name_addr(&part, HeaderField::Route)?);
            }
        }
        HeaderName::ContentLength => {
            header.content_length = Some(value.parse().map_err(|_| Error::Validation {
                field: HeaderField::ContentLength,
                status: StatusCode::BadRequest,
                detail: format!("invalid Content-Length: {value}"),
            })?)
        }
        HeaderName::ContentType => header.content_type = Some(value.to_string()),
        HeaderName::Require => header.require.extend(hparse::split_comma_list(value)),
        HeaderName::Unsupported => header.unsupported.extend(hparse::split_comma_list(value)),
        HeaderName::Other(name) => header.set_extra(name, value),
    }
    Ok(())
}

/// Decode the header block's bytes as text using the configured header
/// encoding (spec.md §3, §6).
fn decode_headers(bytes: &[u8], encoding: crate::types::message::BodyEncoding) -> Result<String, Error> {
    use crate::types::message::BodyEncoding::*;
    match encoding {
        Utf8 => std::str::from_utf8(bytes).map(|s| s.to_string()).map_err(Error::from),
        Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        Opaque => std::str::from_utf8(bytes).map(|s| s.to_string()).map_err(Error::from),
    }
}

/// Parse a complete SIP message out of `buf`, which must contain the full
/// header block and exactly `Content-Length` bytes of body (the transport's
/// framing layer, `crate::framing`, is responsible for slicing a stream
/// into such complete units before calling this).
pub fn parse_message(buf: &[u8], header_encoding: crate::types::message::BodyEncoding) -> Result<Message, Error> {
    let header_end = find_header_end(buf).ok_or_else(|| Error::Incomplete("no header terminator".into()))?;
    let header_text = decode_headers(&buf[..header_end], header_encoding)?;
    let body = Bytes::copy_from_slice(&buf[header_end..]);

    let mut lines = unfold_lines(&header_text);
    // Drop the trailing blank lines produced by the CRLFCRLF terminator.
    while matches!(lines.last(), Some(l) if l.trim().is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        return Err(Error::Validation {
            field: HeaderField::StartLine,
            status: StatusCode::BadRequest,
            detail: "empty message".to_string(),
        });
    }
    let start_line = parse_start_line(&lines[0])?;

    let mut header = Header::new();
    for line in &lines[1..] {
        if line.trim().is_empty() {
            continue;
        }
        apply_header_line(&mut header, line)?;
    }

    if header.top_via().is_none() {
        return Err(Error::Validation {
            field: HeaderField::Via,
            status: StatusCode::BadRequest,
            detail: "message has no top Via".to_string(),
        });
    }

    if let Some(expected) = header.content_length {
        if expected != body.len() {
            return Err(Error::Validation {
                field: HeaderField::ContentLength,
                status: StatusCode::BadRequest,
                detail: format!("Content-Length mismatch: expected {expected}, got {}", body.len()),
            });
        }
    }

    Ok(match start_line {
        StartLine::Request { method, uri } => Message::Request(Request {
            method,
            request_uri: uri,
            header,
            body,
        }),
        StartLine::Response { status, reason } => Message::Response(Response {
            status_code: status,
            reason,
            header,
            body,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::BodyEncoding;

    const INVITE: &str = "INVITE sip:bob@example.com SIP/2.0\r\n\
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

    #[test]
    fn parses_full_invite() {
        let msg = parse_message(INVITE.as_bytes(), BodyEncoding::Utf8).unwrap();
        let req = msg.as_request().unwrap();
        assert_eq!(req.method, Method::Invite);
        assert_eq!(req.header.call_id.as_deref(), Some("a84b4c76e66710@pc33.atlanta.com"));
        assert_eq!(req.header.cseq.as_ref().unwrap().seq, 314159);
        assert_eq!(req.body.as_ref(), b"abcd");
    }

    #[test]
    fn rejects_message_without_via() {
        let bad = "OPTIONS sip:bob@example.com SIP/2.0\r\nCall-ID: x\r\nContent-Length: 0\r\n\r\n";
        let err = parse_message(bad.as_bytes(), BodyEncoding::Utf8).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadRequest);
    }

    #[test]
    fn rejects_content_length_mismatch() {
        let bad = "OPTIONS sip:bob@example.com SIP/2.0\r\nVia: SIP/2.0/UDP h;branch=z9hG4bK1\r\nContent-Length: 5\r\n\r\nab";
        assert!(parse_message(bad.as_bytes(), BodyEncoding::Utf8).is_err());
    }

    #[test]
    fn detects_ping_body() {
        assert!(is_ping_body(b"\r\n"));
        assert!(is_ping_body(b""));
        assert!(!is_ping_body(b"v=0"));
    }
}
