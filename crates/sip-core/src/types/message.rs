use std::fmt;

use bytes::Bytes;

use crate::types::header::Header;
use crate::types::method::Method;
use crate::types::status::StatusCode;
use crate::types::uri::Uri;

/// How the body's bytes should be interpreted as text, if at all — spec.md
/// §3 allows header and body encodings to be configured independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Utf8,
    Latin1,
    /// The body is opaque binary, not text (e.g. an audio/video attachment).
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub request_uri: Uri,
    pub header: Header,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, request_uri: Uri) -> Self {
        Request {
            method,
            request_uri,
            header: Header::new(),
            body: Bytes::new(),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header.call_id.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: StatusCode,
    pub reason: String,
    pub header: Header,
    pub body: Bytes,
}

impl Response {
    pub fn new(status_code: StatusCode, reason: impl Into<String>) -> Self {
        Response {
            status_code,
            reason: reason.into(),
            header: Header::new(),
            body: Bytes::new(),
        }
    }

    pub fn from_status(status_code: StatusCode) -> Self {
        let reason = status_code.default_reason().to_string();
        Response::new(status_code, reason)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header.call_id.as_deref()
    }
}

/// Tagged `Request | Response` variant (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn header(&self) -> &Header {
        match self {
            Message::Request(r) => &r.header,
            Message::Response(r) => &r.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut Header {
        match self {
            Message::Request(r) => &mut r.header,
            Message::Response(r) => &mut r.header,
        }
    }

    pub fn body(&self) -> &Bytes {
        match self {
            Message::Request(r) => &r.body,
            Message::Response(r) => &r.body,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(r) => Some(r),
            _ => None,
        }
    }

    /// The method used for transaction matching: the request's own method,
    /// or the CSeq method carried on a response (spec.md §3).
    pub fn method_for_matching(&self) -> Option<&Method> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Response(r) => r.header.cseq.as_ref().map(|c| &c.method),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => write!(f, "{} {}", r.method, r.request_uri),
            Message::Response(r) => write!(f, "{} {}", r.status_code, r.reason),
        }
    }
}
