use std::fmt;
use thiserror::Error;

use crate::types::status::StatusCode;

/// A type alias for handling `Result`s with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The header field a validation error is attributed to, per spec.md §4.1.
///
/// Carried alongside [`Error::Validation`] so callers can build precise
/// 4xx responses without re-parsing the offending header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    StartLine,
    From,
    To,
    CallId,
    CSeq,
    Via,
    Contact,
    Route,
    ContentLength,
    Require,
    Unknown,
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HeaderField::StartLine => "start-line",
            HeaderField::From => "from",
            HeaderField::To => "to",
            HeaderField::CallId => "call-id",
            HeaderField::CSeq => "cseq",
            HeaderField::Via => "via",
            HeaderField::Contact => "contact",
            HeaderField::Route => "route",
            HeaderField::ContentLength => "content-length",
            HeaderField::Require => "require",
            HeaderField::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Errors that can occur in SIP message handling.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A structured parse failure, tagged with the offending field and the
    /// SIP status code the caller should respond with (spec.md §4.1).
    #[error("invalid {field} ({status}): {detail}")]
    Validation {
        field: HeaderField,
        status: StatusCode,
        detail: String,
    },

    #[error("invalid SIP method: {0}")]
    InvalidMethod(String),

    #[error("invalid SIP URI: {0}")]
    InvalidUri(String),

    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    #[error("message exceeds maximum size of {max} bytes ({actual} bytes)")]
    MessageTooLarge { max: usize, actual: usize },

    #[error("incomplete message: {0}")]
    Incomplete(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("STUN error: {0}")]
    Stun(String),

    #[error("invalid UTF-8 in header text: {0}")]
    Encoding(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The SIP status code a transport should answer with when this error
    /// surfaces while parsing an inbound request (spec.md §4.1, §7).
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { status, .. } => *status,
            Error::MessageTooLarge { .. } => StatusCode::RequestEntityTooLarge,
            _ => StatusCode::BadRequest,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::Parser(format!("failed to parse integer: {err}"))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parser(format!("{err:?}"))
    }
}
