use std::fmt;

use crate::error::Error;

/// A SIP response status code, restricted to the valid 100-699 range
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const TRYING: StatusCode = StatusCode(100);
    pub const RINGING: StatusCode = StatusCode(180);
    pub const OK: StatusCode = StatusCode(200);
    pub const MOVED_TEMPORARILY: StatusCode = StatusCode(302);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const BUSY_HERE: StatusCode = StatusCode(486);
    pub const REQUEST_TERMINATED: StatusCode = StatusCode(487);
    pub const NOT_ACCEPTABLE_HERE: StatusCode = StatusCode(488);
    pub const TOO_MANY_HOPS: StatusCode = StatusCode(483);
    pub const BAD_EXTENSION: StatusCode = StatusCode(420);
    pub const REQUEST_ENTITY_TOO_LARGE: StatusCode = StatusCode(413);
    pub const SERVER_INTERNAL_ERROR: StatusCode = StatusCode(500);
    pub const DECLINE: StatusCode = StatusCode(603);

    // Convenience aliases matching the casing used in spec.md §7.
    #[allow(non_upper_case_globals)]
    pub const BadRequest: StatusCode = Self::BAD_REQUEST;
    #[allow(non_upper_case_globals)]
    pub const RequestEntityTooLarge: StatusCode = Self::REQUEST_ENTITY_TOO_LARGE;
    #[allow(non_upper_case_globals)]
    pub const TooManyHops: StatusCode = Self::TOO_MANY_HOPS;
    #[allow(non_upper_case_globals)]
    pub const BadExtension: StatusCode = Self::BAD_EXTENSION;

    pub fn new(code: u16) -> Result<Self, Error> {
        if (100..=699).contains(&code) {
            Ok(StatusCode(code))
        } else {
            Err(Error::InvalidStatusCode(code))
        }
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_provisional(self) -> bool {
        (100..200).contains(&self.0)
    }

    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_final(self) -> bool {
        self.0 >= 200
    }

    /// Default reason phrase for well-known codes; empty for others.
    pub fn default_reason(self) -> &'static str {
        match self.0 {
            100 => "Trying",
            180 => "Ringing",
            183 => "Session Progress",
            200 => "OK",
            302 => "Moved Temporarily",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            413 => "Request Entity Too Large",
            420 => "Bad Extension",
            483 => "Too Many Hops",
            486 => "Busy Here",
            487 => "Request Terminated",
            488 => "Not Acceptable Here",
            500 => "Server Internal Error",
            603 => "Decline",
            _ => "",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        StatusCode::new(value)
    }
}
