use std::fmt;

/// Canonical header names, grounded on
/// `rvoip_sip_core::types::headers::header_name::HeaderName`. Comparison is
/// case-insensitive per RFC 3261 §7.3.1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HeaderName {
    Via,
    From,
    To,
    CallId,
    CSeq,
    MaxForwards,
    Contact,
    Route,
    RecordRoute,
    ContentLength,
    ContentType,
    Require,
    Unsupported,
    Other(String),
}

impl HeaderName {
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::Contact => "Contact",
            HeaderName::Route => "Route",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::Require => "Require",
            HeaderName::Unsupported => "Unsupported",
            HeaderName::Other(s) => s,
        }
    }

    /// The compact form defined by RFC 3261 §7.3.3, where one exists.
    pub fn compact_form(&self) -> Option<&'static str> {
        match self {
            HeaderName::Via => Some("v"),
            HeaderName::From => Some("f"),
            HeaderName::To => Some("t"),
            HeaderName::CallId => Some("i"),
            HeaderName::Contact => Some("m"),
            HeaderName::ContentLength => Some("l"),
            HeaderName::ContentType => Some("c"),
            _ => None,
        }
    }

    pub fn parse(name: &str) -> HeaderName {
        match name {
            n if n.eq_ignore_ascii_case("via") || n == "v" => HeaderName::Via,
            n if n.eq_ignore_ascii_case("from") || n == "f" => HeaderName::From,
            n if n.eq_ignore_ascii_case("to") || n == "t" => HeaderName::To,
            n if n.eq_ignore_ascii_case("call-id") || n == "i" => HeaderName::CallId,
            n if n.eq_ignore_ascii_case("cseq") => HeaderName::CSeq,
            n if n.eq_ignore_ascii_case("max-forwards") => HeaderName::MaxForwards,
            n if n.eq_ignore_ascii_case("contact") || n == "m" => HeaderName::Contact,
            n if n.eq_ignore_ascii_case("route") => HeaderName::Route,
            n if n.eq_ignore_ascii_case("record-route") => HeaderName::RecordRoute,
            n if n.eq_ignore_ascii_case("content-length") || n == "l" => HeaderName::ContentLength,
            n if n.eq_ignore_ascii_case("content-type") || n == "c" => HeaderName::ContentType,
            n if n.eq_ignore_ascii_case("require") => HeaderName::Require,
            n if n.eq_ignore_ascii_case("unsupported") => HeaderName::Unsupported,
            other => HeaderName::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
