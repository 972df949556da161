use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// SIP request methods, per spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    Subscribe,
    Notify,
    Info,
    Refer,
    Prack,
    Message,
    Update,
    Publish,
    /// Any method not in the closed set above.
    Extension(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Info => "INFO",
            Method::Refer => "REFER",
            Method::Prack => "PRACK",
            Method::Message => "MESSAGE",
            Method::Update => "UPDATE",
            Method::Publish => "PUBLISH",
            Method::Extension(s) => s.as_str(),
        }
    }

    /// Whether this method initiates an INVITE-style transaction (spec.md §4.5).
    pub fn is_invite(&self) -> bool {
        matches!(self, Method::Invite)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::InvalidMethod(s.to_string()));
        }
        Ok(match s.to_ascii_uppercase().as_str() {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            "REGISTER" => Method::Register,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "INFO" => Method::Info,
            "REFER" => Method::Refer,
            "PRACK" => Method::Prack,
            "MESSAGE" => Method::Message,
            "UPDATE" => Method::Update,
            "PUBLISH" => Method::Publish,
            _ => Method::Extension(s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_methods() {
        for m in [Method::Invite, Method::Ack, Method::Bye, Method::Cancel] {
            let parsed: Method = m.as_str().parse().unwrap();
            assert_eq!(parsed, m);
        }
    }

    #[test]
    fn unknown_method_is_extension() {
        let m: Method = "PING".parse().unwrap();
        assert_eq!(m, Method::Extension("PING".to_string()));
    }
}
