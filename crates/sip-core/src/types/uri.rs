//! SIP URI, grounded on `rvoip_sip_core::types::uri` and generalized to the
//! `{ scheme, user?, password?, host, port?, params, headers }` shape of
//! spec.md §3.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::Error;
use crate::types::param::{find_param, Param};

/// The wildcard hosts that mark a placeholder Contact/Via/From URI
/// (spec.md §3 invariants) awaiting rewrite at send time.
pub const WILDCARD_V4: &str = "0.0.0.0";
pub const WILDCARD_V6: &str = "::0";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    Sip,
    Sips,
    Tel,
    Custom(String),
}

impl Scheme {
    pub fn as_str(&self) -> &str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
            Scheme::Tel => "tel",
            Scheme::Custom(s) => s,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "sip" => Scheme::Sip,
            "sips" => Scheme::Sips,
            "tel" => Scheme::Tel,
            _ => Scheme::Custom(s.to_string()),
        })
    }
}

/// The host component of a URI: a domain name or a literal IP address.
#[derive(Debug, Clone)]
pub enum Host {
    Domain(String),
    Ip(IpAddr),
}

impl Host {
    /// Whether this host is the IPv4/IPv6 wildcard used to mark a
    /// placeholder that must be rewritten before sending (spec.md §3).
    pub fn is_placeholder(&self) -> bool {
        match self {
            Host::Domain(d) => d == WILDCARD_V4 || d == WILDCARD_V6,
            Host::Ip(ip) => ip.is_unspecified(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Domain(d) => f.write_str(d),
            Host::Ip(IpAddr::V4(v4)) => write!(f, "{v4}"),
            Host::Ip(IpAddr::V6(v6)) => write!(f, "[{v6}]"),
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        // Host comparison is case-insensitive (spec.md §3).
        match (self, other) {
            (Host::Domain(a), Host::Domain(b)) => a.eq_ignore_ascii_case(b),
            (Host::Ip(a), Host::Ip(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Host {}

impl FromStr for Host {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix('[').and_then(|s| s.strip_suffix(']'));
        let candidate = stripped.unwrap_or(s);
        if let Ok(ip) = candidate.parse::<IpAddr>() {
            Ok(Host::Ip(ip))
        } else {
            Ok(Host::Domain(s.to_string()))
        }
    }
}

/// A SIP/SIPS/TEL URI (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Host,
    pub port: Option<u16>,
    pub params: Vec<Param>,
    pub headers: Vec<(String, String)>,
}

impl Uri {
    pub fn new(scheme: Scheme, host: Host) -> Self {
        Uri {
            scheme,
            user: None,
            password: None,
            host,
            port: None,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn sip(host: impl Into<String>) -> Self {
        Uri::new(Scheme::Sip, Host::Domain(host.into()))
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        find_param(&self.params, name).and_then(|p| p.value.as_deref())
    }

    pub fn has_param(&self, name: &str) -> bool {
        find_param(&self.params, name).is_some()
    }

    /// `lr` marks a loose router (spec.md §3, GLOSSARY).
    pub fn is_loose_router(&self) -> bool {
        self.params.iter().any(Param::is_lr)
    }

    pub fn transport(&self) -> Option<&str> {
        self.param("transport")
    }

    /// Whether this URI's host is the wildcard placeholder that must be
    /// rewritten before a message carrying it is sent (spec.md §3).
    pub fn is_placeholder(&self) -> bool {
        self.host.is_placeholder()
    }

    pub fn set_host_port(&mut self, host: Host, port: Option<u16>) {
        self.host = host;
        self.port = port;
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            f.write_str(user)?;
            if let Some(pw) = &self.password {
                write!(f, ":{pw}")?;
            }
            f.write_str("@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        for p in &self.params {
            write!(f, ";{p}")?;
        }
        if !self.headers.is_empty() {
            f.write_str("?")?;
            for (i, (k, v)) in self.headers.iter().enumerate() {
                if i > 0 {
                    f.write_str("&")?;
                }
                write!(f, "{k}={v}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::parser::uri::parse_uri_complete(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_detection() {
        let uri = Uri::sip(WILDCARD_V4);
        assert!(uri.is_placeholder());
        let uri = Uri::new(Scheme::Sip, Host::Domain("example.com".into()));
        assert!(!uri.is_placeholder());
    }

    #[test]
    fn host_equality_is_case_insensitive() {
        assert_eq!(
            Host::Domain("Example.COM".into()),
            Host::Domain("example.com".into())
        );
    }
}
