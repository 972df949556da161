use std::fmt;
use std::net::SocketAddr;

use crate::types::param::Param;

/// The RFC 3261 magic cookie that marks a Via branch as identifying a
/// transaction per §8.1.1.7 (spec.md GLOSSARY).
pub const MAGIC_COOKIE: &str = "z9hG4bK";

/// A single Via header entry (spec.md §3). The top of a `Vec<Via>` is the
/// most recently added hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    pub branch: String,
    pub received: Option<String>,
    pub rport: Option<Option<u16>>,
    pub other_params: Vec<Param>,
}

impl Via {
    pub fn new(transport: impl Into<String>, host: impl Into<String>, branch: impl Into<String>) -> Self {
        Via {
            transport: transport.into(),
            host: host.into(),
            port: None,
            branch: branch.into(),
            received: None,
            rport: None,
            other_params: Vec::new(),
        }
    }

    /// Whether the branch carries the RFC 3261 magic cookie, making
    /// transaction matching deterministic (spec.md §3).
    pub fn is_rfc3261_branch(&self) -> bool {
        self.branch.starts_with(MAGIC_COOKIE)
    }

    pub fn sent_by(&self) -> String {
        match self.port {
            Some(p) => format!("{}:{}", self.host, p),
            None => self.host.clone(),
        }
    }

    pub fn set_sent_by(&mut self, addr: SocketAddr) {
        self.host = addr.ip().to_string();
        self.port = Some(addr.port());
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.other_params
            .iter()
            .find(|p| p.name_eq(name))
            .and_then(|p| p.value.as_deref())
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport.to_ascii_uppercase(), self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, ";branch={}", self.branch)?;
        if let Some(received) = &self.received {
            write!(f, ";received={received}")?;
        }
        if let Some(rport) = &self.rport {
            match rport {
                Some(p) => write!(f, ";rport={p}")?,
                None => write!(f, ";rport")?,
            }
        }
        for p in &self.other_params {
            write!(f, ";{p}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_magic_cookie_branch() {
        let via = Via::new("udp", "127.0.0.1", "z9hG4bK776asdhds");
        assert!(via.is_rfc3261_branch());
        let via = Via::new("udp", "127.0.0.1", "776asdhds");
        assert!(!via.is_rfc3261_branch());
    }
}
