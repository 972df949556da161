use std::fmt;

use crate::types::param::{find_param, Param};
use crate::types::uri::Uri;
use crate::types::via::Via;

/// A `display-name <uri>;params` value, shared by From/To/Contact
/// (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub params: Vec<Param>,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        NameAddr {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        find_param(&self.params, "tag").and_then(|p| p.value.as_deref())
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.params.retain(|p| !p.name_eq("tag"));
        self.params.push(Param::new("tag", Some(tag.into())));
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{name}\" ")?;
        }
        write!(f, "<{}>", self.uri)?;
        for p in &self.params {
            write!(f, ";{p}")?;
        }
        Ok(())
    }
}

/// CSeq header value: sequence number plus the method it applies to
/// (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
    pub method: crate::types::method::Method,
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

/// The semantic header envelope shared by requests and responses
/// (spec.md §3). Via is ordered top-first; Contact/Route/Record-Route are
/// ordered as received. Unknown headers are preserved round-trip in
/// `extra`, in first-seen order (spec.md §9 "Dynamic header bag").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub from: Option<NameAddr>,
    pub to: Option<NameAddr>,
    pub call_id: Option<String>,
    pub cseq: Option<CSeq>,
    pub via: Vec<Via>,
    pub contact: Vec<NameAddr>,
    pub route: Vec<NameAddr>,
    pub record_route: Vec<NameAddr>,
    pub max_forwards: Option<u32>,
    pub content_length: Option<usize>,
    pub content_type: Option<String>,
    pub require: Vec<String>,
    pub unsupported: Vec<String>,
    pub extra: Vec<(String, String)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// The top (most recently added) Via, if any — the basis of
    /// transaction identity (spec.md §3 invariants).
    pub fn top_via(&self) -> Option<&Via> {
        self.via.first()
    }

    pub fn top_via_mut(&mut self) -> Option<&mut Via> {
        self.via.first_mut()
    }

    pub fn push_via(&mut self, via: Via) {
        self.via.insert(0, via);
    }

    pub fn top_route(&self) -> Option<&NameAddr> {
        self.route.first()
    }

    pub fn pop_top_route(&mut self) -> Option<NameAddr> {
        if self.route.is_empty() {
            None
        } else {
            Some(self.route.remove(0))
        }
    }

    pub fn pop_bottom_route(&mut self) -> Option<NameAddr> {
        self.route.pop()
    }

    pub fn push_bottom_route(&mut self, addr: NameAddr) {
        self.route.push(addr);
    }

    pub fn get_extra(&self, name: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_extra(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extra.push((name.into(), value.into()));
    }
}
