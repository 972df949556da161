//! Transaction identity (spec.md §3 "transaction ID derivation"), grounded
//! on `rvoip_dialog_core::transaction::TransactionKey::new(branch, method,
//! is_server)`.
//!
//! For a magic-cookie branch, the key is the branch plus the top Via
//! sent-by plus the method used for matching (spec.md §8 "Transaction ID
//! determinism"). ACK normalizes to `INVITE` so it lands on the same key
//! as the server transaction it is acknowledging. Non-cookie branches fall
//! back to the RFC 2543 legacy correlation fields, folded into a single
//! synthetic branch string so the rest of the engine never has to know the
//! difference.

use std::fmt;
use std::hash::{Hash, Hasher};

use sip_core::types::{Method, Request, Response, Via};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    branch: String,
    method: Method,
    is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        TransactionKey {
            branch: branch.into(),
            method: matching_method(&method),
            is_server,
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// The key a server transaction is created under, or that a request is
    /// matched against on the server side.
    pub fn for_request(req: &Request, is_server: bool) -> Option<Self> {
        let via = req.header.top_via()?;
        Some(Self::from_via(via, req.method.clone(), is_server))
    }

    /// The key a response is matched against on the client side — the CSeq
    /// method, not the status line, identifies the originating request.
    pub fn for_response(resp: &Response, is_server: bool) -> Option<Self> {
        let via = resp.header.top_via()?;
        let method = resp.header.cseq.as_ref()?.method.clone();
        Some(Self::from_via(via, method, is_server))
    }

    /// The same branch/side with a different method — used to find the
    /// INVITE transaction a CANCEL names (spec.md §4.5 "Matching").
    pub fn with_method(&self, method: Method) -> Self {
        TransactionKey {
            branch: self.branch.clone(),
            method: matching_method(&method),
            is_server: self.is_server,
        }
    }

    fn from_via(via: &Via, method: Method, is_server: bool) -> Self {
        if via.is_rfc3261_branch() {
            TransactionKey::new(format!("{}:{}", via.branch, via.sent_by()), method, is_server)
        } else {
            TransactionKey::new(legacy_branch(via, &method), method, is_server)
        }
    }
}

/// ACK correlates to the INVITE transaction it acknowledges (spec.md §8
/// "modulo ACK-to-INVITE equivalence").
fn matching_method(method: &Method) -> Method {
    if matches!(method, Method::Ack) {
        Method::Invite
    } else {
        method.clone()
    }
}

/// RFC 2543 legacy correlation, folded into a single synthetic branch.
/// Deterministic and stable across processes, unlike a random UUID, so
/// retransmitted legacy requests still land on the same transaction.
fn legacy_branch(via: &Via, method: &Method) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    via.sent_by().hash(&mut hasher);
    method.as_str().hash(&mut hasher);
    format!("legacy-{:016x}", hasher.finish())
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.branch, self.method, if self.is_server { "server" } else { "client" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_core::types::{CSeq, Header, StatusCode, Uri};

    fn invite_request(branch: &str) -> Request {
        let mut req = Request::new(Method::Invite, Uri::sip("dummy"));
        req.header.push_via(Via::new("udp", "127.0.0.1", branch));
        req.header.cseq = Some(CSeq { seq: 1, method: Method::Invite });
        req
    }

    #[test]
    fn request_and_response_derive_the_same_key_for_a_cookie_branch() {
        let branch = "z9hG4bK5f37455955ca433a902f8fea0ce2dc27";
        let req = invite_request(branch);
        let client_key = TransactionKey::for_request(&req, false).unwrap();

        let mut resp = Response::from_status(StatusCode::DECLINE);
        resp.header = Header::new();
        resp.header.push_via(req.header.top_via().unwrap().clone());
        resp.header.cseq = Some(CSeq { seq: 1, method: Method::Invite });
        let response_key = TransactionKey::for_response(&resp, false).unwrap();

        assert_eq!(client_key, response_key);
    }

    #[test]
    fn ack_normalizes_to_the_invite_key() {
        let branch = "z9hG4bK5f37455955ca433a902f8fea0ce2dc27";
        let invite = invite_request(branch);
        let invite_key = TransactionKey::for_request(&invite, true).unwrap();

        let mut ack = Request::new(Method::Ack, invite.request_uri.clone());
        ack.header.push_via(Via::new("udp", "127.0.0.1", branch));
        let ack_key = TransactionKey::for_request(&ack, true).unwrap();

        assert_eq!(invite_key, ack_key);
    }

    #[test]
    fn legacy_branch_is_deterministic() {
        let req_a = invite_request("776asdhds");
        let req_b = invite_request("776asdhds");
        assert_eq!(TransactionKey::for_request(&req_a, false), TransactionKey::for_request(&req_b, false));
    }
}
