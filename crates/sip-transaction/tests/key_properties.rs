//! Property tests for transaction-ID determinism (spec.md §8 "Transaction
//! ID determinism": re-deriving a key from the same wire fields always
//! yields the same key, regardless of how many times it's computed).

use proptest::prelude::*;

use sip_core::types::{CSeq, Method, Request, Response, StatusCode, Uri, Via};
use sip_transaction::key::TransactionKey;

fn cookie_branch_suffix() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9]{8,32}"
}

fn invite_with_branch(branch: &str) -> Request {
    let mut req = Request::new(Method::Invite, Uri::sip("example.test"));
    req.header.push_via(Via::new("udp", "192.0.2.10", format!("z9hG4bK{branch}")));
    req.header.cseq = Some(CSeq { seq: 1, method: Method::Invite });
    req
}

proptest! {
    /// Deriving a key from the same request twice always yields the same key.
    #[test]
    fn key_derivation_is_deterministic(suffix in cookie_branch_suffix()) {
        let req = invite_with_branch(&suffix);
        let a = TransactionKey::for_request(&req, true);
        let b = TransactionKey::for_request(&req, true);
        prop_assert_eq!(a, b);
    }

    /// A response echoing the request's Via and CSeq method derives the
    /// identical key the client transaction was created under.
    #[test]
    fn request_and_response_keys_agree(suffix in cookie_branch_suffix(), server_side in any::<bool>()) {
        let req = invite_with_branch(&suffix);
        let request_key = TransactionKey::for_request(&req, server_side).unwrap();

        let mut resp = Response::from_status(StatusCode::OK);
        resp.header.push_via(req.header.top_via().unwrap().clone());
        resp.header.cseq = Some(CSeq { seq: 1, method: Method::Invite });
        let response_key = TransactionKey::for_response(&resp, server_side).unwrap();

        prop_assert_eq!(request_key, response_key);
    }

    /// Swapping a key's method with `with_method` never touches the branch.
    #[test]
    fn with_method_preserves_branch(suffix in cookie_branch_suffix()) {
        let req = invite_with_branch(&suffix);
        let key = TransactionKey::for_request(&req, true).unwrap();
        let swapped = key.with_method(Method::Cancel);
        prop_assert_eq!(key.branch().to_string(), swapped.branch().to_string());
    }
}
