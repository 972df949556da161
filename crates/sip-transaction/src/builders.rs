//! Request/response construction helpers the engine needs internally
//! (ACK-for-non-2xx, CANCEL, and stock final responses), grounded on
//! `transaction-core::builders` — simplified to plain functions since the
//! engine only ever needs these three shapes, not the teacher's fluent
//! `InviteBuilder`/`ResponseBuilder` surface aimed at application code.

use sip_core::types::{CSeq, Header, Method, Request, Response, StatusCode};

/// Build the ACK the transaction layer itself owns for a non-2xx final
/// response (spec.md §4.5 "UAC INVITE state machine" — ACK for 2xx is the
/// dialog layer's responsibility and is never built here). Per RFC 3261
/// §17.1.1.3: same Request-URI, Call-ID, From, CSeq number (method ACK),
/// single Via carrying the INVITE's branch, To copied from the response
/// (carrying its tag), and the original Route set.
pub fn build_ack(invite: &Request, final_response: &Response) -> Request {
    let mut ack = Request::new(Method::Ack, invite.request_uri.clone());
    ack.header.call_id = invite.header.call_id.clone();
    ack.header.from = invite.header.from.clone();
    ack.header.to = final_response.header.to.clone().or_else(|| invite.header.to.clone());
    ack.header.max_forwards = invite.header.max_forwards;
    if let Some(via) = invite.header.top_via() {
        ack.header.push_via(via.clone());
    }
    ack.header.route = invite.header.route.clone();
    let seq = invite.header.cseq.as_ref().map(|c| c.seq).unwrap_or(1);
    ack.header.cseq = Some(CSeq { seq, method: Method::Ack });
    ack
}

/// Build the CANCEL for an in-flight INVITE (spec.md §4.5 "Matching" — "no
/// match and the method is CANCEL, look for a matching INVITE by branch").
/// Same Request-URI, Call-ID, From, To, Via/branch, one lower Max-Forwards
/// is not mandated by the engine (the TU owns Max-Forwards policy), CSeq
/// number unchanged with method CANCEL.
pub fn build_cancel(invite: &Request) -> Request {
    let mut cancel = Request::new(Method::Cancel, invite.request_uri.clone());
    cancel.header.call_id = invite.header.call_id.clone();
    cancel.header.from = invite.header.from.clone();
    cancel.header.to = invite.header.to.clone();
    cancel.header.route = invite.header.route.clone();
    if let Some(via) = invite.header.top_via() {
        cancel.header.push_via(via.clone());
    }
    let seq = invite.header.cseq.as_ref().map(|c| c.seq).unwrap_or(1);
    cancel.header.cseq = Some(CSeq { seq, method: Method::Cancel });
    cancel
}

/// A stock final response echoing the request's dialog-identifying
/// headers, used by the engine for CANCEL handling (487 on the INVITE's
/// UAS transaction, 200 OK on the CANCEL itself — spec.md §4.5 "Matching").
pub fn build_response(request: &Request, status: StatusCode) -> Response {
    let mut resp = Response::from_status(status);
    resp.header = Header::new();
    resp.header.call_id = request.header.call_id.clone();
    resp.header.from = request.header.from.clone();
    resp.header.to = request.header.to.clone();
    resp.header.via = request.header.via.clone();
    resp.header.cseq = Some(CSeq {
        seq: request.header.cseq.as_ref().map(|c| c.seq).unwrap_or(1),
        method: request.method.clone(),
    });
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_core::types::{Uri, Via};

    fn sample_invite() -> Request {
        let mut req = Request::new(Method::Invite, Uri::sip("dummy"));
        req.header.push_via(Via::new("udp", "127.0.0.1", "z9hG4bK1"));
        req.header.call_id = Some("call-1".into());
        req.header.cseq = Some(CSeq { seq: 1, method: Method::Invite });
        req
    }

    #[test]
    fn ack_carries_the_invite_branch_and_response_to_tag() {
        let invite = sample_invite();
        let mut resp = Response::from_status(StatusCode::DECLINE);
        resp.header.to = Some(sip_core::types::NameAddr::new(Uri::sip("dummy")));
        resp.header.to.as_mut().unwrap().set_tag("totag");

        let ack = build_ack(&invite, &resp);
        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.header.top_via().unwrap().branch, "z9hG4bK1");
        assert_eq!(ack.header.to.unwrap().tag(), Some("totag"));
        assert_eq!(ack.header.cseq.unwrap().seq, 1);
    }

    #[test]
    fn cancel_response_echoes_call_id_and_cseq_number() {
        let invite = sample_invite();
        let resp = build_response(&invite, StatusCode::REQUEST_TERMINATED);
        assert_eq!(resp.status_code, StatusCode::REQUEST_TERMINATED);
        assert_eq!(resp.header.call_id, invite.header.call_id);
        assert_eq!(resp.header.cseq.unwrap().seq, 1);
    }
}
