//! Header rewriter / router (C6, spec.md §4.6 + the receive-side Route
//! preprocessing from §4.4). Pure functions over `(local_ep, header)`,
//! plus two optional hooks applied before the default rewrite.

use std::net::SocketAddr;
use std::sync::Arc;

use sip_core::types::{Header, Host, NameAddr, Param, Protocol, Request, Response, Scheme, Uri};

/// Invoked before the default outbound rewrite; if it returns a header,
/// that header replaces the current one and the default rewrite still
/// runs afterward so placeholders remain substituted (spec.md §4.6).
pub type RequestHeaderHook = Arc<dyn Fn(SocketAddr, SocketAddr, &Request) -> Option<Header> + Send + Sync>;
pub type ResponseHeaderHook = Arc<dyn Fn(SocketAddr, SocketAddr, &Response) -> Option<Header> + Send + Sync>;

/// Apply the default outbound header rewrite (spec.md §4.4 "Header
/// rewriting"): substitute the selected local endpoint into placeholder
/// Via/From/Contact URIs.
pub fn rewrite_outbound_header(header: &mut Header, local: SocketAddr, protocol: Protocol, contact_host: Option<&str>) {
    if let Some(via) = header.top_via_mut() {
        if Host::Domain(via.host.clone()).is_placeholder() || via.host.is_empty() {
            via.set_sent_by(local);
        }
        via.transport = protocol.as_str().to_string();
    }

    if let Some(from) = &mut header.from {
        if from.uri.is_placeholder() {
            set_host_from_socket(&mut from.uri, local);
        }
    }

    for contact in &mut header.contact {
        rewrite_contact(contact, local, protocol, contact_host);
    }
}

fn rewrite_contact(contact: &mut NameAddr, local: SocketAddr, protocol: Protocol, contact_host: Option<&str>) {
    if let Some(host) = contact_host {
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            contact.uri.set_host_port(Host::Ip(ip), Some(local.port()));
        } else {
            contact.uri.set_host_port(Host::Domain(host.to_string()), Some(local.port()));
        }
    } else if contact.uri.is_placeholder() {
        set_host_from_socket(&mut contact.uri, local);
    }

    contact.uri.scheme = if protocol.is_secure() { Scheme::Sips } else { Scheme::Sip };
    contact.uri.params.retain(|p| !p.name_eq("transport"));
    if !matches!(protocol, Protocol::Udp) {
        contact.uri.params.push(Param::transport(protocol.as_str().to_ascii_lowercase()));
    }
}

fn set_host_from_socket(uri: &mut Uri, addr: SocketAddr) {
    uri.set_host_port(Host::Ip(addr.ip()), Some(addr.port()));
}

/// Run the optional request hook, falling back to the request's own header
/// when it declines to replace it, then apply the default rewrite.
pub fn prepare_outbound_request(
    req: &mut Request,
    local: SocketAddr,
    remote: SocketAddr,
    protocol: Protocol,
    contact_host: Option<&str>,
    hook: Option<&RequestHeaderHook>,
) {
    if let Some(hook) = hook {
        if let Some(replacement) = hook(local, remote, req) {
            req.header = replacement;
        }
    }
    rewrite_outbound_header(&mut req.header, local, protocol, contact_host);
}

pub fn prepare_outbound_response(
    resp: &mut Response,
    local: SocketAddr,
    remote: SocketAddr,
    protocol: Protocol,
    contact_host: Option<&str>,
    hook: Option<&ResponseHeaderHook>,
) {
    if let Some(hook) = hook {
        if let Some(replacement) = hook(local, remote, resp) {
            resp.header = replacement;
        }
    }
    rewrite_outbound_header(&mut resp.header, local, protocol, contact_host);
}

/// Route preprocessing on receive (spec.md §4.4 "Route preprocessing",
/// RFC 3261 §12.2.1.1 / §16.4). `is_local_route` decides whether a Route
/// entry's host names one of this stack's listening endpoints —
/// per spec.md §9, wildcard-bound channels must be checked against *all*
/// machine-local addresses, not a single narrow host comparison.
pub fn preprocess_route(req: &mut Request, is_local_route: impl Fn(&Uri) -> bool) {
    if req.request_uri.is_loose_router() {
        if let Some(bottom) = req.header.pop_bottom_route() {
            req.request_uri = bottom.uri;
        }
    }

    if let Some(top) = req.header.top_route() {
        if is_local_route(&top.uri) {
            req.header.pop_top_route();
        }
    }

    if let Some(top) = req.header.top_route() {
        if !top.uri.is_loose_router() {
            let strict_uri = req.header.pop_top_route().unwrap().uri;
            let old_request_uri = std::mem::replace(&mut req.request_uri, strict_uri);
            req.header.push_bottom_route(NameAddr::new(old_request_uri));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_core::types::{CSeq, Method};

    fn route(host: &str, lr: bool) -> NameAddr {
        let mut uri = Uri::sip(host);
        if lr {
            uri = uri.with_param(Param::flag("lr"));
        }
        NameAddr::new(uri)
    }

    fn base_request() -> Request {
        let mut req = Request::new(Method::Invite, Uri::sip("proxy.example").with_param(Param::flag("lr")));
        req.header.cseq = Some(CSeq { seq: 1, method: Method::Invite });
        req
    }

    #[test]
    fn route_preprocessing_is_a_no_op_without_route_headers() {
        let mut req = base_request();
        let before = req.request_uri.clone();
        preprocess_route(&mut req, |_| false);
        assert_eq!(req.request_uri, before);
        assert!(req.header.route.is_empty());
    }

    #[test]
    fn strict_router_swap_moves_bottom_route_into_request_uri() {
        let mut req = base_request();
        req.header.push_bottom_route(route("a.example", true));
        req.header.push_bottom_route(route("b.example", true));

        preprocess_route(&mut req, |_| false);

        assert_eq!(req.request_uri.to_string(), Uri::sip("b.example").to_string());
        assert_eq!(req.header.route.len(), 1);
        assert_eq!(req.header.route[0].uri.to_string(), Uri::sip("a.example").to_string());
    }

    #[test]
    fn non_lr_top_route_is_swapped_into_request_uri_and_old_uri_appended() {
        let mut req = Request::new(Method::Invite, Uri::sip("original.example"));
        req.header.cseq = Some(CSeq { seq: 1, method: Method::Invite });
        req.header.push_bottom_route(route("strict.example", false));

        preprocess_route(&mut req, |_| false);

        assert_eq!(req.request_uri.to_string(), Uri::sip("strict.example").to_string());
        assert_eq!(req.header.route.len(), 1);
        assert_eq!(req.header.route[0].uri.to_string(), Uri::sip("original.example").to_string());
    }

    #[test]
    fn rewrite_substitutes_placeholder_via_and_contact() {
        let mut header = Header::new();
        header.push_via(sip_core::types::Via::new("udp", sip_core::types::uri::WILDCARD_V4, "z9hG4bK1"));
        header.contact.push(NameAddr::new(Uri::sip(sip_core::types::uri::WILDCARD_V4)));

        let local: SocketAddr = "192.0.2.10:5060".parse().unwrap();
        rewrite_outbound_header(&mut header, local, Protocol::Udp, None);

        assert_eq!(header.top_via().unwrap().host, "192.0.2.10");
        assert_eq!(header.top_via().unwrap().port, Some(5060));
        assert_eq!(header.contact[0].uri.host.to_string(), "192.0.2.10");
    }
}
