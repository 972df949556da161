//! Literal end-to-end scenarios from the transport's testable-properties
//! list: STUN demultiplexing and the Route strict-router swap. TCP
//! fragmentation and WebSocket reassembly are covered as channel-level
//! tests in `src/channel/{tcp,ws}.rs`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serial_test::serial;

use sip_core::types::{Method, NameAddr, Param, Request, Uri};
use sip_transport::config::TransportConfig;
use sip_transport::resolver::StaticResolver;
use sip_transport::router;
use sip_transport::transport::Transport;

fn resolver() -> Arc<StaticResolver> {
    Arc::new(StaticResolver::new())
}

/// Scenario 5: a UDP datagram beginning with `0x00 0x01` and a valid STUN
/// length must fire the STUN hook instead of entering the SIP pipeline.
#[tokio::test]
#[serial]
async fn stun_datagram_triggers_hook_not_sip_dispatch() {
    let (transport, mut events) = Transport::new(TransportConfig::default(), resolver());
    let channel_id = transport.bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let target_addr = transport.channel_local_addr(channel_id).unwrap();

    let hook_fired: Arc<Mutex<Option<(SocketAddr, usize)>>> = Arc::new(Mutex::new(None));
    let hook_fired_clone = hook_fired.clone();
    transport.register_stun_hook(Arc::new(move |_local, remote, bytes| {
        *hook_fired_clone.lock().unwrap() = Some((remote, bytes.len()));
    }));

    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sender_addr = sender.local_addr().unwrap();

    let mut stun_binding_request = vec![0x00, 0x01, 0x00, 0x00];
    stun_binding_request.extend_from_slice(&0x2112_A442u32.to_be_bytes());
    stun_binding_request.extend_from_slice(&[0u8; 12]);
    assert_eq!(stun_binding_request.len(), 20);

    sender.send_to(&stun_binding_request, target_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let captured = hook_fired.lock().unwrap().clone();
    let (remote, len) = captured.expect("stun hook should have fired");
    assert_eq!(remote, sender_addr);
    assert_eq!(len, 20);

    assert!(tokio::time::timeout(Duration::from_millis(100), events.recv()).await.is_err());
}

#[test]
fn route_preprocessing_is_idempotent_with_no_route_headers() {
    let mut req = Request::new(Method::Invite, Uri::sip("bob.example"));
    req.header.call_id = Some("idempotence".into());
    let before = req.clone();
    router::preprocess_route(&mut req, |_| false);
    assert_eq!(req, before);
}

/// Scenario 6: Route strict-router swap, both directions.
#[test]
fn strict_router_swap_matches_the_literal_scenario() {
    let mut req = Request::new(Method::Invite, Uri::sip("proxy.example").with_param(Param::flag("lr")));
    req.header.call_id = Some("scenario-6".into());
    req.header.push_bottom_route(NameAddr::new(Uri::sip("a").with_param(Param::flag("lr"))));
    req.header.push_bottom_route(NameAddr::new(Uri::sip("b").with_param(Param::flag("lr"))));

    router::preprocess_route(&mut req, |uri| uri.host.to_string() == "proxy.example");

    assert_eq!(req.request_uri.to_string(), Uri::sip("b").to_string());
    assert_eq!(req.header.route.len(), 1);
    assert_eq!(req.header.route[0].uri.to_string(), Uri::sip("a").to_string());

    let mut strict = Request::new(Method::Invite, Uri::sip("original"));
    strict.header.call_id = Some("scenario-6-strict".into());
    strict.header.push_bottom_route(NameAddr::new(Uri::sip("strict")));

    router::preprocess_route(&mut strict, |_| false);

    assert_eq!(strict.request_uri.to_string(), Uri::sip("strict").to_string());
    assert_eq!(strict.header.route.len(), 1);
    assert_eq!(strict.header.route[0].uri.to_string(), Uri::sip("original").to_string());
}

/// Queue-bound invariant: a saturated inbound queue drops new arrivals
/// rather than growing without limit or blocking the receive task.
#[tokio::test]
#[serial]
async fn inbound_queue_bound_drops_excess_arrivals() {
    let mut config = TransportConfig::default();
    config.max_in_message_queue = 2;
    let (transport, mut events) = Transport::new(config, resolver());
    let channel_id = transport.bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = transport.channel_local_addr(channel_id).unwrap();

    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for i in 0..20 {
        let msg = format!(
            "OPTIONS sip:bob@example.com SIP/2.0\r\nVia: SIP/2.0/UDP h;branch=z9hG4bK{i}\r\nCall-ID: q{i}\r\nCSeq: 1 OPTIONS\r\nFrom: <sip:a@x>;tag=1\r\nTo: <sip:b@x>\r\nContent-Length: 0\r\n\r\n"
        );
        sender.send_to(msg.as_bytes(), addr).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut received = 0;
    while tokio::time::timeout(Duration::from_millis(50), events.recv()).await.is_ok() {
        received += 1;
    }
    assert!(received < 20, "expected some arrivals to be dropped under a saturated queue, got {received}");
}
