//! End-to-end scenarios wiring two independent transport+engine pairs over
//! real loopback UDP sockets (spec.md §8 "Testable Properties").

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;

use sip_core::types::{CSeq, Method, Protocol, Request, StatusCode, Uri, Via};
use sip_transport::config::TransportConfig;
use sip_transport::events::TransportEvent;
use sip_transport::resolver::StaticResolver;
use sip_transport::transport::Transport;

use sip_transaction::builders::build_response;
use sip_transaction::event::TransactionEvent;
use sip_transaction::manager::{TransactionManager, TransactionManagerConfig};
use sip_transaction::state::TransactionState;

/// Glue a transport's inbound event stream into a transaction manager, the
/// way a real process wires the two layers together at startup.
fn spawn_bridge(manager: TransactionManager, mut events: tokio::sync::mpsc::Receiver<TransportEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::RequestReceived { remote, request, .. } => {
                    let _ = manager.handle_inbound_request(*request, remote, Protocol::Udp, None, None).await;
                }
                TransportEvent::ResponseReceived { response, .. } => {
                    manager.handle_inbound_response(*response).await;
                }
            }
        }
    });
}

async fn new_engine() -> (TransactionManager, tokio::sync::mpsc::Receiver<TransactionEvent>, SocketAddr) {
    let resolver: Arc<dyn sip_transport::resolver::Resolver> = Arc::new(StaticResolver::new());
    let (transport, transport_events) = Transport::new(TransportConfig::default(), resolver);
    let channel_id = transport.bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = transport.channel_local_addr(channel_id).unwrap();

    let (manager, tx_events) = TransactionManager::new(transport, TransactionManagerConfig::default());
    spawn_bridge(manager.clone(), transport_events);
    (manager, tx_events, addr)
}

fn invite_with(branch: &str, call_id: &str, to_addr: SocketAddr) -> Request {
    let mut req = Request::new(Method::Invite, Uri::sip(to_addr.ip().to_string()));
    req.header.call_id = Some(call_id.into());
    req.header.cseq = Some(CSeq { seq: 1, method: Method::Invite });
    req.header.push_via(Via::new("udp", "127.0.0.1", branch));
    req
}

/// spec.md §8, scenario 1: an INVITE declined with 603 must drive the
/// client transaction `Calling -> Completed`, the client's generated ACK
/// must carry the INVITE's exact branch, and the server transaction must
/// then observe that ACK and move `Completed -> Confirmed`.
#[tokio::test]
#[serial]
async fn invite_declined_moves_client_to_completed_and_server_to_confirmed() {
    let (client_mgr, mut client_events, _client_addr) = new_engine().await;
    let (server_mgr, mut server_events, server_addr) = new_engine().await;

    let branch = "z9hG4bK5f37455955ca433a902f8fea0ce2dc27";
    let call_id = "8ae45c15425040179a4285d774ccbaf6";
    let invite = invite_with(branch, call_id, server_addr);

    let client_key = client_mgr.create_client_transaction(invite, server_addr, Protocol::Udp, None).await.unwrap();

    let server_key = loop {
        match tokio::time::timeout(Duration::from_secs(2), server_events.recv()).await.unwrap().unwrap() {
            TransactionEvent::NewServerRequest { key, .. } => break key,
            _ => continue,
        }
    };
    assert_eq!(server_key.branch(), branch);

    let original = server_mgr.server_request(&server_key).await.unwrap();
    assert_eq!(original.header.call_id.as_deref(), Some(call_id));
    let decline = build_response(&original, StatusCode::DECLINE);
    server_mgr.send_response(&server_key, decline).await.unwrap();

    loop {
        match tokio::time::timeout(Duration::from_secs(2), client_events.recv()).await.unwrap().unwrap() {
            TransactionEvent::FinalResponse { response, .. } => {
                assert_eq!(response.status_code, StatusCode::DECLINE);
                break;
            }
            _ => continue,
        }
    }
    assert_eq!(client_mgr.client_state(&client_key).await, Some(TransactionState::Completed));

    // The client auto-ACKs a non-2xx final response; give the server side
    // time to observe it and move to Confirmed.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if server_mgr.server_state(&server_key).await == Some(TransactionState::Confirmed) {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("server transaction never reached Confirmed");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// spec.md §8, scenario 2: the engine-generated ACK for a non-2xx final
/// response must be recognized by the peer's engine across two independent
/// transport/manager pairs within 2 seconds.
#[tokio::test]
#[serial]
async fn cross_host_ack_is_recognized_within_two_seconds() {
    let (client_mgr, mut client_events, _client_addr) = new_engine().await;
    let (server_mgr, mut server_events, server_addr) = new_engine().await;

    let invite = invite_with("z9hG4bKcrosshost", "cross-host-call", server_addr);
    client_mgr.create_client_transaction(invite, server_addr, Protocol::Udp, None).await.unwrap();

    let server_key = loop {
        match tokio::time::timeout(Duration::from_secs(2), server_events.recv()).await.unwrap().unwrap() {
            TransactionEvent::NewServerRequest { key, .. } => break key,
            _ => continue,
        }
    };
    let original = server_mgr.server_request(&server_key).await.unwrap();
    let busy = build_response(&original, StatusCode::BUSY_HERE);
    server_mgr.send_response(&server_key, busy).await.unwrap();

    loop {
        match tokio::time::timeout(Duration::from_secs(2), client_events.recv()).await.unwrap().unwrap() {
            TransactionEvent::FinalResponse { .. } => break,
            _ => continue,
        }
    }

    let started = tokio::time::Instant::now();
    loop {
        if server_mgr.server_state(&server_key).await == Some(TransactionState::Confirmed) {
            break;
        }
        assert!(started.elapsed() < Duration::from_secs(2), "ACK not recognized within 2s");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A retransmitted non-2xx final response must be byte-identical across
/// sends — the UAS buffers and replays, it never rebuilds.
#[tokio::test]
#[serial]
async fn server_retransmits_the_same_final_response_on_duplicate_request() {
    let (client_mgr, mut client_events, _client_addr) = new_engine().await;
    let (server_mgr, mut server_events, server_addr) = new_engine().await;

    let invite = invite_with("z9hG4bKdupe", "dupe-call", server_addr);
    let client_key = client_mgr.create_client_transaction(invite.clone(), server_addr, Protocol::Udp, None).await.unwrap();

    let server_key = loop {
        match tokio::time::timeout(Duration::from_secs(2), server_events.recv()).await.unwrap().unwrap() {
            TransactionEvent::NewServerRequest { key, .. } => break key,
            _ => continue,
        }
    };
    let original = server_mgr.server_request(&server_key).await.unwrap();
    let not_found = build_response(&original, StatusCode::new(404).unwrap());
    server_mgr.send_response(&server_key, not_found.clone()).await.unwrap();

    let mut seen = Vec::new();
    while seen.len() < 2 {
        match tokio::time::timeout(Duration::from_secs(2), client_events.recv()).await.unwrap().unwrap() {
            TransactionEvent::FinalResponse { response, .. } => seen.push(response),
            _ => continue,
        }
    }
    assert_eq!(seen[0].status_code, seen[1].status_code);
    assert_eq!(seen[0].header.call_id, seen[1].header.call_id);
    let _ = client_key;
}

/// spec.md §4.5 "Capacity": the manager refuses new transactions past the
/// configured soft limit instead of silently dropping work.
#[tokio::test]
#[serial]
async fn capacity_cap_rejects_new_transactions_once_full() {
    let resolver: Arc<dyn sip_transport::resolver::Resolver> = Arc::new(StaticResolver::new());
    let (transport, _events) = Transport::new(TransportConfig::default(), resolver);
    let channel_id = transport.bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let _ = transport.channel_local_addr(channel_id).unwrap();

    let config = TransactionManagerConfig {
        max_pending_transactions: 1,
        ..TransactionManagerConfig::default()
    };
    let (manager, _rx) = TransactionManager::new(transport, config);

    let dst: SocketAddr = "127.0.0.1:9999".parse().unwrap();
    let first = invite_with("z9hG4bKfirst", "cap-call-1", dst);
    manager.create_client_transaction(first, dst, Protocol::Udp, None).await.unwrap();

    let second = invite_with("z9hG4bKsecond", "cap-call-2", dst);
    let err = manager.create_client_transaction(second, dst, Protocol::Udp, None).await.unwrap_err();
    assert!(matches!(err, sip_transaction::Error::TooManyTransactions(_)));
}

/// spec.md §4.5 "Matching": a CANCEL with no matching INVITE transaction
/// gets a direct 481, never silently dropped.
#[tokio::test]
#[serial]
async fn cancel_with_no_matching_invite_gets_481() {
    let (client_mgr, mut client_events, _client_addr) = new_engine().await;
    let (_server_mgr, _server_events, server_addr) = new_engine().await;

    let mut cancel = Request::new(Method::Cancel, Uri::sip(server_addr.ip().to_string()));
    cancel.header.call_id = Some("orphan-cancel".into());
    cancel.header.cseq = Some(CSeq { seq: 1, method: Method::Cancel });
    cancel.header.push_via(Via::new("udp", "127.0.0.1", "z9hG4bKorphan"));

    let key = client_mgr.create_client_transaction(cancel, server_addr, Protocol::Udp, None).await.unwrap();

    loop {
        match tokio::time::timeout(Duration::from_secs(2), client_events.recv()).await.unwrap().unwrap() {
            TransactionEvent::FinalResponse { key: evt_key, response } => {
                assert_eq!(evt_key, key);
                assert_eq!(response.status_code.as_u16(), 481);
                break;
            }
            _ => continue,
        }
    }
}
