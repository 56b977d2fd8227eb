//! Connection lifecycle over the in-memory fabric: hole-punch
//! promotion, relay fallback through a mock server, and relayed data
//! re-entering the demultiplexer on the far side.

use std::cell::RefCell;
use std::rc::Rc;

use cyxchat_connection::{ConnectOutcome, PeerState};
use cyxchat_core::NodeId;
use cyxchat_settings::Settings;
use cyxchat_tests::{link, Hub, MockRelayServer, Node};

fn outcome_capture() -> (
    Rc<RefCell<Vec<ConnectOutcome>>>,
    Box<dyn FnOnce(NodeId, ConnectOutcome)>,
) {
    let outcomes: Rc<RefCell<Vec<ConnectOutcome>>> = Rc::default();
    let clone = outcomes.clone();
    (outcomes, Box::new(move |_, o| clone.borrow_mut().push(o)))
}

fn relay_settings(addr: &str) -> Settings {
    let mut settings = Settings::default();
    settings.relay_servers.push(addr.to_string());
    settings
}

#[test]
fn inbound_datagram_completes_hole_punch() {
    let hub = Hub::new();
    let mut a = Node::with_defaults(&hub);
    let b = Node::with_defaults(&hub);

    let (outcomes, cb) = outcome_capture();
    a.conn.connect(&b.id, cb).unwrap();
    assert_eq!(a.conn.get_state(&b.id).unwrap(), PeerState::Connecting);

    // The punch opens: any byte from b proves the path
    hub.push_datagram(&a.id, b.id, vec![0x05, 1, 2]);
    a.conn.poll(1_000);

    assert_eq!(a.conn.get_state(&b.id).unwrap(), PeerState::Connected);
    assert!(!a.conn.is_relayed(&b.id).unwrap());
    assert_eq!(&*outcomes.borrow(), &[ConnectOutcome::Direct]);
}

#[test]
fn hole_punch_timeout_falls_back_to_relay() {
    let hub = Hub::new();
    let server = MockRelayServer::new(hub.clone(), "198.51.100.9:7700");
    let mut a = Node::new(&hub, relay_settings("198.51.100.9:7700"));
    let b = Node::with_defaults(&hub);

    let (outcomes, cb) = outcome_capture();
    a.conn.poll(0);
    a.conn.connect(&b.id, cb).unwrap();

    a.conn.poll(4_999);
    assert!(outcomes.borrow().is_empty());

    a.conn.poll(5_000);
    assert_eq!(a.conn.get_state(&b.id).unwrap(), PeerState::Relaying);
    assert_eq!(&*outcomes.borrow(), &[ConnectOutcome::Relayed]);

    // The server acks the circuit; the state stays Relaying
    server.process();
    a.conn.poll(5_100);
    assert_eq!(a.conn.get_state(&b.id).unwrap(), PeerState::Relaying);
}

#[test]
fn fallback_without_relay_server_times_out() {
    let hub = Hub::new();
    let mut a = Node::with_defaults(&hub);
    let b = Node::with_defaults(&hub);

    let (outcomes, cb) = outcome_capture();
    a.conn.poll(0);
    a.conn.connect(&b.id, cb).unwrap();
    a.conn.poll(5_001);

    assert_eq!(&*outcomes.borrow(), &[ConnectOutcome::TimedOut]);
    assert_eq!(a.conn.get_state(&b.id).unwrap(), PeerState::Disconnected);
}

#[test]
fn relayed_bytes_reach_the_peer() {
    let hub = Hub::new();
    let server = MockRelayServer::new(hub.clone(), "198.51.100.9:7700");
    let mut a = Node::new(&hub, relay_settings("198.51.100.9:7700"));
    let mut b = Node::with_defaults(&hub);

    a.conn.force_relay(&b.id).unwrap();
    server.process(); // deliver the ack

    let seen: Rc<RefCell<Vec<(NodeId, Vec<u8>)>>> = Rc::default();
    let clone = seen.clone();
    b.conn.set_data_sink(Box::new(move |from, bytes| {
        clone.borrow_mut().push((*from, bytes.to_vec()))
    }));

    a.conn.send(&b.id, b"ping").unwrap();
    server.process(); // forward the DATA envelope
    b.conn.poll(100);

    assert_eq!(&*seen.borrow(), &[(a.id, b"ping".to_vec())]);
    // The receiving side adopted a relayed peer record
    assert_eq!(b.conn.get_state(&a.id).unwrap(), PeerState::Relaying);
    assert!(b.conn.is_relayed(&a.id).unwrap());
}

#[test]
fn relayed_peer_never_flips_to_direct() {
    let hub = Hub::new();
    let _server = MockRelayServer::new(hub.clone(), "198.51.100.9:7700");
    let mut a = Node::new(&hub, relay_settings("198.51.100.9:7700"));
    let b = Node::with_defaults(&hub);

    a.conn.force_relay(&b.id).unwrap();
    hub.push_datagram(&a.id, b.id, vec![0x05]);
    a.conn.poll(100);

    assert_eq!(a.conn.get_state(&b.id).unwrap(), PeerState::Relaying);
    assert!(a.conn.is_relayed(&b.id).unwrap());
}

#[test]
fn disconnect_tears_down_relay_circuit() {
    let hub = Hub::new();
    let _server = MockRelayServer::new(hub.clone(), "198.51.100.9:7700");
    let mut a = Node::new(&hub, relay_settings("198.51.100.9:7700"));
    let b = Node::with_defaults(&hub);

    a.conn.force_relay(&b.id).unwrap();
    a.conn.disconnect(&b.id).unwrap();
    assert!(a.conn.get_state(&b.id).is_err());
    // A second disconnect has nothing to remove
    assert!(a.conn.disconnect(&b.id).is_err());
}

#[test]
fn announce_exchange_connects_both_sides() {
    let hub = Hub::new();
    let mut a = Node::with_defaults(&hub);
    let mut b = Node::with_defaults(&hub);
    link(&hub, &mut a, &mut b, 10);

    assert_eq!(a.conn.get_state(&b.id).unwrap(), PeerState::Connected);
    assert_eq!(b.conn.get_state(&a.id).unwrap(), PeerState::Connected);
    assert!(a.conn.get_status().bootstrap_connected);

    // Chat flows immediately in both directions
    a.conn.send_text(&b.id, "east", None).unwrap();
    b.conn.send_text(&a.id, "west", None).unwrap();
    a.conn.poll(100);
    b.conn.poll(100);
    assert_eq!(&b.conn.recv_next().unwrap().data[2..], b"east");
    assert_eq!(&a.conn.recv_next().unwrap().data[2..], b"west");
}

#[test]
fn idle_peer_is_reaped() {
    let hub = Hub::new();
    let mut a = Node::with_defaults(&hub);
    let mut b = Node::with_defaults(&hub);
    link(&hub, &mut a, &mut b, 10);
    assert!(a.conn.get_state(&b.id).is_ok());

    a.conn.poll(12 + 90_000);
    assert!(a.conn.get_state(&b.id).is_err());
}

#[test]
fn status_reflects_peer_mix() {
    let hub = Hub::new();
    let server = MockRelayServer::new(hub.clone(), "198.51.100.9:7700");
    let mut a = Node::new(&hub, relay_settings("198.51.100.9:7700"));
    let mut b = Node::with_defaults(&hub);
    let c = Node::with_defaults(&hub);

    link(&hub, &mut a, &mut b, 10);
    a.conn.force_relay(&c.id).unwrap();
    server.process();

    let status = a.conn.get_status();
    assert!(status.stun_complete);
    assert_eq!(status.active, 1);
    assert_eq!(status.relayed, 1);
}
