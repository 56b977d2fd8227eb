//! In-memory test fabric.
//!
//! A shared [`Hub`] of per-destination event queues stands in for the
//! UDP transport; [`MemoryOnion`] does real X25519 + ChaCha20-Poly1305
//! sealing so the ANNOUNCE key exchange is exercised for real, and
//! [`MockRelayServer`] plays the relay-server side of the circuit
//! protocol. Everything is single-threaded and driven by explicit
//! `poll` calls, like the engine itself.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;

use cyxchat_connection::Connection;
use cyxchat_core::proto::msg_type;
use cyxchat_core::transport::relay_server_addr;
use cyxchat_core::{
    CyxError, NatStatus, NatType, NodeId, OnionTransport, RawEvent, RawTransport, Result,
};
use cyxchat_crypto::{open_from_sender, seal_for_recipient, EncryptionKeypair, Identity};
use cyxchat_relay::wire::RelayMessage;
use cyxchat_settings::Settings;

/// Shared datagram fabric: one inbox per destination id
#[derive(Clone, Default)]
pub struct Hub {
    inboxes: Rc<RefCell<HashMap<NodeId, VecDeque<RawEvent>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&self, dest: &NodeId, event: RawEvent) {
        self.inboxes
            .borrow_mut()
            .entry(*dest)
            .or_default()
            .push_back(event);
    }

    pub fn push_datagram(&self, dest: &NodeId, from: NodeId, bytes: Vec<u8>) {
        self.push_event(dest, RawEvent::Datagram { from, bytes });
    }

    pub fn drain(&self, dest: &NodeId) -> Vec<RawEvent> {
        self.inboxes
            .borrow_mut()
            .get_mut(dest)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Let discovery surface each node to the other
    pub fn introduce(&self, a: &NodeId, b: &NodeId) {
        self.push_event(a, RawEvent::PeerSeen { peer: *b });
        self.push_event(b, RawEvent::PeerSeen { peer: *a });
    }
}

/// Raw transport backed by the hub
pub struct MemoryRaw {
    hub: Hub,
    local: NodeId,
    nat: NatStatus,
}

impl MemoryRaw {
    pub fn new(hub: Hub, local: NodeId) -> Self {
        Self {
            hub,
            local,
            nat: NatStatus {
                public_addr: None,
                nat_type: NatType::FullCone,
                stun_complete: true,
            },
        }
    }
}

impl RawTransport for MemoryRaw {
    fn send(&mut self, dest: &NodeId, bytes: &[u8]) -> Result<()> {
        self.hub.push_datagram(dest, self.local, bytes.to_vec());
        Ok(())
    }

    fn poll(&mut self, _now_ms: u64) -> Vec<RawEvent> {
        self.hub.drain(&self.local)
    }

    fn nat_status(&self) -> NatStatus {
        self.nat
    }
}

/// Onion transport doing real sealing. Outbound frames ride the hub as
/// onion-range datagrams: `0x01 | sender_id:32 | sealed`.
pub struct MemoryOnion {
    hub: Hub,
    local_id: NodeId,
    enc: EncryptionKeypair,
    keys: HashMap<NodeId, [u8; 32]>,
    delivered: VecDeque<(NodeId, Vec<u8>)>,
}

impl MemoryOnion {
    pub fn new(hub: Hub, local_id: NodeId, enc: EncryptionKeypair) -> Self {
        Self {
            hub,
            local_id,
            enc,
            keys: HashMap::new(),
            delivered: VecDeque::new(),
        }
    }
}

impl OnionTransport for MemoryOnion {
    fn send_to(&mut self, peer: &NodeId, bytes: &[u8]) -> Result<()> {
        let Some(their_key) = self.keys.get(peer) else {
            return Err(CyxError::Network("no key for peer".into()));
        };
        let sealed = seal_for_recipient(their_key, &self.enc.secret_key_bytes(), bytes)
            .map_err(|e| CyxError::Network(e.to_string()))?;
        let mut frame = Vec::with_capacity(33 + sealed.len());
        frame.push(msg_type::ONION_DATA);
        frame.extend_from_slice(&self.local_id);
        frame.extend_from_slice(&sealed);
        self.hub.push_datagram(peer, self.local_id, frame);
        Ok(())
    }

    fn handle_datagram(&mut self, _from: &NodeId, bytes: &[u8]) {
        if bytes.len() < 33 || bytes[0] != msg_type::ONION_DATA {
            return;
        }
        let mut sender = [0u8; 32];
        sender.copy_from_slice(&bytes[1..33]);
        let Some(their_key) = self.keys.get(&sender) else {
            return;
        };
        let Ok(plain) = open_from_sender(their_key, &self.enc.secret_key_bytes(), &bytes[33..])
        else {
            return;
        };
        self.delivered.push_back((sender, plain));
    }

    fn poll(&mut self, _now_ms: u64) -> Vec<(NodeId, Vec<u8>)> {
        self.delivered.drain(..).collect()
    }

    fn add_peer_key(&mut self, peer: &NodeId, pubkey: [u8; 32]) {
        self.keys.insert(*peer, pubkey);
    }

    fn local_pubkey(&self) -> [u8; 32] {
        self.enc.public_key_bytes()
    }
}

/// The server half of the relay protocol, driven manually
pub struct MockRelayServer {
    hub: Hub,
    pub addr: SocketAddr,
    synthetic: NodeId,
}

impl MockRelayServer {
    pub fn new(hub: Hub, addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("test address");
        let synthetic = relay_server_addr(&addr).expect("ipv4 test address");
        Self {
            hub,
            addr,
            synthetic,
        }
    }

    /// Handle everything queued at the server: ack CONNECTs, forward
    /// DATA envelopes verbatim to their destination
    pub fn process(&self) {
        for ev in self.hub.drain(&self.synthetic) {
            let RawEvent::Datagram { bytes, .. } = ev else {
                continue;
            };
            match RelayMessage::decode(&bytes) {
                Some(RelayMessage::Connect { from, to }) => {
                    let ack = RelayMessage::ConnectAck {
                        peer: to,
                        success: true,
                    }
                    .encode();
                    self.hub.push_datagram(&from, self.synthetic, ack);
                }
                Some(RelayMessage::Data { to, .. }) => {
                    self.hub.push_datagram(&to, self.synthetic, bytes);
                }
                _ => {}
            }
        }
    }
}

/// A full node over the in-memory fabric
pub struct Node {
    pub conn: Connection,
    pub id: NodeId,
}

impl Node {
    pub fn new(hub: &Hub, settings: Settings) -> Self {
        cyxchat_logging::init();
        let identity = Identity::generate();
        let id = identity.node_id();
        let raw = MemoryRaw::new(hub.clone(), id);
        let onion = MemoryOnion::new(hub.clone(), id, identity.encryption.clone());
        let mut conn = Connection::new(settings, &identity, Box::new(raw), Box::new(onion));
        conn.poll(0);
        Self { conn, id }
    }

    pub fn with_defaults(hub: &Hub) -> Self {
        Self::new(hub, Settings::default())
    }
}

/// Introduce two nodes and run the ANNOUNCE exchange to completion.
/// Afterwards both sides hold each other's onion key and a live peer
/// record.
pub fn link(hub: &Hub, a: &mut Node, b: &mut Node, now_ms: u64) {
    hub.introduce(&a.id, &b.id);
    // A and B pick up PeerSeen and announce; two more rounds deliver the
    // announces and the replies
    a.conn.poll(now_ms);
    b.conn.poll(now_ms);
    a.conn.poll(now_ms + 1);
    b.conn.poll(now_ms + 1);
    a.conn.poll(now_ms + 2);
    b.conn.poll(now_ms + 2);
}
