//! Transport boundary.
//!
//! The engine never touches sockets. It is driven through two traits: a
//! raw datagram transport (UDP underneath, including peer discovery, hole
//! punching and STUN) and an onion transport providing authenticated
//! end-to-end encrypted delivery between node ids. Both are polled from
//! the single control thread; inbound traffic is returned from `poll`
//! rather than pushed through callbacks.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{CyxError, Result};
use crate::types::{NodeId, PublicKey};

/// NAT classification reported by the raw transport's STUN machinery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatType {
    #[default]
    Unknown,
    Open,
    FullCone,
    Restricted,
    PortRestricted,
    Symmetric,
}

/// Snapshot of NAT discovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NatStatus {
    pub public_addr: Option<SocketAddr>,
    pub nat_type: NatType,
    pub stun_complete: bool,
}

/// Inbound event surfaced by the raw transport
#[derive(Debug, Clone)]
pub enum RawEvent {
    /// A datagram arrived from an authenticated peer
    Datagram { from: NodeId, bytes: Vec<u8> },
    /// Discovery surfaced a new or refreshed peer
    PeerSeen { peer: NodeId },
}

/// The raw UDP datagram transport (external collaborator).
///
/// Discovery, hole punching and STUN live behind this trait; the engine
/// only consumes their results.
pub trait RawTransport {
    /// Send one datagram. The destination is a node id, or a synthetic
    /// relay-server address built with [`relay_server_addr`].
    fn send(&mut self, dest: &NodeId, bytes: &[u8]) -> Result<()>;

    /// Drain pending inbound events
    fn poll(&mut self, now_ms: u64) -> Vec<RawEvent>;

    /// Current NAT discovery snapshot
    fn nat_status(&self) -> NatStatus;
}

/// The onion transport (external collaborator).
///
/// Provides end-to-end encrypted, authenticated delivery of opaque byte
/// strings between node ids. Payloads flagged ENCRYPTED are delivered to
/// the application opaque; the engine never re-decrypts.
pub trait OnionTransport {
    /// Encrypt and send `bytes` to `peer`
    fn send_to(&mut self, peer: &NodeId, bytes: &[u8]) -> Result<()>;

    /// Feed one onion-range datagram received on the raw transport
    fn handle_datagram(&mut self, from: &NodeId, bytes: &[u8]);

    /// Drain decrypted inbound payloads
    fn poll(&mut self, now_ms: u64) -> Vec<(NodeId, Vec<u8>)>;

    /// Install a peer's X25519 key for shared-secret establishment
    fn add_peer_key(&mut self, peer: &NodeId, pubkey: PublicKey);

    /// This node's X25519 public key (announced to peers)
    fn local_pubkey(&self) -> PublicKey;
}

/// First byte marking a synthetic relay-server address
pub const RELAY_ADDR_SENTINEL: u8 = 0xFE;

/// Build the synthetic 32-byte address for a relay server so the single
/// datagram send path accepts it: `sentinel | ip4(4) | port_be(2) | zeros`.
pub fn relay_server_addr(addr: &SocketAddr) -> Result<NodeId> {
    let SocketAddr::V4(v4) = addr else {
        return Err(CyxError::InvalidArgument("relay address must be ipv4"));
    };
    let mut out = [0u8; 32];
    out[0] = RELAY_ADDR_SENTINEL;
    out[1..5].copy_from_slice(&v4.ip().octets());
    out[5..7].copy_from_slice(&v4.port().to_be_bytes());
    Ok(out)
}

/// Whether a 32-byte destination is a synthetic relay-server address
pub fn is_relay_server_addr(id: &NodeId) -> bool {
    id[0] == RELAY_ADDR_SENTINEL
}

/// Recover the socket address from a synthetic relay address
pub fn relay_addr_to_socket(id: &NodeId) -> Option<SocketAddr> {
    if !is_relay_server_addr(id) {
        return None;
    }
    let ip = std::net::Ipv4Addr::new(id[1], id[2], id[3], id[4]);
    let port = u16::from_be_bytes([id[5], id[6]]);
    Some(SocketAddr::from((ip, port)))
}
