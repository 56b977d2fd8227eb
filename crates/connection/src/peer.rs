//! Peer records and the connection state machine.

use std::collections::HashMap;

use serde::Serialize;

use cyxchat_core::{CyxError, NodeId, Result};

/// Per-peer connection state. Transitions are strictly monotonic through
/// `Disconnected → (Discovering →)? Connecting → {Connected | Relaying}
/// → Disconnected`; in particular a relayed peer never becomes directly
/// connected without passing through `Disconnected` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Disconnected,
    Discovering,
    Connecting,
    Relaying,
    Connected,
}

impl PeerState {
    /// Whether moving to `to` is a legal transition
    pub fn can_transition(self, to: PeerState) -> bool {
        use PeerState::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Disconnected, Discovering)
                | (Disconnected, Connecting)
                | (Discovering, Connecting)
                | (Discovering, Disconnected)
                | (Connecting, Connected)
                | (Connecting, Relaying)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Relaying, Disconnected)
        )
    }
}

/// Accounting record for one peer
#[derive(Debug, Clone, Serialize)]
pub struct PeerConn {
    pub peer_id: NodeId,
    pub state: PeerState,
    pub connected_at: u64,
    pub last_activity: u64,
    pub last_keepalive: u64,
    /// Throttle marks for the key exchange; `None` means never
    pub last_announce_sent: Option<u64>,
    pub last_key_exchange: Option<u64>,
    pub bytes_sent: u32,
    pub bytes_received: u32,
    pub is_relayed: bool,
}

impl PeerConn {
    pub fn new(peer_id: NodeId, now_ms: u64) -> Self {
        Self {
            peer_id,
            state: PeerState::Disconnected,
            connected_at: 0,
            last_activity: now_ms,
            last_keepalive: 0,
            last_announce_sent: None,
            last_key_exchange: None,
            bytes_sent: 0,
            bytes_received: 0,
            is_relayed: false,
        }
    }

    /// Apply a transition if legal; illegal moves are refused
    pub fn set_state(&mut self, to: PeerState) -> bool {
        if !self.state.can_transition(to) {
            return false;
        }
        self.state = to;
        true
    }
}

/// The peer table: one record per known peer, bounded
pub struct PeerTable {
    peers: HashMap<NodeId, PeerConn>,
    capacity: usize,
}

impl PeerTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: HashMap::new(),
            capacity,
        }
    }

    /// Fetch the record for a peer, creating it if there is room
    pub fn get_or_insert(&mut self, peer_id: &NodeId, now_ms: u64) -> Result<&mut PeerConn> {
        if !self.peers.contains_key(peer_id) {
            if self.peers.len() >= self.capacity {
                return Err(CyxError::Full);
            }
            self.peers.insert(*peer_id, PeerConn::new(*peer_id, now_ms));
        }
        Ok(self.peers.get_mut(peer_id).expect("just inserted"))
    }

    pub fn get(&self, peer_id: &NodeId) -> Option<&PeerConn> {
        self.peers.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &NodeId) -> Option<&mut PeerConn> {
        self.peers.get_mut(peer_id)
    }

    pub fn remove(&mut self, peer_id: &NodeId) -> Option<PeerConn> {
        self.peers.remove(peer_id)
    }

    pub fn contains(&self, peer_id: &NodeId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerConn> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerConn> {
        self.peers.values_mut()
    }

    /// Peers usable as gossip fan-out targets
    pub fn connected_ids(&self) -> Vec<NodeId> {
        self.peers
            .values()
            .filter(|p| matches!(p.state, PeerState::Connected | PeerState::Relaying))
            .map(|p| p.peer_id)
            .collect()
    }
}

/// How a pending connection finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Hole punch made it; traffic flows directly
    Direct,
    /// Fell back to a relay circuit
    Relayed,
    /// Neither path worked
    TimedOut,
}

pub type ConnectCallback = Box<dyn FnOnce(NodeId, ConnectOutcome)>;

/// A connect() in flight, destroyed exactly once with its callback
/// invoked — except on explicit cancellation
pub struct PendingConn {
    pub peer_id: NodeId,
    pub started_ms: u64,
    pub punch_attempts: u8,
    cb: Option<ConnectCallback>,
}

impl PendingConn {
    pub fn new(peer_id: NodeId, started_ms: u64, cb: ConnectCallback) -> Self {
        Self {
            peer_id,
            started_ms,
            punch_attempts: 0,
            cb: Some(cb),
        }
    }

    /// Fire the completion callback (at most once)
    pub fn complete(mut self, outcome: ConnectOutcome) {
        if let Some(cb) = self.cb.take() {
            cb(self.peer_id, outcome);
        }
    }

    /// Drop without firing; the application chose to cancel
    pub fn cancel(mut self) {
        self.cb = None;
    }
}
