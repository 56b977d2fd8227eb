//! Virtual-circuit relay client.
//!
//! Holds at most [`RelayConfig::max_servers`] relay servers and
//! [`RelayConfig::max_circuits`] per-peer circuits. CONNECT is
//! fire-and-forget: data may flow immediately and the first frames can be
//! lost before the server installs the circuit; inbound DATA from a peer
//! is itself proof of circuit. A failed CONNECT_ACK closes the circuit.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, info};

use cyxchat_core::transport::relay_server_addr;
use cyxchat_core::types::short_hex;
use cyxchat_core::{CyxError, NodeId, RawTransport, Result};

use crate::wire::RelayMessage;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub keepalive_ms: u64,
    pub timeout_ms: u64,
    pub max_servers: usize,
    pub max_circuits: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            keepalive_ms: 30_000,
            timeout_ms: 10_000,
            max_servers: 4,
            max_circuits: 16,
        }
    }
}

/// Circuit lifecycle and inbound data, surfaced to the owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    CircuitOpen { peer: NodeId },
    CircuitClosed { peer: NodeId },
    Data { from: NodeId, bytes: Vec<u8> },
}

struct Circuit {
    /// Synthetic server address; absent for circuits learned from
    /// inbound DATA before any server was configured
    server: Option<NodeId>,
    opened_ms: u64,
    last_activity_ms: u64,
    last_keepalive_ms: u64,
    bytes_sent: u32,
    bytes_received: u32,
}

/// Accounting snapshot for one circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitInfo {
    pub peer: NodeId,
    pub opened_ms: u64,
    pub last_activity_ms: u64,
    pub bytes_sent: u32,
    pub bytes_received: u32,
}

pub struct RelayClient {
    local_id: NodeId,
    cfg: RelayConfig,
    servers: Vec<NodeId>,
    circuits: HashMap<NodeId, Circuit>,
}

impl RelayClient {
    pub fn new(local_id: NodeId, cfg: RelayConfig) -> Self {
        Self {
            local_id,
            cfg,
            servers: Vec::new(),
            circuits: HashMap::new(),
        }
    }

    /// Register a relay server by socket address
    pub fn add_server(&mut self, addr: &SocketAddr) -> Result<()> {
        let synthetic = relay_server_addr(addr)?;
        if self.servers.contains(&synthetic) {
            return Err(CyxError::Exists);
        }
        if self.servers.len() >= self.cfg.max_servers {
            return Err(CyxError::Full);
        }
        info!(server = %addr, "relay server added");
        self.servers.push(synthetic);
        Ok(())
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn circuit_count(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_connected(&self, peer: &NodeId) -> bool {
        self.circuits.contains_key(peer)
    }

    pub fn info(&self, peer: &NodeId) -> Option<CircuitInfo> {
        self.circuits.get(peer).map(|c| CircuitInfo {
            peer: *peer,
            opened_ms: c.opened_ms,
            last_activity_ms: c.last_activity_ms,
            bytes_sent: c.bytes_sent,
            bytes_received: c.bytes_received,
        })
    }

    /// Open a circuit to `peer` through the first configured server.
    /// The circuit is usable immediately; no ack is awaited.
    pub fn connect(&mut self, raw: &mut dyn RawTransport, peer: &NodeId, now_ms: u64) -> Result<()> {
        if self.circuits.contains_key(peer) {
            return Err(CyxError::Exists);
        }
        if self.circuits.len() >= self.cfg.max_circuits {
            return Err(CyxError::Full);
        }
        let Some(&server) = self.servers.first() else {
            return Err(CyxError::Network("no relay servers configured".into()));
        };
        let frame = RelayMessage::Connect {
            from: self.local_id,
            to: *peer,
        }
        .encode();
        raw.send(&server, &frame)?;
        debug!(peer = %short_hex(peer), "relay circuit opened");
        self.circuits.insert(
            *peer,
            Circuit {
                server: Some(server),
                opened_ms: now_ms,
                last_activity_ms: now_ms,
                last_keepalive_ms: now_ms,
                bytes_sent: 0,
                bytes_received: 0,
            },
        );
        Ok(())
    }

    /// Forward one end-to-end-encrypted frame through the circuit
    pub fn send(
        &mut self,
        raw: &mut dyn RawTransport,
        peer: &NodeId,
        bytes: &[u8],
        now_ms: u64,
    ) -> Result<()> {
        let circuit = self.circuits.get_mut(peer).ok_or(CyxError::NotFound)?;
        let Some(server) = circuit.server else {
            return Err(CyxError::Network("circuit has no server".into()));
        };
        let frame = RelayMessage::Data {
            from: self.local_id,
            to: *peer,
            payload: bytes.to_vec(),
        }
        .encode();
        raw.send(&server, &frame)?;
        circuit.bytes_sent = circuit.bytes_sent.saturating_add(bytes.len() as u32);
        circuit.last_activity_ms = now_ms;
        Ok(())
    }

    /// Tear down a circuit, notifying the server
    pub fn disconnect(&mut self, raw: &mut dyn RawTransport, peer: &NodeId) -> Result<()> {
        let circuit = self.circuits.remove(peer).ok_or(CyxError::NotFound)?;
        if let Some(server) = circuit.server {
            let frame = RelayMessage::Disconnect {
                from: self.local_id,
                to: *peer,
            }
            .encode();
            // Best effort; the server will time the circuit out anyway
            let _ = raw.send(&server, &frame);
        }
        debug!(peer = %short_hex(peer), "relay circuit closed");
        Ok(())
    }

    /// Feed one relay-range datagram
    pub fn handle_message(&mut self, bytes: &[u8], now_ms: u64) -> Option<RelayEvent> {
        match RelayMessage::decode(bytes)? {
            RelayMessage::Data { from, to, payload } => {
                if to != self.local_id {
                    debug!(to = %short_hex(&to), "relay data for another node dropped");
                    return None;
                }
                self.touch_inbound(&from, payload.len(), now_ms);
                Some(RelayEvent::Data {
                    from,
                    bytes: payload,
                })
            }
            RelayMessage::ConnectAck { peer, success } => {
                if success {
                    if let Some(c) = self.circuits.get_mut(&peer) {
                        c.last_activity_ms = now_ms;
                    }
                    Some(RelayEvent::CircuitOpen { peer })
                } else {
                    self.circuits.remove(&peer)?;
                    Some(RelayEvent::CircuitClosed { peer })
                }
            }
            RelayMessage::Disconnect { from, to } => {
                if to != self.local_id {
                    return None;
                }
                self.circuits.remove(&from)?;
                Some(RelayEvent::CircuitClosed { peer: from })
            }
            RelayMessage::Keepalive { from } => {
                if let Some(c) = self.circuits.get_mut(&from) {
                    c.last_activity_ms = now_ms;
                }
                None
            }
            RelayMessage::Error { code } => {
                debug!(code, "relay error message");
                None
            }
            RelayMessage::Connect { .. } => None,
        }
    }

    /// Emit keepalives for idle circuits and reap dead ones
    pub fn poll(&mut self, raw: &mut dyn RawTransport, now_ms: u64) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        let mut dead = Vec::new();
        for (peer, circuit) in self.circuits.iter_mut() {
            if now_ms.saturating_sub(circuit.last_activity_ms) > self.cfg.timeout_ms {
                dead.push(*peer);
                continue;
            }
            if now_ms.saturating_sub(circuit.last_keepalive_ms) > self.cfg.keepalive_ms {
                if let Some(server) = circuit.server {
                    let frame = RelayMessage::Keepalive {
                        from: self.local_id,
                    }
                    .encode();
                    let _ = raw.send(&server, &frame);
                    circuit.last_keepalive_ms = now_ms;
                }
            }
        }
        for peer in dead {
            self.circuits.remove(&peer);
            debug!(peer = %short_hex(&peer), "relay circuit timed out");
            events.push(RelayEvent::CircuitClosed { peer });
        }
        events
    }

    fn touch_inbound(&mut self, from: &NodeId, len: usize, now_ms: u64) {
        if let Some(c) = self.circuits.get_mut(from) {
            c.bytes_received = c.bytes_received.saturating_add(len as u32);
            c.last_activity_ms = now_ms;
            return;
        }
        // A peer reached us through the relay first; adopt the circuit
        if self.circuits.len() >= self.cfg.max_circuits {
            return;
        }
        self.circuits.insert(
            *from,
            Circuit {
                server: self.servers.first().copied(),
                opened_ms: now_ms,
                last_activity_ms: now_ms,
                last_keepalive_ms: now_ms,
                bytes_sent: 0,
                bytes_received: len as u32,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyxchat_core::transport::{NatStatus, RawEvent};

    const LOCAL: NodeId = [0x01; 32];
    const PEER: NodeId = [0x02; 32];

    #[derive(Default)]
    struct CaptureRaw {
        sent: Vec<(NodeId, Vec<u8>)>,
    }

    impl RawTransport for CaptureRaw {
        fn send(&mut self, dest: &NodeId, bytes: &[u8]) -> Result<()> {
            self.sent.push((*dest, bytes.to_vec()));
            Ok(())
        }

        fn poll(&mut self, _now_ms: u64) -> Vec<RawEvent> {
            Vec::new()
        }

        fn nat_status(&self) -> NatStatus {
            NatStatus::default()
        }
    }

    fn client_with_server() -> (RelayClient, CaptureRaw) {
        let mut client = RelayClient::new(LOCAL, RelayConfig::default());
        client
            .add_server(&"198.51.100.1:7700".parse().unwrap())
            .unwrap();
        (client, CaptureRaw::default())
    }

    #[test]
    fn test_add_server_limits() {
        let mut client = RelayClient::new(LOCAL, RelayConfig::default());
        for i in 0..4u8 {
            client
                .add_server(&format!("198.51.100.{}:7700", i + 1).parse().unwrap())
                .unwrap();
        }
        assert!(matches!(
            client.add_server(&"198.51.100.9:7700".parse().unwrap()),
            Err(CyxError::Full)
        ));
        assert!(matches!(
            client.add_server(&"198.51.100.1:7700".parse().unwrap()),
            Err(CyxError::Exists)
        ));
        assert_eq!(client.server_count(), 4);
    }

    #[test]
    fn test_connect_sends_connect_frame() {
        let (mut client, mut raw) = client_with_server();
        client.connect(&mut raw, &PEER, 1000).unwrap();
        assert!(client.is_connected(&PEER));
        assert_eq!(raw.sent.len(), 1);
        let (dest, frame) = &raw.sent[0];
        assert_eq!(dest[0], cyxchat_core::transport::RELAY_ADDR_SENTINEL);
        assert_eq!(
            RelayMessage::decode(frame),
            Some(RelayMessage::Connect {
                from: LOCAL,
                to: PEER
            })
        );
    }

    #[test]
    fn test_connect_without_server_fails() {
        let mut client = RelayClient::new(LOCAL, RelayConfig::default());
        let mut raw = CaptureRaw::default();
        assert!(matches!(
            client.connect(&mut raw, &PEER, 0),
            Err(CyxError::Network(_))
        ));
    }

    #[test]
    fn test_connect_duplicate_and_full() {
        let (mut client, mut raw) = client_with_server();
        client.connect(&mut raw, &PEER, 0).unwrap();
        assert!(matches!(
            client.connect(&mut raw, &PEER, 0),
            Err(CyxError::Exists)
        ));
        for i in 1..16u8 {
            client.connect(&mut raw, &[0x10 + i; 32], 0).unwrap();
        }
        assert!(matches!(
            client.connect(&mut raw, &[0xEE; 32], 0),
            Err(CyxError::Full)
        ));
        assert_eq!(client.circuit_count(), 16);
    }

    #[test]
    fn test_send_wraps_in_data_frame() {
        let (mut client, mut raw) = client_with_server();
        client.connect(&mut raw, &PEER, 0).unwrap();
        client.send(&mut raw, &PEER, b"payload", 5).unwrap();
        let (_, frame) = &raw.sent[1];
        assert_eq!(
            RelayMessage::decode(frame),
            Some(RelayMessage::Data {
                from: LOCAL,
                to: PEER,
                payload: b"payload".to_vec()
            })
        );
        let info = client.info(&PEER).unwrap();
        assert_eq!(info.bytes_sent, 7);
        assert_eq!(info.last_activity_ms, 5);
    }

    #[test]
    fn test_send_without_circuit_is_not_found() {
        let (mut client, mut raw) = client_with_server();
        assert!(matches!(
            client.send(&mut raw, &PEER, b"x", 0),
            Err(CyxError::NotFound)
        ));
    }

    #[test]
    fn test_inbound_data_for_us() {
        let (mut client, mut raw) = client_with_server();
        client.connect(&mut raw, &PEER, 0).unwrap();
        let frame = RelayMessage::Data {
            from: PEER,
            to: LOCAL,
            payload: b"hello".to_vec(),
        }
        .encode();
        let event = client.handle_message(&frame, 100).unwrap();
        assert_eq!(
            event,
            RelayEvent::Data {
                from: PEER,
                bytes: b"hello".to_vec()
            }
        );
        let info = client.info(&PEER).unwrap();
        assert_eq!(info.bytes_received, 5);
        assert_eq!(info.last_activity_ms, 100);
    }

    #[test]
    fn test_inbound_data_for_other_node_dropped() {
        let (mut client, _raw) = client_with_server();
        let frame = RelayMessage::Data {
            from: PEER,
            to: [0x77; 32],
            payload: b"hello".to_vec(),
        }
        .encode();
        assert!(client.handle_message(&frame, 0).is_none());
    }

    #[test]
    fn test_inbound_data_adopts_circuit() {
        let (mut client, _raw) = client_with_server();
        let frame = RelayMessage::Data {
            from: PEER,
            to: LOCAL,
            payload: b"hi".to_vec(),
        }
        .encode();
        assert!(client.handle_message(&frame, 50).is_some());
        // Inbound data is proof of circuit
        assert!(client.is_connected(&PEER));
    }

    #[test]
    fn test_failed_connect_ack_closes() {
        let (mut client, mut raw) = client_with_server();
        client.connect(&mut raw, &PEER, 0).unwrap();
        let frame = RelayMessage::ConnectAck {
            peer: PEER,
            success: false,
        }
        .encode();
        assert_eq!(
            client.handle_message(&frame, 1),
            Some(RelayEvent::CircuitClosed { peer: PEER })
        );
        assert!(!client.is_connected(&PEER));
    }

    #[test]
    fn test_successful_connect_ack_reports_open() {
        let (mut client, mut raw) = client_with_server();
        client.connect(&mut raw, &PEER, 0).unwrap();
        let frame = RelayMessage::ConnectAck {
            peer: PEER,
            success: true,
        }
        .encode();
        assert_eq!(
            client.handle_message(&frame, 1),
            Some(RelayEvent::CircuitOpen { peer: PEER })
        );
        assert!(client.is_connected(&PEER));
    }

    #[test]
    fn test_remote_disconnect_closes() {
        let (mut client, mut raw) = client_with_server();
        client.connect(&mut raw, &PEER, 0).unwrap();
        let frame = RelayMessage::Disconnect {
            from: PEER,
            to: LOCAL,
        }
        .encode();
        assert_eq!(
            client.handle_message(&frame, 1),
            Some(RelayEvent::CircuitClosed { peer: PEER })
        );
        assert!(!client.is_connected(&PEER));
    }

    #[test]
    fn test_keepalive_emitted_when_idle() {
        let (mut client, mut raw) = client_with_server();
        client.connect(&mut raw, &PEER, 0).unwrap();
        raw.sent.clear();

        // Keep the circuit alive with inbound traffic, then idle past the
        // keepalive threshold but not the circuit timeout
        let data = RelayMessage::Data {
            from: PEER,
            to: LOCAL,
            payload: b"x".to_vec(),
        }
        .encode();
        client.handle_message(&data, 29_000);
        let events = client.poll(&mut raw, 31_000);
        assert!(events.is_empty());
        assert_eq!(raw.sent.len(), 1);
        assert_eq!(
            RelayMessage::decode(&raw.sent[0].1),
            Some(RelayMessage::Keepalive { from: LOCAL })
        );

        // Not re-emitted until another interval passes
        client.handle_message(&data, 32_000);
        let events = client.poll(&mut raw, 33_000);
        assert!(events.is_empty());
        assert_eq!(raw.sent.len(), 1);
    }

    #[test]
    fn test_idle_circuit_times_out() {
        let (mut client, mut raw) = client_with_server();
        client.connect(&mut raw, &PEER, 0).unwrap();
        let events = client.poll(&mut raw, 10_001);
        assert_eq!(events, vec![RelayEvent::CircuitClosed { peer: PEER }]);
        assert!(!client.is_connected(&PEER));
    }

    #[test]
    fn test_disconnect_sends_frame_and_frees() {
        let (mut client, mut raw) = client_with_server();
        client.connect(&mut raw, &PEER, 0).unwrap();
        client.disconnect(&mut raw, &PEER).unwrap();
        assert!(!client.is_connected(&PEER));
        assert_eq!(
            RelayMessage::decode(&raw.sent[1].1),
            Some(RelayMessage::Disconnect {
                from: LOCAL,
                to: PEER
            })
        );
        assert!(matches!(
            client.disconnect(&mut raw, &PEER),
            Err(CyxError::NotFound)
        ));
    }

    #[test]
    fn test_malformed_dropped() {
        let (mut client, _raw) = client_with_server();
        assert!(client.handle_message(&[], 0).is_none());
        assert!(client.handle_message(&[0xC3, 1, 2], 0).is_none());
        assert!(client.handle_message(&[0x10, 0, 0], 0).is_none());
    }
}
