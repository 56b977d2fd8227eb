//! Cyxchat Connection
//!
//! The composition root: one handle per node presenting a single
//! send/receive surface while hiding whether traffic flows directly or
//! through a relay. Owns the peer table, drives NAT traversal with relay
//! fallback, runs the ANNOUNCE key exchange, and routes every inbound
//! datagram to the right subsystem by its first byte.
//!
//! Single-threaded and cooperative: every externally observable mutation
//! happens inside `poll(now_ms)` or a synchronous application call, and
//! synchronous calls reuse the clock from the latest poll. No locks.

mod peer;
mod status;

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use cyxchat_chat::{Chat, ChatConfig, ChatEvent, QueuedMessage};
use cyxchat_core::proto::{is_dns, is_relay, msg_type};
use cyxchat_core::types::short_hex;
use cyxchat_core::wire::{Reader, Writer};
use cyxchat_core::{
    CyxError, MsgId, NatStatus, NodeId, OnionTransport, RawEvent, RawTransport, Result,
};
use cyxchat_crypto::Identity;
use cyxchat_dns::record::DnsRecord;
use cyxchat_dns::{Dns, DnsConfig, DnsDest, DnsStats};
use cyxchat_relay::{RelayClient, RelayConfig, RelayEvent};
use cyxchat_settings::{parse_addr, OverflowPolicy, Settings};

pub use peer::{ConnectCallback, ConnectOutcome, PeerConn, PeerState};
pub use status::ConnectionStatus;

use peer::{PeerTable, PendingConn};

type DataSink = Box<dyn FnMut(&NodeId, &[u8])>;
type WallClock = Box<dyn Fn() -> u64>;

/// One node's connection manager
pub struct Connection {
    local_id: NodeId,
    settings: Settings,
    raw: Box<dyn RawTransport>,
    onion: Box<dyn OnionTransport>,
    relay: RelayClient,
    dns: Dns,
    chat: Chat,
    peers: PeerTable,
    pending: HashMap<NodeId, PendingConn>,
    data_sink: Option<DataSink>,
    nat: NatStatus,
    bootstrap_connected: bool,
    /// Monotonic clock as of the latest poll; synchronous calls reuse it
    now_ms: u64,
    /// Wall clock for record timestamps, injectable for tests
    wall_clock: WallClock,
}

impl Connection {
    /// Build the manager from its external collaborators. Relay servers
    /// from the settings (including `CYXCHAT_RELAY`) are registered here;
    /// unresolvable entries are skipped with a warning.
    pub fn new(
        settings: Settings,
        identity: &Identity,
        raw: Box<dyn RawTransport>,
        onion: Box<dyn OnionTransport>,
    ) -> Self {
        let local_id = identity.node_id();
        let relay_cfg = RelayConfig {
            keepalive_ms: settings.keepalive_ms,
            timeout_ms: 10_000,
            max_servers: settings.max_relay_servers,
            max_circuits: settings.max_relay_circuits,
        };
        let mut relay = RelayClient::new(local_id, relay_cfg);
        for addr in &settings.relay_servers {
            match parse_addr(addr) {
                Ok(resolved) => {
                    if let Err(err) = relay.add_server(&resolved) {
                        warn!(%addr, %err, "relay server rejected");
                    }
                }
                Err(err) => warn!(%addr, %err, "relay server unresolvable"),
            }
        }

        let dns_cfg = DnsConfig {
            cache_size: settings.dns_cache_size,
            default_ttl_s: settings.dns_default_ttl_s,
            refresh_interval_s: settings.dns_refresh_interval_s,
            gossip_hops: settings.gossip_hops,
            lookup_timeout_ms: settings.lookup_timeout_ms,
            ..DnsConfig::default()
        };
        let dns = Dns::new(
            dns_cfg,
            local_id,
            identity.signing.clone(),
            identity.encryption.public_key_bytes(),
        );

        let chat_cfg = ChatConfig {
            queue_size: settings.recv_queue_size,
            overflow: match settings.recv_overflow {
                OverflowPolicy::DropOldest => cyxchat_chat::OverflowPolicy::DropOldest,
                OverflowPolicy::DropNewest => cyxchat_chat::OverflowPolicy::DropNewest,
            },
            frag_timeout_ms: settings.frag_timeout_ms,
        };

        let max_peers = settings.max_peers;
        Self {
            local_id,
            settings,
            raw,
            onion,
            relay,
            dns,
            chat: Chat::new(chat_cfg),
            peers: PeerTable::new(max_peers),
            pending: HashMap::new(),
            data_sink: None,
            nat: NatStatus::default(),
            bootstrap_connected: false,
            now_ms: 0,
            wall_clock: Box::new(|| {
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64
            }),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Replace the wall clock used for signed record timestamps
    pub fn set_wall_clock(&mut self, clock: WallClock) {
        self.wall_clock = clock;
    }

    /// Sink for application datagrams that are not chat, naming, relay
    /// or onion traffic
    pub fn set_data_sink(&mut self, sink: DataSink) {
        self.data_sink = Some(sink);
    }

    // ==================== lifecycle ====================

    /// Begin connecting to a peer. The callback fires exactly once with
    /// the outcome — unless the attempt is cancelled via `disconnect`.
    pub fn connect(&mut self, peer: &NodeId, cb: ConnectCallback) -> Result<()> {
        if self.pending.contains_key(peer) {
            return Err(CyxError::Exists);
        }
        if let Some(pc) = self.peers.get(peer) {
            if matches!(pc.state, PeerState::Connected | PeerState::Relaying) {
                return Err(CyxError::Exists);
            }
        }
        let stun_complete = self.nat.stun_complete;
        let now_ms = self.now_ms;
        let pc = self.peers.get_or_insert(peer, now_ms)?;
        if stun_complete {
            pc.set_state(PeerState::Connecting);
        } else {
            // NAT discovery still running; the punch timer starts once
            // it resolves
            pc.set_state(PeerState::Discovering);
        }
        debug!(peer = %short_hex(peer), "connect pending");
        self.pending
            .insert(*peer, PendingConn::new(*peer, now_ms, cb));
        Ok(())
    }

    /// Drop a peer. Cancels any pending attempt without invoking its
    /// callback and tears down the relay circuit if one is in use.
    pub fn disconnect(&mut self, peer: &NodeId) -> Result<()> {
        if let Some(pending) = self.pending.remove(peer) {
            pending.cancel();
        }
        let Some(pc) = self.peers.remove(peer) else {
            return Err(CyxError::NotFound);
        };
        if pc.is_relayed {
            let _ = self.relay.disconnect(&mut *self.raw, peer);
        }
        info!(peer = %short_hex(peer), "disconnected");
        Ok(())
    }

    /// Send raw application bytes to a peer over whichever path it uses
    pub fn send(&mut self, peer: &NodeId, bytes: &[u8]) -> Result<()> {
        let Some(pc) = self.peers.get(peer) else {
            return Err(CyxError::NotFound);
        };
        let relayed = pc.is_relayed;
        if relayed {
            self.relay.send(&mut *self.raw, peer, bytes, self.now_ms)?;
        } else {
            self.raw.send(peer, bytes)?;
        }
        let now_ms = self.now_ms;
        if let Some(pc) = self.peers.get_mut(peer) {
            pc.bytes_sent = pc.bytes_sent.saturating_add(bytes.len() as u32);
            pc.last_activity = now_ms;
        }
        Ok(())
    }

    /// Skip hole punching entirely and open a relay circuit now
    pub fn force_relay(&mut self, peer: &NodeId) -> Result<()> {
        let now_ms = self.now_ms;
        self.peers.get_or_insert(peer, now_ms)?;
        self.open_relay_circuit(peer)?;
        if let Some(pending) = self.pending.remove(peer) {
            pending.complete(ConnectOutcome::Relayed);
        }
        Ok(())
    }

    /// Register an additional relay server at runtime
    pub fn add_relay(&mut self, addr: &str) -> Result<()> {
        let resolved =
            parse_addr(addr).map_err(|_| CyxError::InvalidArgument("bad relay address"))?;
        self.relay.add_server(&resolved)
    }

    // ==================== snapshots ====================

    pub fn get_state(&self, peer: &NodeId) -> Result<PeerState> {
        self.peers
            .get(peer)
            .map(|p| p.state)
            .ok_or(CyxError::NotFound)
    }

    pub fn get_info(&self, peer: &NodeId) -> Result<PeerConn> {
        self.peers.get(peer).cloned().ok_or(CyxError::NotFound)
    }

    pub fn is_relayed(&self, peer: &NodeId) -> Result<bool> {
        self.peers
            .get(peer)
            .map(|p| p.is_relayed)
            .ok_or(CyxError::NotFound)
    }

    pub fn get_status(&self) -> ConnectionStatus {
        let mut active = 0;
        let mut relayed = 0;
        for p in self.peers.iter() {
            match p.state {
                PeerState::Connected => active += 1,
                PeerState::Relaying => relayed += 1,
                _ => {}
            }
        }
        ConnectionStatus {
            public_addr: self.nat.public_addr.map(|a| a.to_string()),
            nat_type: self.nat.nat_type,
            stun_complete: self.nat.stun_complete,
            bootstrap_connected: self.bootstrap_connected,
            active,
            relayed,
            dns: self.dns.stats(),
        }
    }

    // ==================== chat facade ====================

    pub fn send_text(&mut self, peer: &NodeId, text: &str, reply_to: Option<MsgId>) -> Result<MsgId> {
        self.chat.send_text(&mut *self.onion, peer, text, reply_to)
    }

    pub fn send_ack(&mut self, peer: &NodeId, target: &MsgId, status: u8) -> Result<MsgId> {
        self.chat.send_ack(&mut *self.onion, peer, target, status)
    }

    pub fn mark_as_read(&mut self, peer: &NodeId, target: &MsgId) -> Result<Option<MsgId>> {
        self.chat.mark_as_read(&mut *self.onion, peer, target)
    }

    pub fn send_typing(&mut self, peer: &NodeId, is_typing: bool) -> Result<MsgId> {
        self.chat.send_typing(&mut *self.onion, peer, is_typing)
    }

    pub fn send_reaction(
        &mut self,
        peer: &NodeId,
        target: &MsgId,
        reaction: &str,
        remove: bool,
    ) -> Result<MsgId> {
        self.chat
            .send_reaction(&mut *self.onion, peer, target, reaction, remove)
    }

    pub fn send_delete(&mut self, peer: &NodeId, target: &MsgId) -> Result<MsgId> {
        self.chat.send_delete(&mut *self.onion, peer, target)
    }

    pub fn send_edit(&mut self, peer: &NodeId, target: &MsgId, new_text: &str) -> Result<MsgId> {
        self.chat.send_edit(&mut *self.onion, peer, target, new_text)
    }

    pub fn send_presence(&mut self, peer: &NodeId, online: bool) -> Result<MsgId> {
        self.chat.send_presence(&mut *self.onion, peer, online)
    }

    /// Pull the next complete inbound chat message
    pub fn recv_next(&mut self) -> Option<QueuedMessage> {
        self.chat.recv_next()
    }

    /// Register the typed chat event sink
    pub fn set_chat_sink(&mut self, sink: Box<dyn FnMut(ChatEvent)>) {
        self.chat.set_event_sink(sink);
    }

    // ==================== naming facade ====================

    pub fn register_name(&mut self, name: &str) -> Result<()> {
        let unix = (self.wall_clock)();
        let now_ms = self.now_ms;
        self.dns.register(name, now_ms, unix)?;
        self.flush_dns();
        Ok(())
    }

    pub fn unregister_name(&mut self) -> Result<()> {
        let unix = (self.wall_clock)();
        let now_ms = self.now_ms;
        self.dns.unregister(now_ms, unix)?;
        self.flush_dns();
        Ok(())
    }

    pub fn refresh_dns(&mut self) -> Result<()> {
        let unix = (self.wall_clock)();
        let now_ms = self.now_ms;
        self.dns.refresh(now_ms, unix)?;
        self.flush_dns();
        Ok(())
    }

    /// Resolve a name; the callback fires exactly once (synchronously
    /// for petname-independent crypto-names and cache hits)
    pub fn lookup(
        &mut self,
        name: &str,
        cb: Box<dyn FnOnce(Option<DnsRecord>)>,
    ) -> Result<()> {
        let now_ms = self.now_ms;
        self.dns.lookup(name, now_ms, cb)?;
        self.flush_dns();
        Ok(())
    }

    pub fn set_petname(&mut self, peer: &NodeId, petname: &str) -> Result<()> {
        self.dns.set_petname(peer, petname)
    }

    pub fn petname(&self, peer: &NodeId) -> Option<&str> {
        self.dns.petname(peer)
    }

    pub fn resolve_petname(&self, petname: &str) -> Option<NodeId> {
        self.dns.resolve_petname(petname)
    }

    pub fn crypto_name(&self) -> String {
        self.dns.crypto_name()
    }

    pub fn dns_stats(&self) -> DnsStats {
        self.dns.stats()
    }

    // ==================== driving ====================

    /// The only driver. Processes transport events, decrypted onion
    /// deliveries, hole-punch and idle timeouts, keepalives and naming
    /// timers. Returns the number of events handled.
    pub fn poll(&mut self, now_ms: u64) -> usize {
        self.now_ms = now_ms;
        let mut events = 0;

        let nat_was_complete = self.nat.stun_complete;
        self.nat = self.raw.nat_status();
        if self.nat.stun_complete && !nat_was_complete {
            self.on_stun_complete();
        }

        for ev in self.raw.poll(now_ms) {
            events += 1;
            match ev {
                RawEvent::Datagram { from, bytes } => self.handle_datagram(&from, &bytes, false),
                RawEvent::PeerSeen { peer } => self.on_peer_seen(&peer),
            }
        }

        events += self.check_hole_punch_timeouts();

        let relay_events = self.relay.poll(&mut *self.raw, now_ms);
        for ev in relay_events {
            events += 1;
            if let RelayEvent::CircuitClosed { peer } = ev {
                self.on_circuit_closed(&peer);
            }
        }

        for (from, payload) in self.onion.poll(now_ms) {
            events += 1;
            self.dispatch_payload(&from, &payload);
        }

        self.chat.poll(now_ms);
        let unix = (self.wall_clock)();
        self.dns.poll(now_ms, unix);
        self.flush_dns();

        events += self.reap_idle_peers();
        events
    }

    // ==================== internals ====================

    /// Demultiplex one raw datagram by its first byte
    fn handle_datagram(&mut self, from: &NodeId, bytes: &[u8], via_relay: bool) {
        let Some(&first) = bytes.first() else {
            return;
        };

        if is_relay(first) {
            if via_relay {
                // A relayed payload may not nest another relay envelope
                return;
            }
            match self.relay.handle_message(bytes, self.now_ms) {
                Some(RelayEvent::Data { from: peer, bytes }) => {
                    self.handle_datagram(&peer, &bytes, true);
                }
                Some(RelayEvent::CircuitClosed { peer }) => self.on_circuit_closed(&peer),
                Some(RelayEvent::CircuitOpen { .. }) | None => {}
            }
            return;
        }

        if first == msg_type::ANNOUNCE {
            self.on_announce(from, bytes);
            self.touch_inbound(from, bytes.len(), via_relay);
            return;
        }

        if first == msg_type::ONION_DATA {
            self.onion.handle_datagram(from, bytes);
            self.touch_inbound(from, bytes.len(), via_relay);
            return;
        }

        self.touch_inbound(from, bytes.len(), via_relay);
        if let Some(sink) = self.data_sink.as_mut() {
            sink(from, bytes);
        }
    }

    /// Decrypted onion payloads route to naming or chat by type byte
    fn dispatch_payload(&mut self, from: &NodeId, payload: &[u8]) {
        let Some(&first) = payload.first() else {
            return;
        };
        if is_dns(first) {
            self.dns.handle_message(from, payload, self.now_ms);
            self.flush_dns();
        } else {
            self.chat.handle_delivery(from, payload, self.now_ms);
        }
    }

    /// Account inbound traffic and promote a connecting peer: the first
    /// datagram from a peer we are connecting to is proof of path.
    fn touch_inbound(&mut self, from: &NodeId, len: usize, via_relay: bool) {
        let now_ms = self.now_ms;
        let Ok(pc) = self.peers.get_or_insert(from, now_ms) else {
            return;
        };
        pc.bytes_received = pc.bytes_received.saturating_add(len as u32);
        pc.last_activity = now_ms;

        match pc.state {
            PeerState::Connecting if !via_relay => {
                pc.set_state(PeerState::Connected);
                pc.connected_at = now_ms;
                pc.is_relayed = false;
                info!(peer = %short_hex(from), "peer connected (direct)");
                if let Some(pending) = self.pending.remove(from) {
                    pending.complete(ConnectOutcome::Direct);
                }
            }
            PeerState::Disconnected => {
                // Inbound traffic from a discovered peer; adopt it
                pc.set_state(PeerState::Connecting);
                if via_relay {
                    pc.set_state(PeerState::Relaying);
                    pc.is_relayed = true;
                } else {
                    pc.set_state(PeerState::Connected);
                }
                pc.connected_at = now_ms;
            }
            _ => {}
        }
    }

    /// ANNOUNCE wire form: `0xA0 | node_id:32 | onion_pubkey:32`
    fn on_announce(&mut self, from: &NodeId, bytes: &[u8]) {
        let mut r = Reader::new(bytes);
        let _ = r.u8();
        let Some(node_id) = r.array::<32>() else {
            return;
        };
        let Some(pubkey) = r.array::<32>() else {
            return;
        };
        if node_id != *from {
            debug!(from = %short_hex(from), "announce id mismatch dropped");
            return;
        }

        let throttle = self.settings.announce_throttle_ms;
        let now_ms = self.now_ms;
        let Ok(pc) = self.peers.get_or_insert(from, now_ms) else {
            return;
        };
        let due = pc
            .last_key_exchange
            .map_or(true, |t| now_ms.saturating_sub(t) >= throttle);
        if due {
            pc.last_key_exchange = Some(now_ms);
            self.onion.add_peer_key(from, pubkey);
            debug!(peer = %short_hex(from), "peer key installed");
        }
        self.send_announce(from);
    }

    /// Send our ANNOUNCE to a peer, throttled per peer
    fn send_announce(&mut self, peer: &NodeId) {
        let throttle = self.settings.announce_throttle_ms;
        let now_ms = self.now_ms;
        let Ok(pc) = self.peers.get_or_insert(peer, now_ms) else {
            return;
        };
        let due = pc
            .last_announce_sent
            .map_or(true, |t| now_ms.saturating_sub(t) >= throttle);
        if !due {
            return;
        }
        pc.last_announce_sent = Some(now_ms);

        let mut w = Writer::with_capacity(65);
        w.u8(msg_type::ANNOUNCE)
            .bytes(&self.local_id)
            .bytes(&self.onion.local_pubkey());
        if let Err(err) = self.raw.send(peer, &w.into_vec()) {
            debug!(peer = %short_hex(peer), %err, "announce send failed");
        }
    }

    /// Discovery surfaced a peer: make sure a record exists and seed the
    /// key exchange
    fn on_peer_seen(&mut self, peer: &NodeId) {
        self.bootstrap_connected = true;
        let now_ms = self.now_ms;
        if self.peers.get_or_insert(peer, now_ms).is_err() {
            return;
        }
        self.send_announce(peer);
    }

    /// STUN resolved: pending peers leave Discovering and their punch
    /// timers start
    fn on_stun_complete(&mut self) {
        let now_ms = self.now_ms;
        for pc in self.peers.iter_mut() {
            if pc.state == PeerState::Discovering {
                pc.set_state(PeerState::Connecting);
                if let Some(pending) = self.pending.get_mut(&pc.peer_id) {
                    pending.started_ms = now_ms;
                }
            }
        }
    }

    /// Hole-punch deadlines: each expired attempt falls back to the
    /// relay exactly once
    fn check_hole_punch_timeouts(&mut self) -> usize {
        let timeout = self.settings.hole_punch_timeout_ms;
        let now_ms = self.now_ms;
        let expired: Vec<NodeId> = self
            .pending
            .iter()
            .filter(|(peer, p)| {
                now_ms.saturating_sub(p.started_ms) >= timeout
                    && self
                        .peers
                        .get(peer)
                        .map_or(true, |pc| pc.state == PeerState::Connecting)
            })
            .map(|(peer, _)| *peer)
            .collect();

        let count = expired.len();
        for peer in expired {
            let Some(pending) = self.pending.remove(&peer) else {
                continue;
            };
            match self.open_relay_circuit(&peer) {
                Ok(()) => {
                    info!(peer = %short_hex(&peer), "hole punch timed out, relaying");
                    pending.complete(ConnectOutcome::Relayed);
                }
                Err(err) => {
                    debug!(peer = %short_hex(&peer), %err, "relay fallback failed");
                    if let Some(pc) = self.peers.get_mut(&peer) {
                        pc.set_state(PeerState::Disconnected);
                    }
                    pending.complete(ConnectOutcome::TimedOut);
                }
            }
        }
        count
    }

    /// Open (or adopt) a relay circuit and mark the peer relayed
    fn open_relay_circuit(&mut self, peer: &NodeId) -> Result<()> {
        match self.relay.connect(&mut *self.raw, peer, self.now_ms) {
            Ok(()) | Err(CyxError::Exists) => {}
            Err(err) => return Err(err),
        }
        if let Some(pc) = self.peers.get_mut(peer) {
            if pc.state == PeerState::Disconnected || pc.state == PeerState::Discovering {
                pc.set_state(PeerState::Connecting);
            }
            pc.set_state(PeerState::Relaying);
            pc.is_relayed = true;
            pc.connected_at = self.now_ms;
        }
        Ok(())
    }

    fn on_circuit_closed(&mut self, peer: &NodeId) {
        if let Some(pc) = self.peers.get_mut(peer) {
            if pc.is_relayed {
                pc.set_state(PeerState::Disconnected);
                pc.is_relayed = false;
                info!(peer = %short_hex(peer), "relay circuit closed");
            }
        }
    }

    /// Drop peers idle past the connection timeout
    fn reap_idle_peers(&mut self) -> usize {
        let timeout = self.settings.conn_timeout_ms;
        let now_ms = self.now_ms;
        let dead: Vec<NodeId> = self
            .peers
            .iter()
            .filter(|p| now_ms.saturating_sub(p.last_activity) >= timeout)
            .map(|p| p.peer_id)
            .collect();
        let count = dead.len();
        for peer in dead {
            if let Some(pc) = self.peers.remove(&peer) {
                if pc.is_relayed {
                    let _ = self.relay.disconnect(&mut *self.raw, &peer);
                }
                debug!(peer = %short_hex(&peer), "peer idle timeout");
            }
        }
        count
    }

    /// Ship queued naming frames: direct answers to their asker, gossip
    /// to every connected peer
    fn flush_dns(&mut self) {
        for (dest, frame) in self.dns.take_outbound() {
            match dest {
                DnsDest::Peer(peer) => {
                    if let Err(err) = self.onion.send_to(&peer, &frame) {
                        debug!(peer = %short_hex(&peer), %err, "naming reply send failed");
                    }
                }
                DnsDest::Broadcast => {
                    for peer in self.peers.connected_ids() {
                        if let Err(err) = self.onion.send_to(&peer, &frame) {
                            debug!(peer = %short_hex(&peer), %err, "gossip send failed");
                        }
                    }
                }
            }
        }
    }
}
