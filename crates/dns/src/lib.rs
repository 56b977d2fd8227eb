//! Cyxchat Dns
//!
//! Gossip-based naming: signed records registered under human-readable
//! names, flooded with a hop limit, looked up asynchronously against a
//! TTL cache. Petnames stay local; crypto-names resolve with no network
//! round trip at all.
//!
//! The engine is transport-free: outbound frames accumulate in an
//! internal queue the owner drains with [`Dns::take_outbound`] and ships
//! over whatever broadcast primitive it has. Inbound frames are fed to
//! [`Dns::handle_message`].
//!
//! Two time domains are kept apart throughout: monotonic milliseconds
//! (`now_ms`) drive timeouts and cache age, wall-clock unix milliseconds
//! (`now_unix_ms`) stamp signed records.

pub mod cache;
pub mod name;
pub mod record;

use serde::Serialize;
use tracing::{debug, info};

use cyxchat_core::types::short_hex;
use cyxchat_core::{CyxError, NodeId, PublicKey, Result};
use cyxchat_crypto::SigningKeypair;

use cache::{CacheEntry, DnsCache};
use name::{
    crypto_name_node_id, is_crypto_name, normalize_name, validate_name, PetnameTable,
};
use record::{DnsMessage, DnsRecord};

/// Tuning knobs for one naming instance
#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub cache_size: usize,
    pub default_ttl_s: u32,
    pub refresh_interval_s: u64,
    pub gossip_hops: u8,
    pub lookup_timeout_ms: u64,
    pub max_pending_lookups: usize,
    /// Advisory reachability hint attached to our own records
    pub stun_hint: String,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            cache_size: 128,
            default_ttl_s: 3600,
            refresh_interval_s: 1800,
            gossip_hops: 3,
            lookup_timeout_ms: 5000,
            max_pending_lookups: 16,
            stun_hint: String::new(),
        }
    }
}

/// Where an outbound frame should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsDest {
    Peer(NodeId),
    Broadcast,
}

/// Counters exported with the status snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct DnsStats {
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub lookups_sent: u64,
    pub lookups_received: u64,
    pub registrations: u64,
    pub gossip_forwards: u64,
}

type LookupCallback = Box<dyn FnOnce(Option<DnsRecord>)>;

struct PendingLookup {
    name: String,
    query_id: u8,
    started_ms: u64,
    cb: LookupCallback,
}

pub struct Dns {
    cfg: DnsConfig,
    node_id: NodeId,
    signing: SigningKeypair,
    enc_pubkey: PublicKey,
    cache: DnsCache,
    petnames: PetnameTable,
    own_record: Option<DnsRecord>,
    last_refresh_ms: u64,
    pending: Vec<PendingLookup>,
    next_query_id: u8,
    outbound: Vec<(DnsDest, Vec<u8>)>,
    stats: DnsStats,
}

impl Dns {
    pub fn new(cfg: DnsConfig, node_id: NodeId, signing: SigningKeypair, enc_pubkey: PublicKey) -> Self {
        let cache = DnsCache::new(cfg.cache_size);
        Self {
            cfg,
            node_id,
            signing,
            enc_pubkey,
            cache,
            petnames: PetnameTable::new(),
            own_record: None,
            last_refresh_ms: 0,
            pending: Vec::new(),
            next_query_id: 0,
            outbound: Vec::new(),
            stats: DnsStats::default(),
        }
    }

    /// Our own crypto-name, resolvable by anyone without the network
    pub fn crypto_name(&self) -> String {
        name::crypto_name_from_pubkey(&self.signing.public_key_bytes())
    }

    // ==================== registration ====================

    /// Sign and flood a record binding `name` to this node. Repeated
    /// registration is allowed; only the timestamp advances.
    pub fn register(&mut self, name: &str, now_ms: u64, now_unix_ms: u64) -> Result<()> {
        let normalized = normalize_name(name);
        if !validate_name(&normalized) {
            return Err(CyxError::InvalidArgument("invalid name"));
        }
        if is_crypto_name(&normalized) {
            return Err(CyxError::InvalidArgument("crypto-name shape is reserved"));
        }
        let record = DnsRecord::signed(
            &self.signing,
            &normalized,
            self.node_id,
            self.enc_pubkey,
            now_unix_ms,
            self.cfg.default_ttl_s,
            &self.cfg.stun_hint,
        );
        info!(name = %normalized, "registering name");
        self.cache.insert(
            normalized,
            CacheEntry {
                record: record.clone(),
                cached_at: now_ms,
                hops: 0,
            },
        );
        self.broadcast_record(&record, 0);
        self.own_record = Some(record);
        self.last_refresh_ms = now_ms;
        self.stats.registrations += 1;
        Ok(())
    }

    /// Flood a zero-TTL record superseding our registration everywhere
    pub fn unregister(&mut self, now_ms: u64, now_unix_ms: u64) -> Result<()> {
        let own = self.own_record.take().ok_or(CyxError::NotFound)?;
        let tombstone = DnsRecord::signed(
            &self.signing,
            &own.name,
            self.node_id,
            self.enc_pubkey,
            now_unix_ms,
            0,
            &self.cfg.stun_hint,
        );
        info!(name = %tombstone.name, "unregistering name");
        self.cache.insert(
            tombstone.name.clone(),
            CacheEntry {
                record: tombstone.clone(),
                cached_at: now_ms,
                hops: 0,
            },
        );
        self.broadcast_record(&tombstone, 0);
        Ok(())
    }

    /// Re-sign the owned record with a fresh timestamp and flood it
    pub fn refresh(&mut self, now_ms: u64, now_unix_ms: u64) -> Result<()> {
        let own = self.own_record.as_ref().ok_or(CyxError::NotFound)?;
        let record = DnsRecord::signed(
            &self.signing,
            &own.name,
            self.node_id,
            self.enc_pubkey,
            now_unix_ms,
            self.cfg.default_ttl_s,
            &self.cfg.stun_hint,
        );
        debug!(name = %record.name, "refreshing registration");
        self.cache.insert(
            record.name.clone(),
            CacheEntry {
                record: record.clone(),
                cached_at: now_ms,
                hops: 0,
            },
        );
        self.broadcast_record(&record, 0);
        self.own_record = Some(record);
        self.last_refresh_ms = now_ms;
        Ok(())
    }

    // ==================== lookup ====================

    /// Resolve a name. Crypto-names and cache hits invoke the callback
    /// synchronously; otherwise a LOOKUP is flooded and the callback
    /// fires exactly once, with `None` after the timeout.
    pub fn lookup(&mut self, name: &str, now_ms: u64, cb: LookupCallback) -> Result<()> {
        let normalized = normalize_name(name);

        if is_crypto_name(&normalized) {
            let record = DnsRecord {
                name: normalized.clone(),
                node_id: crypto_name_node_id(&normalized),
                pubkey: [0u8; 32],
                enc_pubkey: [0u8; 32],
                signature: [0u8; 64],
                timestamp_ms: 0,
                ttl_s: u32::MAX,
                stun_hint: String::new(),
            };
            cb(Some(record));
            return Ok(());
        }

        if let Some(entry) = self.cache.get_fresh(&normalized, now_ms) {
            self.stats.cache_hits += 1;
            let record = entry.record.clone();
            cb(Some(record));
            return Ok(());
        }
        self.stats.cache_misses += 1;

        if self.pending.len() >= self.cfg.max_pending_lookups {
            return Err(CyxError::Full);
        }
        let query_id = self.alloc_query_id()?;
        let frame = DnsMessage::Lookup {
            query_id,
            name: normalized.clone(),
        }
        .encode();
        self.outbound.push((DnsDest::Broadcast, frame));
        self.pending.push(PendingLookup {
            name: normalized,
            query_id,
            started_ms: now_ms,
            cb,
        });
        self.stats.lookups_sent += 1;
        Ok(())
    }

    // ==================== petnames ====================

    pub fn set_petname(&mut self, node_id: &NodeId, petname: &str) -> Result<()> {
        if self.petnames.set(node_id, petname) {
            Ok(())
        } else {
            Err(CyxError::InvalidArgument("bad petname length"))
        }
    }

    pub fn petname(&self, node_id: &NodeId) -> Option<&str> {
        self.petnames.get(node_id)
    }

    pub fn remove_petname(&mut self, node_id: &NodeId) -> bool {
        self.petnames.remove(node_id)
    }

    pub fn resolve_petname(&self, petname: &str) -> Option<NodeId> {
        self.petnames.resolve(petname)
    }

    // ==================== inbound ====================

    /// Feed one naming-range frame received from `from`
    pub fn handle_message(&mut self, from: &NodeId, bytes: &[u8], now_ms: u64) {
        match DnsMessage::decode(bytes) {
            Some(DnsMessage::Register { record, hops }) => {
                self.on_register(from, record, hops, now_ms)
            }
            Some(DnsMessage::Lookup { query_id, name }) => {
                self.on_lookup(from, query_id, &name, now_ms)
            }
            Some(DnsMessage::Response { query_id, record }) => {
                self.on_response(query_id, record, now_ms)
            }
            Some(DnsMessage::Ack { .. }) => {}
            None => {
                debug!(from = %short_hex(from), "malformed naming frame dropped");
            }
        }
    }

    fn on_register(&mut self, from: &NodeId, record: DnsRecord, hops: u8, now_ms: u64) {
        if !record.verify() {
            debug!(from = %short_hex(from), "unverifiable record dropped");
            return;
        }
        let key = normalize_name(&record.name);
        if let Some(cached) = self.cache.get(&key) {
            if cached.record.timestamp_ms >= record.timestamp_ms {
                return;
            }
        }
        debug!(name = %key, hops, "caching gossiped record");
        self.cache.insert(
            key,
            CacheEntry {
                record: record.clone(),
                cached_at: now_ms,
                hops,
            },
        );
        if hops < self.cfg.gossip_hops {
            self.broadcast_record(&record, hops + 1);
            self.stats.gossip_forwards += 1;
        }
    }

    fn on_lookup(&mut self, from: &NodeId, query_id: u8, name: &str, now_ms: u64) {
        self.stats.lookups_received += 1;
        let normalized = normalize_name(name);
        let record = self
            .cache
            .get_fresh(&normalized, now_ms)
            .map(|e| e.record.clone());
        let frame = DnsMessage::Response { query_id, record }.encode();
        // Answers go back to the asker only, never gossiped
        self.outbound.push((DnsDest::Peer(*from), frame));
    }

    fn on_response(&mut self, query_id: u8, record: Option<DnsRecord>, now_ms: u64) {
        let Some(idx) = self.pending.iter().position(|p| p.query_id == query_id) else {
            return;
        };
        let Some(record) = record else {
            // Negative answers are ignored; another peer may still know
            // the name, and the timeout delivers None regardless
            return;
        };
        if !record.verify() {
            debug!("unverifiable lookup response dropped");
            return;
        }
        if normalize_name(&record.name) != self.pending[idx].name {
            return;
        }
        let pending = self.pending.remove(idx);
        self.cache.insert(
            pending.name,
            CacheEntry {
                record: record.clone(),
                cached_at: now_ms,
                hops: 0,
            },
        );
        (pending.cb)(Some(record));
    }

    // ==================== driving ====================

    /// Expire lookups and cache entries, refresh our own registration
    pub fn poll(&mut self, now_ms: u64, now_unix_ms: u64) {
        let timeout = self.cfg.lookup_timeout_ms;
        let mut i = 0;
        while i < self.pending.len() {
            if now_ms.saturating_sub(self.pending[i].started_ms) >= timeout {
                let p = self.pending.remove(i);
                debug!(name = %p.name, "lookup timed out");
                (p.cb)(None);
            } else {
                i += 1;
            }
        }

        self.cache.evict_expired(now_ms);

        if self.own_record.is_some()
            && now_ms.saturating_sub(self.last_refresh_ms) >= self.cfg.refresh_interval_s * 1000
        {
            let _ = self.refresh(now_ms, now_unix_ms);
        }
    }

    /// Drain frames queued for the transport
    pub fn take_outbound(&mut self) -> Vec<(DnsDest, Vec<u8>)> {
        std::mem::take(&mut self.outbound)
    }

    pub fn stats(&self) -> DnsStats {
        let mut stats = self.stats.clone();
        stats.cache_entries = self.cache.len();
        stats
    }

    pub fn pending_lookups(&self) -> usize {
        self.pending.len()
    }

    fn broadcast_record(&mut self, record: &DnsRecord, hops: u8) {
        let frame = DnsMessage::Register {
            record: record.clone(),
            hops,
        }
        .encode();
        self.outbound.push((DnsDest::Broadcast, frame));
    }

    fn alloc_query_id(&mut self) -> Result<u8> {
        for _ in 0..=u8::MAX as usize {
            let id = self.next_query_id;
            self.next_query_id = self.next_query_id.wrapping_add(1);
            if !self.pending.iter().any(|p| p.query_id == id) {
                return Ok(id);
            }
        }
        Err(CyxError::Full)
    }
}
