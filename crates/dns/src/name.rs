//! Name grammar, normalization, crypto-names and petnames.
//!
//! Three naming layers coexist: local petnames (never transmitted),
//! gossip-registered global names, and self-certifying crypto-names
//! whose textual form is a digest of the owner's public key.

use std::collections::HashMap;

use cyxchat_core::{NodeId, PublicKey};
use cyxchat_crypto::hash40;

/// Longest name accepted anywhere
pub const MAX_NAME_LEN: usize = 63;

/// Crypto-names are always exactly eight base32 characters (40 bits)
pub const CRYPTO_NAME_LEN: usize = 8;

/// Base32 alphabet used for crypto-names
pub const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Validate a registrable name: starts with a letter, continues with
/// letters, digits or single underscores, at most [`MAX_NAME_LEN`] long.
pub fn validate_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let bytes = name.as_bytes();
    if !bytes[0].is_ascii_alphabetic() {
        return false;
    }
    if !bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'_')
    {
        return false;
    }
    !name.contains("__")
}

/// Canonical form used for every comparison and cache key: strip an
/// optional `.cyx` suffix (any case), lowercase the remainder.
pub fn normalize_name(name: &str) -> String {
    let trimmed = if name.len() >= 4 && name[name.len() - 4..].eq_ignore_ascii_case(".cyx") {
        &name[..name.len() - 4]
    } else {
        name
    };
    trimmed.to_ascii_lowercase()
}

/// Encode 5 bytes as eight base32 characters
pub fn base32_encode(data: &[u8; 5]) -> String {
    let mut acc: u64 = 0;
    for &b in data {
        acc = (acc << 8) | b as u64;
    }
    let mut out = String::with_capacity(CRYPTO_NAME_LEN);
    for i in (0..CRYPTO_NAME_LEN).rev() {
        let idx = ((acc >> (i * 5)) & 0x1F) as usize;
        out.push(BASE32_ALPHABET[idx] as char);
    }
    out
}

/// The self-certifying crypto-name for a public key
pub fn crypto_name_from_pubkey(pubkey: &PublicKey) -> String {
    base32_encode(&hash40(pubkey))
}

/// Whether a normalized name has crypto-name shape
pub fn is_crypto_name(normalized: &str) -> bool {
    normalized.len() == CRYPTO_NAME_LEN
        && normalized.bytes().all(|b| BASE32_ALPHABET.contains(&b))
}

/// The node id a crypto-name resolves to, with no network round trip
pub fn crypto_name_node_id(normalized: &str) -> NodeId {
    cyxchat_crypto::hash32(normalized.as_bytes())
}

/// Local-only aliases. Never serialized to the wire.
#[derive(Default)]
pub struct PetnameTable {
    names: HashMap<NodeId, String>,
}

impl PetnameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the petname for a node. Rejects names over the
    /// length cap; any non-empty string is otherwise allowed.
    pub fn set(&mut self, node_id: &NodeId, petname: &str) -> bool {
        if petname.is_empty() || petname.len() > MAX_NAME_LEN {
            return false;
        }
        self.names.insert(*node_id, petname.to_string());
        true
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&str> {
        self.names.get(node_id).map(String::as_str)
    }

    pub fn remove(&mut self, node_id: &NodeId) -> bool {
        self.names.remove(node_id).is_some()
    }

    /// Reverse lookup by exact petname
    pub fn resolve(&self, petname: &str) -> Option<NodeId> {
        self.names
            .iter()
            .find(|(_, v)| v.as_str() == petname)
            .map(|(k, _)| *k)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
