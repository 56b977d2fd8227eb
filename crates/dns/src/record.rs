//! Signed naming records and their wire forms.
//!
//! A record binds a name to `(node_id, signing key, encryption key)` and
//! is immutable once signed; only a strictly newer timestamp supersedes
//! it. Record timestamps and TTLs travel in network order. Two keys ride
//! every record: the Ed25519 key verifies the signature, the X25519 key
//! seeds the onion transport's shared secret.

use cyxchat_core::proto::msg_type;
use cyxchat_core::wire::{Reader, Writer};
use cyxchat_core::{NodeId, PublicKey, Signature};
use cyxchat_crypto::{sign_data, verify_signature, SigningKeypair};

use crate::name::MAX_NAME_LEN;

/// Longest STUN hint carried on a record (`ip:port` text)
pub const MAX_STUN_HINT_LEN: usize = 24;

/// Encoded record body: `name_len | name[63] | node_id | pubkey |
/// enc_pubkey | sig | ts_be | ttl_be | hint_len | hint[24]`
pub const RECORD_BODY_LEN: usize = 1 + MAX_NAME_LEN + 32 + 32 + 32 + 64 + 8 + 4 + 1 + MAX_STUN_HINT_LEN;

/// A signed name binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    /// Normalized name (no suffix, lowercase)
    pub name: String,
    pub node_id: NodeId,
    /// Ed25519 verifying key
    pub pubkey: PublicKey,
    /// X25519 encryption key
    pub enc_pubkey: PublicKey,
    pub signature: Signature,
    /// Wall-clock unix milliseconds at signing time
    pub timestamp_ms: u64,
    /// Lifetime in seconds; zero is an explicit unregister
    pub ttl_s: u32,
    /// Advisory reachability hint, not covered by the signature
    pub stun_hint: String,
}

impl DnsRecord {
    /// Bytes covered by the record signature:
    /// `name || pubkey || enc_pubkey || timestamp_be`
    pub fn signable_data(
        name: &str,
        pubkey: &PublicKey,
        enc_pubkey: &PublicKey,
        timestamp_ms: u64,
    ) -> Vec<u8> {
        let mut data = Vec::with_capacity(name.len() + 32 + 32 + 8);
        data.extend_from_slice(name.as_bytes());
        data.extend_from_slice(pubkey);
        data.extend_from_slice(enc_pubkey);
        data.extend_from_slice(&timestamp_ms.to_be_bytes());
        data
    }

    /// Build and sign a record
    #[allow(clippy::too_many_arguments)]
    pub fn signed(
        keypair: &SigningKeypair,
        name: &str,
        node_id: NodeId,
        enc_pubkey: PublicKey,
        timestamp_ms: u64,
        ttl_s: u32,
        stun_hint: &str,
    ) -> Self {
        let pubkey = keypair.public_key_bytes();
        let data = Self::signable_data(name, &pubkey, &enc_pubkey, timestamp_ms);
        let signature = sign_data(keypair, &data);
        Self {
            name: name.to_string(),
            node_id,
            pubkey,
            enc_pubkey,
            signature,
            timestamp_ms,
            ttl_s,
            stun_hint: stun_hint.to_string(),
        }
    }

    /// Verify the record signature against its own Ed25519 key
    pub fn verify(&self) -> bool {
        let data =
            Self::signable_data(&self.name, &self.pubkey, &self.enc_pubkey, self.timestamp_ms);
        verify_signature(&self.pubkey, &data, &self.signature)
    }

    fn encode_body(&self, w: &mut Writer) {
        debug_assert!(self.name.len() <= MAX_NAME_LEN);
        debug_assert!(self.stun_hint.len() <= MAX_STUN_HINT_LEN);
        w.u8(self.name.len() as u8)
            .fixed(self.name.as_bytes(), MAX_NAME_LEN)
            .bytes(&self.node_id)
            .bytes(&self.pubkey)
            .bytes(&self.enc_pubkey)
            .bytes(&self.signature)
            .u64_be(self.timestamp_ms)
            .u32_be(self.ttl_s)
            .u8(self.stun_hint.len() as u8)
            .fixed(self.stun_hint.as_bytes(), MAX_STUN_HINT_LEN);
    }

    fn decode_body(r: &mut Reader) -> Option<Self> {
        let name_len = r.u8()? as usize;
        if name_len > MAX_NAME_LEN {
            return None;
        }
        let name_field = r.take(MAX_NAME_LEN)?;
        let name = std::str::from_utf8(&name_field[..name_len]).ok()?.to_string();
        let node_id = r.array::<32>()?;
        let pubkey = r.array::<32>()?;
        let enc_pubkey = r.array::<32>()?;
        let signature = r.array::<64>()?;
        let timestamp_ms = r.u64_be()?;
        let ttl_s = r.u32_be()?;
        let hint_len = r.u8()? as usize;
        if hint_len > MAX_STUN_HINT_LEN {
            return None;
        }
        let hint_field = r.take(MAX_STUN_HINT_LEN)?;
        let stun_hint = std::str::from_utf8(&hint_field[..hint_len]).ok()?.to_string();
        Some(Self {
            name,
            node_id,
            pubkey,
            enc_pubkey,
            signature,
            timestamp_ms,
            ttl_s,
            stun_hint,
        })
    }
}

/// One parsed naming-service message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsMessage {
    /// `REGISTER | hops | body` (UPDATE and the periodic self-announce
    /// decode to the same variant; the record content is what matters)
    Register { record: DnsRecord, hops: u8 },
    /// `LOOKUP | query_id | name_len | name[len]`
    Lookup { query_id: u8, name: String },
    /// `RESPONSE | query_id | found | body?`
    Response {
        query_id: u8,
        record: Option<DnsRecord>,
    },
    /// REGISTER_ACK / UPDATE_ACK; carries no state
    Ack { ack_type: u8 },
}

impl DnsMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(2 + RECORD_BODY_LEN);
        match self {
            DnsMessage::Register { record, hops } => {
                w.u8(msg_type::DNS_REGISTER).u8(*hops);
                record.encode_body(&mut w);
            }
            DnsMessage::Lookup { query_id, name } => {
                debug_assert!(name.len() <= MAX_NAME_LEN);
                w.u8(msg_type::DNS_LOOKUP)
                    .u8(*query_id)
                    .u8(name.len() as u8)
                    .bytes(name.as_bytes());
            }
            DnsMessage::Response { query_id, record } => {
                w.u8(msg_type::DNS_RESPONSE)
                    .u8(*query_id)
                    .u8(record.is_some() as u8);
                if let Some(record) = record {
                    record.encode_body(&mut w);
                }
            }
            DnsMessage::Ack { ack_type } => {
                w.u8(*ack_type);
            }
        }
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut r = Reader::new(bytes);
        match r.u8()? {
            msg_type::DNS_REGISTER | msg_type::DNS_UPDATE | msg_type::DNS_ANNOUNCE => {
                let hops = r.u8()?;
                let record = DnsRecord::decode_body(&mut r)?;
                Some(DnsMessage::Register { record, hops })
            }
            msg_type::DNS_LOOKUP => {
                let query_id = r.u8()?;
                let len = r.u8()? as usize;
                if len > MAX_NAME_LEN {
                    return None;
                }
                let name = std::str::from_utf8(r.take(len)?).ok()?.to_string();
                Some(DnsMessage::Lookup { query_id, name })
            }
            msg_type::DNS_RESPONSE => {
                let query_id = r.u8()?;
                let found = r.u8()? != 0;
                let record = if found {
                    Some(DnsRecord::decode_body(&mut r)?)
                } else {
                    None
                };
                Some(DnsMessage::Response { query_id, record })
            }
            t @ (msg_type::DNS_REGISTER_ACK | msg_type::DNS_UPDATE_ACK) => {
                Some(DnsMessage::Ack { ack_type: t })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(keypair: &SigningKeypair) -> DnsRecord {
        DnsRecord::signed(
            keypair,
            "alice",
            [1u8; 32],
            [2u8; 32],
            1_700_000_000_000,
            3600,
            "198.51.100.1:7000",
        )
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = SigningKeypair::generate();
        let rec = record(&keypair);
        assert!(rec.verify());
    }

    #[test]
    fn test_tampered_record_fails_verify() {
        let keypair = SigningKeypair::generate();

        let mut tampered = record(&keypair);
        tampered.name = "mallory".to_string();
        assert!(!tampered.verify());

        let mut tampered = record(&keypair);
        tampered.timestamp_ms += 1;
        assert!(!tampered.verify());

        let mut tampered = record(&keypair);
        tampered.enc_pubkey = [9u8; 32];
        assert!(!tampered.verify());
    }

    #[test]
    fn test_hint_and_ttl_outside_signature() {
        let keypair = SigningKeypair::generate();
        let mut rec = record(&keypair);
        rec.stun_hint = "203.0.113.9:9999".to_string();
        rec.ttl_s = 60;
        // Hint and TTL are advisory; signature still verifies
        assert!(rec.verify());
    }

    #[test]
    fn test_register_roundtrip() {
        let keypair = SigningKeypair::generate();
        let rec = record(&keypair);
        let msg = DnsMessage::Register {
            record: rec.clone(),
            hops: 2,
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 2 + RECORD_BODY_LEN);
        assert_eq!(bytes[0], msg_type::DNS_REGISTER);
        assert_eq!(bytes[1], 2);
        assert_eq!(DnsMessage::decode(&bytes), Some(msg));
    }

    #[test]
    fn test_register_timestamp_is_network_order() {
        let keypair = SigningKeypair::generate();
        let rec = DnsRecord::signed(&keypair, "a", [0u8; 32], [0u8; 32], 0x0102030405060708, 1, "");
        let bytes = DnsMessage::Register {
            record: rec,
            hops: 0,
        }
        .encode();
        // ts sits after: type(1) hops(1) name_len(1) name(63) ids(96) sig(64)
        let off = 2 + 1 + 63 + 96 + 64;
        assert_eq!(
            &bytes[off..off + 8],
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
        // ttl follows, also big-endian
        assert_eq!(&bytes[off + 8..off + 12], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_update_and_announce_decode_as_register() {
        let keypair = SigningKeypair::generate();
        let rec = record(&keypair);
        let mut bytes = DnsMessage::Register {
            record: rec.clone(),
            hops: 1,
        }
        .encode();
        for t in [msg_type::DNS_UPDATE, msg_type::DNS_ANNOUNCE] {
            bytes[0] = t;
            assert_eq!(
                DnsMessage::decode(&bytes),
                Some(DnsMessage::Register {
                    record: rec.clone(),
                    hops: 1
                })
            );
        }
    }

    #[test]
    fn test_lookup_roundtrip() {
        let msg = DnsMessage::Lookup {
            query_id: 42,
            name: "alice".to_string(),
        };
        let bytes = msg.encode();
        assert_eq!(bytes, vec![msg_type::DNS_LOOKUP, 42, 5, b'a', b'l', b'i', b'c', b'e']);
        assert_eq!(DnsMessage::decode(&bytes), Some(msg));
    }

    #[test]
    fn test_response_roundtrip() {
        let keypair = SigningKeypair::generate();
        let found = DnsMessage::Response {
            query_id: 7,
            record: Some(record(&keypair)),
        };
        assert_eq!(DnsMessage::decode(&found.encode()), Some(found.clone()));

        let missing = DnsMessage::Response {
            query_id: 7,
            record: None,
        };
        let bytes = missing.encode();
        assert_eq!(bytes, vec![msg_type::DNS_RESPONSE, 7, 0]);
        assert_eq!(DnsMessage::decode(&bytes), Some(missing));
    }

    #[test]
    fn test_ack_roundtrip() {
        for t in [msg_type::DNS_REGISTER_ACK, msg_type::DNS_UPDATE_ACK] {
            assert_eq!(
                DnsMessage::decode(&[t]),
                Some(DnsMessage::Ack { ack_type: t })
            );
        }
    }

    #[test]
    fn test_decode_truncated() {
        let keypair = SigningKeypair::generate();
        let bytes = DnsMessage::Register {
            record: record(&keypair),
            hops: 0,
        }
        .encode();
        for cut in [1, 2, 10, 100, bytes.len() - 1] {
            assert_eq!(DnsMessage::decode(&bytes[..cut]), None);
        }
    }

    #[test]
    fn test_decode_rejects_oversized_lengths() {
        let keypair = SigningKeypair::generate();
        let mut bytes = DnsMessage::Register {
            record: record(&keypair),
            hops: 0,
        }
        .encode();
        bytes[2] = 64; // name_len beyond the fixed field
        assert_eq!(DnsMessage::decode(&bytes), None);
    }

    #[test]
    fn test_decode_foreign_type() {
        assert_eq!(DnsMessage::decode(&[0x10, 0, 0]), None);
        assert_eq!(DnsMessage::decode(&[]), None);
    }
}
