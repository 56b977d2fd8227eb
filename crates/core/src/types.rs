use rand::rngs::OsRng;
use rand::RngCore;

/// 32-byte node identifier, derived from the node's long-term public key
pub type NodeId = [u8; 32];

/// 32-byte public key
pub type PublicKey = [u8; 32];

/// 64-byte detached signature
pub type Signature = [u8; 64];

/// 8-byte per-message identifier, random, scoped to the sender.
/// Fragments of one logical message all carry the same id.
pub type MsgId = [u8; 8];

/// 8-byte opaque file-transfer token
pub type FileId = [u8; 8];

/// 8-byte opaque group token
pub type GroupId = [u8; 8];

/// 8-byte opaque mailbox token
pub type MailId = [u8; 8];

/// Generate a fresh random message id
pub fn random_msg_id() -> MsgId {
    let mut id = [0u8; 8];
    OsRng.fill_bytes(&mut id);
    id
}

/// Encode a node id as 64 lowercase hex chars
pub fn node_id_to_hex(id: &NodeId) -> String {
    hex::encode(id)
}

/// Parse a node id from its 64-char lowercase hex form
pub fn node_id_from_hex(s: &str) -> Option<NodeId> {
    if s.len() != 64 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    let mut id = [0u8; 32];
    id.copy_from_slice(&bytes);
    Some(id)
}

/// Encode a message id as 16 lowercase hex chars
pub fn msg_id_to_hex(id: &MsgId) -> String {
    hex::encode(id)
}

/// Parse a message id from its 16-char lowercase hex form
pub fn msg_id_from_hex(s: &str) -> Option<MsgId> {
    if s.len() != 16 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    let mut id = [0u8; 8];
    id.copy_from_slice(&bytes);
    Some(id)
}

/// Short hex prefix for log lines (never full ids in logs)
pub fn short_hex(id: &[u8]) -> String {
    hex::encode(&id[..id.len().min(4)])
}
