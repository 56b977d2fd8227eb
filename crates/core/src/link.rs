//! Invite links.
//!
//! The QR / deep-link form used to add a contact out of band:
//! `cyxchat://add/<node_id_hex>/<pubkey_hex>`.

use crate::types::{node_id_from_hex, node_id_to_hex, NodeId, PublicKey};

const LINK_PREFIX: &str = "cyxchat://add/";

/// Build the invite link for a node id and its long-term public key
pub fn generate_invite(node_id: &NodeId, pubkey: &PublicKey) -> String {
    format!(
        "{}{}/{}",
        LINK_PREFIX,
        node_id_to_hex(node_id),
        hex::encode(pubkey)
    )
}

/// Parse an invite link back into `(node_id, pubkey)`
pub fn parse_invite(link: &str) -> Option<(NodeId, PublicKey)> {
    let rest = link.strip_prefix(LINK_PREFIX)?;
    let (node_hex, pk_hex) = rest.split_once('/')?;
    let node_id = node_id_from_hex(node_hex)?;
    let pubkey = node_id_from_hex(pk_hex)?;
    Some((node_id, pubkey))
}
