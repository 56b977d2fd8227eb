//! Chat wire framing.
//!
//! Every frame starts with the 10-byte compact header
//! (`type | flags | msg_id`) followed by a type-specific payload. Frames
//! never exceed [`WIRE_MAX_PAYLOAD`] so they fit a one-hop onion
//! datagram. Encoders build complete frames; decoders take the payload
//! after the header and return `None` on any truncation.

use cyxchat_core::proto::{msg_type, HeaderFlags, MessageHeader, COMPACT_HEADER_LEN};
use cyxchat_core::wire::{Reader, Writer};
use cyxchat_core::MsgId;

/// Largest frame handed to the onion transport
pub const WIRE_MAX_PAYLOAD: usize = 250;

/// Text bytes carried per fragment
pub const MAX_CHUNK_TEXT: usize = 80;

/// Largest reassembled message (receive-side buffer cap)
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Unfragmented text budget: frame cap minus header and length byte,
/// minus the 8-byte reply id when one is attached
pub fn text_budget(has_reply: bool) -> usize {
    WIRE_MAX_PAYLOAD - COMPACT_HEADER_LEN - 1 - if has_reply { 8 } else { 0 }
}

fn header(msg_type: u8, flags: HeaderFlags, msg_id: MsgId) -> [u8; COMPACT_HEADER_LEN] {
    MessageHeader::new(msg_type, flags, msg_id, 0).encode_compact()
}

/// Single-frame TEXT: `len:u8, text[len]` plus `reply_to:8` when REPLY set
pub fn encode_text(msg_id: MsgId, text: &[u8], reply_to: Option<&MsgId>) -> Vec<u8> {
    debug_assert!(text.len() <= text_budget(reply_to.is_some()));
    let mut flags = HeaderFlags::ENCRYPTED;
    if reply_to.is_some() {
        flags |= HeaderFlags::REPLY;
    }
    let mut w = Writer::with_capacity(COMPACT_HEADER_LEN + 1 + text.len() + 8);
    w.bytes(&header(msg_type::TEXT, flags, msg_id));
    w.u8(text.len() as u8).bytes(text);
    if let Some(reply) = reply_to {
        w.bytes(reply);
    }
    w.into_vec()
}

/// One TEXT fragment: `frag_idx:u8, total:u8, len:u8, text[len]`
pub fn encode_text_fragment(msg_id: MsgId, frag_idx: u8, total: u8, chunk: &[u8]) -> Vec<u8> {
    debug_assert!(chunk.len() <= MAX_CHUNK_TEXT);
    let flags = HeaderFlags::ENCRYPTED | HeaderFlags::FRAGMENTED;
    let mut w = Writer::with_capacity(COMPACT_HEADER_LEN + 3 + chunk.len());
    w.bytes(&header(msg_type::TEXT, flags, msg_id));
    w.u8(frag_idx).u8(total).u8(chunk.len() as u8).bytes(chunk);
    w.into_vec()
}

/// Decoded unfragmented TEXT payload
pub fn decode_text(flags: HeaderFlags, payload: &[u8]) -> Option<(Vec<u8>, Option<MsgId>)> {
    let mut r = Reader::new(payload);
    let len = r.u8()? as usize;
    let text = r.take(len)?.to_vec();
    let reply_to = if flags.contains(HeaderFlags::REPLY) {
        Some(r.array::<8>()?)
    } else {
        None
    };
    Some((text, reply_to))
}

/// Decoded TEXT fragment payload
pub struct FragmentWire {
    pub frag_idx: u8,
    pub total: u8,
    pub bytes: Vec<u8>,
}

pub fn decode_fragment(payload: &[u8]) -> Option<FragmentWire> {
    let mut r = Reader::new(payload);
    let frag_idx = r.u8()?;
    let total = r.u8()?;
    let len = r.u8()? as usize;
    let bytes = r.take(len)?.to_vec();
    Some(FragmentWire {
        frag_idx,
        total,
        bytes,
    })
}

/// ACK: `ack_target:8, status:u8`
pub fn encode_ack(msg_id: MsgId, target: &MsgId, status: u8) -> Vec<u8> {
    let mut w = Writer::with_capacity(COMPACT_HEADER_LEN + 9);
    w.bytes(&header(msg_type::ACK, HeaderFlags::ENCRYPTED, msg_id));
    w.bytes(target).u8(status);
    w.into_vec()
}

pub fn decode_ack(payload: &[u8]) -> Option<(MsgId, u8)> {
    let mut r = Reader::new(payload);
    let target = r.array::<8>()?;
    let status = r.u8()?;
    Some((target, status))
}

/// READ receipt: `target:8`
pub fn encode_read(msg_id: MsgId, target: &MsgId) -> Vec<u8> {
    let mut w = Writer::with_capacity(COMPACT_HEADER_LEN + 8);
    w.bytes(&header(msg_type::READ, HeaderFlags::ENCRYPTED, msg_id));
    w.bytes(target);
    w.into_vec()
}

pub fn decode_read(payload: &[u8]) -> Option<MsgId> {
    Reader::new(payload).array::<8>()
}

/// TYPING: `is_typing:u8`
pub fn encode_typing(msg_id: MsgId, is_typing: bool) -> Vec<u8> {
    let mut w = Writer::with_capacity(COMPACT_HEADER_LEN + 1);
    w.bytes(&header(msg_type::TYPING, HeaderFlags::EPHEMERAL, msg_id));
    w.u8(is_typing as u8);
    w.into_vec()
}

pub fn decode_typing(payload: &[u8]) -> Option<bool> {
    Reader::new(payload).u8().map(|v| v != 0)
}

/// Longest reaction string that still fits the frame
pub const MAX_REACTION_LEN: usize = WIRE_MAX_PAYLOAD - COMPACT_HEADER_LEN - 10;

/// REACTION: `target:8, rlen:u8, reaction[rlen], remove:u8`
pub fn encode_reaction(msg_id: MsgId, target: &MsgId, reaction: &[u8], remove: bool) -> Vec<u8> {
    debug_assert!(reaction.len() <= MAX_REACTION_LEN);
    let mut w = Writer::with_capacity(COMPACT_HEADER_LEN + 10 + reaction.len());
    w.bytes(&header(msg_type::REACTION, HeaderFlags::ENCRYPTED, msg_id));
    w.bytes(target)
        .u8(reaction.len() as u8)
        .bytes(reaction)
        .u8(remove as u8);
    w.into_vec()
}

pub fn decode_reaction(payload: &[u8]) -> Option<(MsgId, Vec<u8>, bool)> {
    let mut r = Reader::new(payload);
    let target = r.array::<8>()?;
    let len = r.u8()? as usize;
    let reaction = r.take(len)?.to_vec();
    let remove = r.u8()? != 0;
    Some((target, reaction, remove))
}

/// DELETE: `target:8`
pub fn encode_delete(msg_id: MsgId, target: &MsgId) -> Vec<u8> {
    let mut w = Writer::with_capacity(COMPACT_HEADER_LEN + 8);
    w.bytes(&header(msg_type::DELETE, HeaderFlags::ENCRYPTED, msg_id));
    w.bytes(target);
    w.into_vec()
}

pub fn decode_delete(payload: &[u8]) -> Option<MsgId> {
    Reader::new(payload).array::<8>()
}

/// Longest replacement text an EDIT frame can carry
pub const MAX_EDIT_LEN: usize = WIRE_MAX_PAYLOAD - COMPACT_HEADER_LEN - 9;

/// EDIT: `target:8, len:u8, new_text[len]`
pub fn encode_edit(msg_id: MsgId, target: &MsgId, new_text: &[u8]) -> Vec<u8> {
    debug_assert!(new_text.len() <= MAX_EDIT_LEN);
    let mut w = Writer::with_capacity(COMPACT_HEADER_LEN + 9 + new_text.len());
    w.bytes(&header(msg_type::EDIT, HeaderFlags::ENCRYPTED, msg_id));
    w.bytes(target).u8(new_text.len() as u8).bytes(new_text);
    w.into_vec()
}

pub fn decode_edit(payload: &[u8]) -> Option<(MsgId, Vec<u8>)> {
    let mut r = Reader::new(payload);
    let target = r.array::<8>()?;
    let len = r.u8()? as usize;
    let text = r.take(len)?.to_vec();
    Some((target, text))
}

/// Presence frames carry no payload; the type byte says it all
pub fn encode_presence(msg_id: MsgId, online: bool) -> Vec<u8> {
    let t = if online {
        msg_type::PRESENCE_ONLINE
    } else {
        msg_type::PRESENCE_OFFLINE
    };
    header(t, HeaderFlags::EPHEMERAL, msg_id).to_vec()
}

/// Internal queued form of a TEXT payload: 2-byte little-endian length
/// prefix (the 1-byte wire form cannot express reassembled lengths)
pub fn internal_text(text: &[u8]) -> Vec<u8> {
    let mut w = Writer::with_capacity(2 + text.len());
    w.u16_le(text.len() as u16).bytes(text);
    w.into_vec()
}
