//! Wire header and message-type registry.
//!
//! Every protocol message starts with a type byte. The numeric ranges are
//! disjoint so a single receive path can demultiplex on the first byte
//! alone: relay control, discovery announce and onion data are routed at
//! the datagram layer; chat, presence and naming types are routed after
//! onion decryption.

use bitflags::bitflags;

use crate::types::MsgId;

/// Protocol version carried by the expanded header (not on the wire in
/// the compact form; the receiver fills it in)
pub const WIRE_VERSION: u8 = 1;

/// Compact header as sent on the wire: `type(1) | flags(1) | msg_id(8)`
pub const COMPACT_HEADER_LEN: usize = 10;

bitflags! {
    /// Header flag bits. The compact wire form carries the low byte only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u16 {
        const ENCRYPTED  = 1 << 0;
        const COMPRESSED = 1 << 1;
        const FRAGMENTED = 1 << 2;
        const REPLY      = 1 << 3;
        const FORWARD    = 1 << 4;
        const EPHEMERAL  = 1 << 5;
    }
}

/// Message type bytes, grouped by disjoint numeric range.
pub mod msg_type {
    // Onion data riding the raw datagram transport
    pub const ONION_DATA: u8 = 0x01;

    // Direct messaging: 0x10..=0x19
    pub const TEXT: u8 = 0x10;
    pub const ACK: u8 = 0x11;
    pub const READ: u8 = 0x12;
    pub const TYPING: u8 = 0x13;
    pub const FILE_META: u8 = 0x14;
    pub const FILE_CHUNK: u8 = 0x15;
    pub const FILE_ACK: u8 = 0x16;
    pub const REACTION: u8 = 0x17;
    pub const DELETE: u8 = 0x18;
    pub const EDIT: u8 = 0x19;

    // Group messaging: 0x20..=0x27 (reserved for the group layer)
    pub const GROUP_CREATE: u8 = 0x20;
    pub const GROUP_INVITE: u8 = 0x21;
    pub const GROUP_JOIN: u8 = 0x22;
    pub const GROUP_LEAVE: u8 = 0x23;
    pub const GROUP_TEXT: u8 = 0x24;
    pub const GROUP_MEMBER_ADD: u8 = 0x25;
    pub const GROUP_MEMBER_REMOVE: u8 = 0x26;
    pub const GROUP_UPDATE: u8 = 0x27;

    // Presence: 0x30..=0x31
    pub const PRESENCE_ONLINE: u8 = 0x30;
    pub const PRESENCE_OFFLINE: u8 = 0x31;

    // Discovery announce (key exchange seed)
    pub const ANNOUNCE: u8 = 0xA0;

    // Relay control: 0xC0..=0xC5
    pub const RELAY_CONNECT: u8 = 0xC0;
    pub const RELAY_CONNECT_ACK: u8 = 0xC1;
    pub const RELAY_DISCONNECT: u8 = 0xC2;
    pub const RELAY_DATA: u8 = 0xC3;
    pub const RELAY_KEEPALIVE: u8 = 0xC4;
    pub const RELAY_ERROR: u8 = 0xC5;

    // Naming service: 0xD0..=0xD6
    pub const DNS_REGISTER: u8 = 0xD0;
    pub const DNS_REGISTER_ACK: u8 = 0xD1;
    pub const DNS_LOOKUP: u8 = 0xD2;
    pub const DNS_RESPONSE: u8 = 0xD3;
    pub const DNS_UPDATE: u8 = 0xD4;
    pub const DNS_UPDATE_ACK: u8 = 0xD5;
    pub const DNS_ANNOUNCE: u8 = 0xD6;

    // Mail: 0xE0..=0xEA (reserved for the mailbox layer)
    pub const MAIL_STORE: u8 = 0xE0;
    pub const MAIL_FETCH: u8 = 0xE5;
    pub const MAIL_RANGE_END: u8 = 0xEA;
}

/// Direct chat range
pub fn is_direct(t: u8) -> bool {
    (0x10..=0x19).contains(&t)
}

/// Group range (reserved)
pub fn is_group(t: u8) -> bool {
    (0x20..=0x27).contains(&t)
}

/// Presence range
pub fn is_presence(t: u8) -> bool {
    (0x30..=0x31).contains(&t)
}

/// Relay control range
pub fn is_relay(t: u8) -> bool {
    (0xC0..=0xC5).contains(&t)
}

/// Naming service range
pub fn is_dns(t: u8) -> bool {
    (0xD0..=0xD6).contains(&t)
}

/// Mail range (reserved)
pub fn is_mail(t: u8) -> bool {
    (0xE0..=0xEA).contains(&t)
}

/// Expanded message header as used above the wire layer.
///
/// The compact 10-byte wire form drops `version`, `timestamp_ms` and the
/// high flag byte; the receiver reconstructs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u8,
    pub msg_type: u8,
    pub flags: HeaderFlags,
    pub msg_id: MsgId,
    pub timestamp_ms: u64,
}

impl MessageHeader {
    pub fn new(msg_type: u8, flags: HeaderFlags, msg_id: MsgId, timestamp_ms: u64) -> Self {
        Self {
            version: WIRE_VERSION,
            msg_type,
            flags,
            msg_id,
            timestamp_ms,
        }
    }

    /// Serialize the compact form: `type | flags(low byte) | msg_id`
    pub fn encode_compact(&self) -> [u8; COMPACT_HEADER_LEN] {
        let mut out = [0u8; COMPACT_HEADER_LEN];
        out[0] = self.msg_type;
        out[1] = self.flags.bits() as u8;
        out[2..].copy_from_slice(&self.msg_id);
        out
    }

    /// Parse the compact form, returning the header and the bytes consumed.
    /// Unknown flag bits are dropped; a truncated buffer yields `None`.
    pub fn decode_compact(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < COMPACT_HEADER_LEN {
            return None;
        }
        let msg_type = buf[0];
        let flags = HeaderFlags::from_bits_truncate(buf[1] as u16);
        let mut msg_id = [0u8; 8];
        msg_id.copy_from_slice(&buf[2..10]);
        Some((
            Self {
                version: WIRE_VERSION,
                msg_type,
                flags,
                msg_id,
                timestamp_ms: 0,
            },
            COMPACT_HEADER_LEN,
        ))
    }
}
