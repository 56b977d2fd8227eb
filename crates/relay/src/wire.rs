//! Relay control wire messages.
//!
//! Packed byte-exact layouts in the relay type range. The DATA length
//! prefix is network order; everything else is raw bytes.

use cyxchat_core::proto::msg_type;
use cyxchat_core::wire::{Reader, Writer};
use cyxchat_core::NodeId;

/// One parsed relay control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// `type, from:32, to:32`
    Connect { from: NodeId, to: NodeId },
    /// `type, peer:32, success:u8`
    ConnectAck { peer: NodeId, success: bool },
    /// `type, from:32, to:32`
    Disconnect { from: NodeId, to: NodeId },
    /// `type, from:32, to:32, len:u16_be, data[len]`
    Data {
        from: NodeId,
        to: NodeId,
        payload: Vec<u8>,
    },
    /// `type, from:32`
    Keepalive { from: NodeId },
    /// `type, code:u8`
    Error { code: u8 },
}

impl RelayMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            RelayMessage::Connect { from, to } => {
                w.u8(msg_type::RELAY_CONNECT).bytes(from).bytes(to);
            }
            RelayMessage::ConnectAck { peer, success } => {
                w.u8(msg_type::RELAY_CONNECT_ACK)
                    .bytes(peer)
                    .u8(*success as u8);
            }
            RelayMessage::Disconnect { from, to } => {
                w.u8(msg_type::RELAY_DISCONNECT).bytes(from).bytes(to);
            }
            RelayMessage::Data { from, to, payload } => {
                w.u8(msg_type::RELAY_DATA)
                    .bytes(from)
                    .bytes(to)
                    .u16_be(payload.len() as u16)
                    .bytes(payload);
            }
            RelayMessage::Keepalive { from } => {
                w.u8(msg_type::RELAY_KEEPALIVE).bytes(from);
            }
            RelayMessage::Error { code } => {
                w.u8(msg_type::RELAY_ERROR).u8(*code);
            }
        }
        w.into_vec()
    }

    /// Parse one relay control message; `None` for anything truncated or
    /// outside the relay range.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut r = Reader::new(bytes);
        match r.u8()? {
            msg_type::RELAY_CONNECT => Some(RelayMessage::Connect {
                from: r.array::<32>()?,
                to: r.array::<32>()?,
            }),
            msg_type::RELAY_CONNECT_ACK => Some(RelayMessage::ConnectAck {
                peer: r.array::<32>()?,
                success: r.u8()? != 0,
            }),
            msg_type::RELAY_DISCONNECT => Some(RelayMessage::Disconnect {
                from: r.array::<32>()?,
                to: r.array::<32>()?,
            }),
            msg_type::RELAY_DATA => {
                let from = r.array::<32>()?;
                let to = r.array::<32>()?;
                let len = r.u16_be()? as usize;
                let payload = r.take(len)?.to_vec();
                Some(RelayMessage::Data { from, to, payload })
            }
            msg_type::RELAY_KEEPALIVE => Some(RelayMessage::Keepalive {
                from: r.array::<32>()?,
            }),
            msg_type::RELAY_ERROR => Some(RelayMessage::Error { code: r.u8()? }),
            _ => None,
        }
    }
}
