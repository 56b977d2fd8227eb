//! Cyxchat Chat
//!
//! The typed messaging layer riding the onion transport: wire framing,
//! fragmentation of oversized texts, reassembly on arrival, a bounded
//! pull queue, and typed push events for in-process integrators.
//!
//! The engine is single-threaded and poll-driven. All sends go through
//! an [`OnionTransport`] handle supplied per call; inbound payloads are
//! fed through [`Chat::handle_delivery`] by whoever polls the transport.

pub mod fragment;
pub mod queue;
pub mod wire;

use tracing::debug;

use cyxchat_core::proto::{is_presence, msg_type, HeaderFlags, MessageHeader};
use cyxchat_core::types::{random_msg_id, short_hex};
use cyxchat_core::{CyxError, MsgId, NodeId, OnionTransport, Result};

use fragment::{ReassemblyTable, REASSEMBLY_SLOTS};
pub use queue::{OverflowPolicy, QueuedMessage};
use queue::RecvQueue;
use wire::{text_budget, MAX_CHUNK_TEXT, MAX_EDIT_LEN, MAX_MESSAGE_LEN, MAX_REACTION_LEN};

/// Tuning knobs for one chat instance
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub queue_size: usize,
    pub overflow: OverflowPolicy,
    pub frag_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            queue_size: 32,
            overflow: OverflowPolicy::DropOldest,
            frag_timeout_ms: 30_000,
        }
    }
}

/// Parsed inbound message, pushed to the registered sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Text {
        from: NodeId,
        msg_id: MsgId,
        text: String,
        reply_to: Option<MsgId>,
    },
    Ack {
        from: NodeId,
        target: MsgId,
        status: u8,
    },
    Read {
        from: NodeId,
        target: MsgId,
    },
    Typing {
        from: NodeId,
        is_typing: bool,
    },
    Reaction {
        from: NodeId,
        target: MsgId,
        reaction: String,
        remove: bool,
    },
    Delete {
        from: NodeId,
        target: MsgId,
    },
    Edit {
        from: NodeId,
        target: MsgId,
        text: String,
    },
    Presence {
        from: NodeId,
        online: bool,
    },
}

type EventSink = Box<dyn FnMut(ChatEvent)>;

/// Read receipts already sent, bounding `mark_as_read` idempotence state
const READ_SENT_CAP: usize = 256;

pub struct Chat {
    cfg: ChatConfig,
    queue: RecvQueue,
    frags: ReassemblyTable,
    sink: Option<EventSink>,
    read_sent: std::collections::VecDeque<MsgId>,
}

impl Chat {
    pub fn new(cfg: ChatConfig) -> Self {
        let queue = RecvQueue::new(cfg.queue_size, cfg.overflow);
        Self {
            cfg,
            queue,
            frags: ReassemblyTable::new(REASSEMBLY_SLOTS),
            sink: None,
            read_sent: std::collections::VecDeque::new(),
        }
    }

    /// Register the push-style event sink. The pull queue keeps working
    /// either way; integrators pick whichever surface suits them.
    pub fn set_event_sink(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    // ==================== sending ====================

    /// Send a text message, fragmenting when it exceeds the single-frame
    /// budget. All fragments share one message id. No retries: the first
    /// transport failure is returned as-is.
    pub fn send_text(
        &mut self,
        onion: &mut dyn OnionTransport,
        peer: &NodeId,
        text: &str,
        reply_to: Option<MsgId>,
    ) -> Result<MsgId> {
        let bytes = text.as_bytes();
        if bytes.is_empty() {
            return Err(CyxError::InvalidArgument("empty text"));
        }
        if bytes.len() > MAX_MESSAGE_LEN {
            return Err(CyxError::InvalidArgument("text exceeds message cap"));
        }
        let msg_id = random_msg_id();

        if bytes.len() <= text_budget(reply_to.is_some()) {
            let frame = wire::encode_text(msg_id, bytes, reply_to.as_ref());
            onion.send_to(peer, &frame)?;
            return Ok(msg_id);
        }

        let total = bytes.len().div_ceil(MAX_CHUNK_TEXT);
        if total > 255 {
            return Err(CyxError::InvalidArgument("too many fragments"));
        }
        for (i, chunk) in bytes.chunks(MAX_CHUNK_TEXT).enumerate() {
            let frame = wire::encode_text_fragment(msg_id, i as u8, total as u8, chunk);
            onion.send_to(peer, &frame)?;
        }
        Ok(msg_id)
    }

    /// Acknowledge delivery of `target`
    pub fn send_ack(
        &mut self,
        onion: &mut dyn OnionTransport,
        peer: &NodeId,
        target: &MsgId,
        status: u8,
    ) -> Result<MsgId> {
        let msg_id = random_msg_id();
        onion.send_to(peer, &wire::encode_ack(msg_id, target, status))?;
        Ok(msg_id)
    }

    /// Send a read receipt for `target`. Idempotent: repeated calls for
    /// the same message id send nothing and return `Ok(None)`.
    pub fn mark_as_read(
        &mut self,
        onion: &mut dyn OnionTransport,
        peer: &NodeId,
        target: &MsgId,
    ) -> Result<Option<MsgId>> {
        if self.read_sent.contains(target) {
            return Ok(None);
        }
        let msg_id = random_msg_id();
        onion.send_to(peer, &wire::encode_read(msg_id, target))?;
        if self.read_sent.len() >= READ_SENT_CAP {
            self.read_sent.pop_front();
        }
        self.read_sent.push_back(*target);
        Ok(Some(msg_id))
    }

    pub fn send_typing(
        &mut self,
        onion: &mut dyn OnionTransport,
        peer: &NodeId,
        is_typing: bool,
    ) -> Result<MsgId> {
        let msg_id = random_msg_id();
        onion.send_to(peer, &wire::encode_typing(msg_id, is_typing))?;
        Ok(msg_id)
    }

    pub fn send_reaction(
        &mut self,
        onion: &mut dyn OnionTransport,
        peer: &NodeId,
        target: &MsgId,
        reaction: &str,
        remove: bool,
    ) -> Result<MsgId> {
        if reaction.is_empty() || reaction.len() > MAX_REACTION_LEN {
            return Err(CyxError::InvalidArgument("bad reaction length"));
        }
        let msg_id = random_msg_id();
        onion.send_to(
            peer,
            &wire::encode_reaction(msg_id, target, reaction.as_bytes(), remove),
        )?;
        Ok(msg_id)
    }

    pub fn send_delete(
        &mut self,
        onion: &mut dyn OnionTransport,
        peer: &NodeId,
        target: &MsgId,
    ) -> Result<MsgId> {
        let msg_id = random_msg_id();
        onion.send_to(peer, &wire::encode_delete(msg_id, target))?;
        Ok(msg_id)
    }

    pub fn send_edit(
        &mut self,
        onion: &mut dyn OnionTransport,
        peer: &NodeId,
        target: &MsgId,
        new_text: &str,
    ) -> Result<MsgId> {
        if new_text.is_empty() || new_text.len() > MAX_EDIT_LEN {
            return Err(CyxError::InvalidArgument("bad edit length"));
        }
        let msg_id = random_msg_id();
        onion.send_to(peer, &wire::encode_edit(msg_id, target, new_text.as_bytes()))?;
        Ok(msg_id)
    }

    pub fn send_presence(
        &mut self,
        onion: &mut dyn OnionTransport,
        peer: &NodeId,
        online: bool,
    ) -> Result<MsgId> {
        let msg_id = random_msg_id();
        onion.send_to(peer, &wire::encode_presence(msg_id, online))?;
        Ok(msg_id)
    }

    // ==================== receiving ====================

    /// Feed one decrypted payload from the onion transport. Malformed
    /// frames are dropped without error.
    pub fn handle_delivery(&mut self, from: &NodeId, bytes: &[u8], now_ms: u64) {
        let Some((header, consumed)) = MessageHeader::decode_compact(bytes) else {
            debug!(from = %short_hex(from), len = bytes.len(), "truncated frame dropped");
            return;
        };
        let payload = &bytes[consumed..];

        match header.msg_type {
            msg_type::TEXT if header.flags.contains(HeaderFlags::FRAGMENTED) => {
                self.on_fragment(from, &header, payload, now_ms);
            }
            msg_type::TEXT => self.on_text(from, &header, payload),
            msg_type::ACK => {
                if let Some((target, status)) = wire::decode_ack(payload) {
                    self.enqueue(from, header.msg_type, payload.to_vec());
                    self.emit(ChatEvent::Ack {
                        from: *from,
                        target,
                        status,
                    });
                }
            }
            msg_type::READ => {
                if let Some(target) = wire::decode_read(payload) {
                    self.enqueue(from, header.msg_type, payload.to_vec());
                    self.emit(ChatEvent::Read {
                        from: *from,
                        target,
                    });
                }
            }
            msg_type::TYPING => {
                if let Some(is_typing) = wire::decode_typing(payload) {
                    self.enqueue(from, header.msg_type, payload.to_vec());
                    self.emit(ChatEvent::Typing {
                        from: *from,
                        is_typing,
                    });
                }
            }
            msg_type::REACTION => {
                if let Some((target, reaction, remove)) = wire::decode_reaction(payload) {
                    let Ok(reaction) = String::from_utf8(reaction) else {
                        return;
                    };
                    self.enqueue(from, header.msg_type, payload.to_vec());
                    self.emit(ChatEvent::Reaction {
                        from: *from,
                        target,
                        reaction,
                        remove,
                    });
                }
            }
            msg_type::DELETE => {
                if let Some(target) = wire::decode_delete(payload) {
                    self.enqueue(from, header.msg_type, payload.to_vec());
                    self.emit(ChatEvent::Delete {
                        from: *from,
                        target,
                    });
                }
            }
            msg_type::EDIT => {
                if let Some((target, text)) = wire::decode_edit(payload) {
                    let Ok(text) = String::from_utf8(text) else {
                        return;
                    };
                    self.enqueue(from, header.msg_type, payload.to_vec());
                    self.emit(ChatEvent::Edit {
                        from: *from,
                        target,
                        text,
                    });
                }
            }
            t if is_presence(t) => {
                let online = t == msg_type::PRESENCE_ONLINE;
                self.enqueue(from, t, Vec::new());
                self.emit(ChatEvent::Presence {
                    from: *from,
                    online,
                });
            }
            t => {
                debug!(from = %short_hex(from), msg_type = t, "unhandled message type dropped");
            }
        }
    }

    /// Pull the next complete inbound message, if any
    pub fn recv_next(&mut self) -> Option<QueuedMessage> {
        self.queue.pop()
    }

    /// Expire stale reassembly entries
    pub fn poll(&mut self, now_ms: u64) {
        let dropped = self.frags.expire(now_ms, self.cfg.frag_timeout_ms);
        if dropped > 0 {
            debug!(dropped, "expired incomplete fragment entries");
        }
    }

    /// Messages lost to queue overflow
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Incomplete reassembly entries currently held
    pub fn pending_fragments(&self) -> usize {
        self.frags.len()
    }

    fn on_text(&mut self, from: &NodeId, header: &MessageHeader, payload: &[u8]) {
        let Some((text, reply_to)) = wire::decode_text(header.flags, payload) else {
            debug!(from = %short_hex(from), "malformed text frame dropped");
            return;
        };
        let Ok(text) = String::from_utf8(text) else {
            return;
        };
        self.enqueue(from, msg_type::TEXT, wire::internal_text(text.as_bytes()));
        self.emit(ChatEvent::Text {
            from: *from,
            msg_id: header.msg_id,
            text,
            reply_to,
        });
    }

    fn on_fragment(&mut self, from: &NodeId, header: &MessageHeader, payload: &[u8], now_ms: u64) {
        let Some(frag) = wire::decode_fragment(payload) else {
            debug!(from = %short_hex(from), "malformed fragment dropped");
            return;
        };
        let Some(complete) = self.frags.insert(
            from,
            &header.msg_id,
            frag.frag_idx,
            frag.total,
            &frag.bytes,
            now_ms,
        ) else {
            return;
        };
        let Ok(text) = String::from_utf8(complete) else {
            return;
        };
        self.enqueue(from, msg_type::TEXT, wire::internal_text(text.as_bytes()));
        self.emit(ChatEvent::Text {
            from: *from,
            msg_id: header.msg_id,
            text,
            reply_to: None,
        });
    }

    fn enqueue(&mut self, from: &NodeId, msg_type: u8, data: Vec<u8>) {
        self.queue.push(QueuedMessage {
            from: *from,
            msg_type,
            data,
        });
    }

    fn emit(&mut self, event: ChatEvent) {
        if let Some(sink) = self.sink.as_mut() {
            sink(event);
        }
    }
}
