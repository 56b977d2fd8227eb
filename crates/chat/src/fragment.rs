//! Fragment reassembly.
//!
//! Incomplete messages accumulate in a table keyed by `(sender, msg_id)`.
//! Chunks are appended to the entry buffer in arrival order; a span per
//! fragment index remembers where each landed so the message can be
//! stitched together in index order once every fragment is present.
//! Duplicates are ignored (first arrival wins). Entries expire after a
//! timeout and the oldest entry is evicted when the table is full.

use std::collections::HashMap;

use tracing::debug;

use cyxchat_core::types::short_hex;
use cyxchat_core::{MsgId, NodeId};

use crate::wire::MAX_MESSAGE_LEN;

/// Concurrent reassembly entries kept per chat instance
pub const REASSEMBLY_SLOTS: usize = 32;

#[derive(Debug, Clone, Copy)]
struct Span {
    offset: u16,
    len: u8,
}

struct Entry {
    total: u8,
    spans: Vec<Option<Span>>,
    received: u8,
    buffer: Vec<u8>,
    started_ms: u64,
}

impl Entry {
    fn new(total: u8, now_ms: u64) -> Self {
        Self {
            total,
            spans: vec![None; total as usize],
            received: 0,
            buffer: Vec::new(),
            started_ms: now_ms,
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.total
    }

    fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buffer.len());
        for span in self.spans.iter().flatten() {
            let start = span.offset as usize;
            out.extend_from_slice(&self.buffer[start..start + span.len as usize]);
        }
        out
    }
}

pub struct ReassemblyTable {
    entries: HashMap<(NodeId, MsgId), Entry>,
    capacity: usize,
}

impl ReassemblyTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store one fragment. Returns the reassembled payload once the final
    /// fragment lands; all other outcomes (duplicate, mismatch, overflow)
    /// return `None`.
    pub fn insert(
        &mut self,
        from: &NodeId,
        msg_id: &MsgId,
        frag_idx: u8,
        total: u8,
        bytes: &[u8],
        now_ms: u64,
    ) -> Option<Vec<u8>> {
        if total == 0 || frag_idx >= total {
            return None;
        }
        let key = (*from, *msg_id);
        if !self.entries.contains_key(&key) {
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
            self.entries.insert(key, Entry::new(total, now_ms));
        }
        let entry = self.entries.get_mut(&key)?;
        if entry.total != total {
            // Conflicting fragment counts for one msg_id; first wins
            return None;
        }
        if entry.spans[frag_idx as usize].is_some() {
            // Duplicate arrival; the stored chunk stands
            return None;
        }
        if entry.buffer.len() + bytes.len() > MAX_MESSAGE_LEN {
            debug!(
                from = %short_hex(from),
                msg_id = %short_hex(msg_id),
                "reassembly buffer overflow, dropping entry"
            );
            self.entries.remove(&key);
            return None;
        }

        let offset = entry.buffer.len() as u16;
        entry.buffer.extend_from_slice(bytes);
        entry.spans[frag_idx as usize] = Some(Span {
            offset,
            len: bytes.len() as u8,
        });
        entry.received += 1;

        if entry.is_complete() {
            let out = entry.assemble();
            self.entries.remove(&key);
            Some(out)
        } else {
            None
        }
    }

    /// Drop incomplete entries older than `timeout_ms`
    pub fn expire(&mut self, now_ms: u64, timeout_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now_ms.saturating_sub(e.started_ms) < timeout_ms);
        before - self.entries.len()
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.started_ms)
            .map(|(k, _)| *k)
        {
            self.entries.remove(&key);
        }
    }
}
