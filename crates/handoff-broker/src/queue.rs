//! Waiting queue of sessions that asked for a human.
//!
//! Entries are keyed by a monotonically increasing arrival sequence, so any
//! entry can be removed by session ID without disturbing the order of the
//! rest, and positions are never renumbered in storage.

use std::collections::{BTreeMap, HashMap};

use handoff_core::SessionId;

use crate::session::QueueEntry;

/// Arrival-ordered set of waiting sessions.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    entries: BTreeMap<u64, QueueEntry>,
    index: HashMap<SessionId, u64>,
    next_seq: u64,
}

impl WaitingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the tail.
    ///
    /// Returns `false` (and changes nothing) if the session is already queued.
    pub fn enqueue(&mut self, entry: QueueEntry) -> bool {
        if self.index.contains_key(&entry.session_id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let _ = self.index.insert(entry.session_id.clone(), seq);
        let _ = self.entries.insert(seq, entry);
        true
    }

    /// Remove a session from any position.
    pub fn remove(&mut self, session_id: &SessionId) -> Option<QueueEntry> {
        let seq = self.index.remove(session_id)?;
        self.entries.remove(&seq)
    }

    /// Whether the session is queued.
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.index.contains_key(session_id)
    }

    /// 1-based position of a queued session.
    pub fn position(&self, session_id: &SessionId) -> Option<usize> {
        let seq = *self.index.get(session_id)?;
        Some(self.entries.range(..seq).count() + 1)
    }

    /// Entries in arrival order.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.values().cloned().collect()
    }

    /// Number of queued sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
