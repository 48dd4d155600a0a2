//! Duplicate suppression for retransmitted deliveries.
//!
//! The delivery channel retransmits until it sees an acknowledgment, so a
//! lost ack makes the receiver see the same delivery twice. The cache keeps
//! the last sequence number per sender and flags a repeat of it.
//!
//! Eviction is FIFO by insertion: a sender that keeps talking is not
//! refreshed, so with a full cache it is eventually evicted and its next
//! delivery counts as [`Admission::New`].

use std::collections::VecDeque;

use gridrelay_topology::NodeAddress;

/// Transport-assigned sequence number, wrapping.
pub type SeqNo = u8;

/// Verdict of the duplicate suppressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Admission {
    /// First delivery seen from this sender
    New,
    /// Same sequence number as the last delivery from this sender
    Duplicate,
    /// Known sender, new sequence number
    Updated,
}

impl Admission {
    /// `New` and `Updated` are processed alike.
    pub fn is_fresh(self) -> bool {
        self != Admission::Duplicate
    }
}

/// Last sequence number seen from one sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub sender: NodeAddress,
    pub last_sequence: SeqNo,
}

/// Bounded sender history with FIFO eviction.
#[derive(Debug, Clone)]
pub struct HistoryCache {
    /// Oldest insertion at the front
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryCache {
    /// Create an empty cache holding at most `capacity` senders (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a delivery and classify it.
    pub fn admit(&mut self, sender: NodeAddress, sequence: SeqNo) -> Admission {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.sender == sender) {
            if entry.last_sequence == sequence {
                return Admission::Duplicate;
            }
            entry.last_sequence = sequence;
            return Admission::Updated;
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            sender,
            last_sequence: sequence,
        });
        Admission::New
    }

    /// Last sequence number recorded for `sender`.
    pub fn last_sequence(&self, sender: NodeAddress) -> Option<SeqNo> {
        self.entries
            .iter()
            .find(|e| e.sender == sender)
            .map(|e| e.last_sequence)
    }

    /// Whether `sender` is currently remembered.
    pub fn contains(&self, sender: NodeAddress) -> bool {
        self.last_sequence(sender).is_some()
    }

    /// Entries from oldest to newest insertion.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
