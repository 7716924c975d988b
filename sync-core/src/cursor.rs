//! Cursor tracking for logsync.
//!
//! Each node keeps two counters per peer:
//! - `sent`: how much of the local stream the peer has acknowledged
//! - `received`: how much of the peer's stream has been applied locally
//!
//! Both only move forward. They survive disconnects so a later session
//! resumes where the previous one stopped.

use logsync_types::{Cursor, SyncBatch};

/// Where an incoming batch sits relative to what has already been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPosition {
    /// Everything in the batch was applied before (or the batch is empty).
    Duplicate,
    /// The batch extends the log. The first `skip` entries overlap what
    /// was already applied and must not be applied again.
    Extends {
        /// Number of leading entries already applied.
        skip: usize,
        /// Cursor after the batch has been applied.
        end: Cursor,
    },
    /// The batch starts after the next expected position.
    Gap {
        /// Position the receiver expected the batch to start at.
        expected: Cursor,
    },
    /// The batch would end past the largest representable cursor.
    Overflow,
}

/// The pair of sync counters owned by one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCursors {
    sent: Cursor,
    received: Cursor,
}

impl SyncCursors {
    /// Start from zero on both sides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from persisted counters.
    pub fn resume(sent: Cursor, received: Cursor) -> Self {
        Self { sent, received }
    }

    /// Highest local position acknowledged by the peer.
    pub fn sent(&self) -> Cursor {
        self.sent
    }

    /// Highest peer position applied locally.
    pub fn received(&self) -> Cursor {
        self.received
    }

    /// Classify an incoming batch against `received`.
    pub fn classify(&self, batch: &SyncBatch) -> BatchPosition {
        if batch.since > self.received {
            return BatchPosition::Gap {
                expected: self.received,
            };
        }
        let Some(end) = batch.end() else {
            return BatchPosition::Overflow;
        };
        if end <= self.received {
            return BatchPosition::Duplicate;
        }
        BatchPosition::Extends {
            skip: self.received.distance_from(batch.since) as usize,
            end,
        }
    }

    /// Record that entries up to `end` were applied. Never moves backwards.
    ///
    /// Returns true if the cursor advanced.
    pub fn mark_received(&mut self, end: Cursor) -> bool {
        if end > self.received {
            self.received = end;
            true
        } else {
            false
        }
    }

    /// Record a peer acknowledgement. Never moves backwards.
    ///
    /// Returns true if the cursor advanced.
    pub fn mark_sent(&mut self, acknowledged: Cursor) -> bool {
        if acknowledged > self.sent {
            self.sent = acknowledged;
            true
        } else {
            false
        }
    }
}
