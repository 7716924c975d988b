//! Outbound flow control for logsync.
//!
//! Stop-and-wait: at most one `sync` batch is unacknowledged at any time.
//! A batch flows through the window in this order:
//! 1. `open()` - the batch was sent, its end cursor is now in flight
//! 2. `acknowledge()` - the peer confirmed some or all of it
//!
//! A disconnect drops the in-flight marker with `reset()`; the next
//! session resends from the acknowledged cursor.

use logsync_types::Cursor;

/// Result of feeding a `synced` acknowledgement into the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Acknowledged position, clamped to what was actually sent.
    pub cursor: Cursor,
    /// True if the whole in-flight batch is now acknowledged.
    pub released: bool,
}

/// Single-slot send window.
#[derive(Debug, Default, Clone)]
pub struct SendWindow {
    /// End cursor of the batch awaiting acknowledgement.
    in_flight: Option<Cursor>,
}

impl SendWindow {
    /// Create an idle window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a new batch may be sent.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// End cursor of the outstanding batch, if any.
    pub fn in_flight(&self) -> Option<Cursor> {
        self.in_flight
    }

    /// Mark a batch ending at `end` as sent.
    ///
    /// Returns false (and changes nothing) if a batch is already in flight.
    pub fn open(&mut self, end: Cursor) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.in_flight = Some(end);
        true
    }

    /// Feed an acknowledgement from the peer.
    ///
    /// Returns `None` when nothing is in flight: an acknowledgement for
    /// data never sent in this session cannot move the sent cursor.
    pub fn acknowledge(&mut self, cursor: Cursor) -> Option<Ack> {
        let end = self.in_flight?;
        let cursor = cursor.min(end);
        let released = cursor >= end;
        if released {
            self.in_flight = None;
        }
        Some(Ack { cursor, released })
    }

    /// Forget the outstanding batch.
    pub fn reset(&mut self) {
        self.in_flight = None;
    }
}
