//! Identity and ordering types for logsync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one node in the sync network.
///
/// Any string is accepted; [`NodeId::random`] produces a UUID v4.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a NodeId from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a new random NodeId.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the NodeId as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A position in a replicated log.
///
/// A cursor counts entries: cursor `N` means the first `N` entries of the
/// stream have been sent or applied.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    /// Create a new Cursor with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this Cursor.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Create a Cursor representing "no data yet".
    pub fn zero() -> Self {
        Self(0)
    }

    /// Move the cursor forward by `count` entries, stopping at `u64::MAX`.
    pub fn advance(&self, count: usize) -> Self {
        Self(self.0.saturating_add(count as u64))
    }

    /// Move the cursor forward by `count` entries.
    ///
    /// Returns `None` if the result does not fit in the cursor range.
    pub fn checked_advance(&self, count: usize) -> Option<Self> {
        u64::try_from(count)
            .ok()
            .and_then(|count| self.0.checked_add(count))
            .map(Self)
    }

    /// Number of entries between `earlier` and this cursor (0 if `earlier` is ahead).
    pub fn distance_from(&self, earlier: Cursor) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

/// Protocol version pair.
///
/// Majors must match exactly; a minor mismatch is tolerated and the lower
/// minor becomes the effective one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Breaking-change counter.
    pub major: u32,
    /// Backwards-compatible revision.
    pub minor: u32,
}

impl ProtocolVersion {
    /// The protocol version spoken by this implementation.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 3, minor: 0 };

    /// Create a version pair.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether a peer speaking `other` can talk to us at all.
    pub fn is_compatible(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }

    /// Effective version for a session with a peer speaking `other`.
    ///
    /// Returns `None` when the majors differ.
    pub fn negotiate(&self, other: &ProtocolVersion) -> Option<ProtocolVersion> {
        if !self.is_compatible(other) {
            return None;
        }
        Some(ProtocolVersion::new(self.major, self.minor.min(other.minor)))
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
