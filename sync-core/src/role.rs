//! Handshake roles.
//!
//! The two ends of a connection run the same state machine and differ only
//! in who speaks first during the handshake and who checks credentials.

/// Which side of the handshake a node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends `connect` as soon as the transport is up (client / active side).
    Initiator,
    /// Waits for `connect`, authenticates the peer and answers `connected`
    /// (server / passive side).
    Responder,
}

impl Role {
    /// Whether this role opens the handshake.
    pub fn sends_connect(&self) -> bool {
        matches!(self, Role::Initiator)
    }

    /// Whether this role verifies the peer's credentials.
    pub fn verifies_credentials(&self) -> bool {
        matches!(self, Role::Responder)
    }
}

/// Outcome of credential verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Peer may synchronize.
    Accept,
    /// Peer is rejected, with a reason reported back to it.
    Reject(String),
}

impl Verdict {
    /// Reject with a reason.
    pub fn reject(reason: impl Into<String>) -> Self {
        Verdict::Reject(reason.into())
    }

    /// Whether the peer was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}
