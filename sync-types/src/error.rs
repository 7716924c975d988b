//! Error types for logsync.
//!
//! [`SyncError`] is the protocol error taxonomy shared by both peers: every
//! kind has a stable wire name, so an error detected on one side can be
//! reported to the other in an `error` message. [`WireError`] covers local
//! encode/decode failures.

use std::fmt;
use thiserror::Error;

/// Closed set of protocol error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Peer speaks an incompatible protocol major version.
    WrongProtocol,
    /// Peer announced a different sub-protocol.
    WrongSubprotocol,
    /// Credential verification rejected the peer.
    WrongCredentials,
    /// No traffic within the allowed time.
    Timeout,
    /// A `sync` batch skipped entries the receiver has not seen.
    WrongPosition,
    /// Malformed or unexpected message.
    UnknownMessage,
    /// A pending operation was abandoned because the node shut down.
    WasDestroyed,
}

impl ErrorKind {
    /// All kinds, in wire-name order.
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::WrongProtocol,
        ErrorKind::WrongSubprotocol,
        ErrorKind::WrongCredentials,
        ErrorKind::Timeout,
        ErrorKind::WrongPosition,
        ErrorKind::UnknownMessage,
        ErrorKind::WasDestroyed,
    ];

    /// Name used in `error` messages on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::WrongProtocol => "wrong-protocol",
            ErrorKind::WrongSubprotocol => "wrong-subprotocol",
            ErrorKind::WrongCredentials => "wrong-credentials",
            ErrorKind::Timeout => "timeout",
            ErrorKind::WrongPosition => "wrong-position",
            ErrorKind::UnknownMessage => "unknown-message",
            ErrorKind::WasDestroyed => "was-destroyed",
        }
    }

    /// Parse a wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Whether the connection must be torn down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ErrorKind::UnknownMessage | ErrorKind::WasDestroyed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol error, detected locally or reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {description}")]
pub struct SyncError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub description: String,
    /// True when the peer sent this error in an `error` message.
    pub received_from_peer: bool,
}

impl SyncError {
    /// An error detected by this node.
    pub fn local(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            received_from_peer: false,
        }
    }

    /// An error reported by the peer.
    pub fn from_peer(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            received_from_peer: true,
        }
    }

    /// Whether the connection must be torn down.
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

/// Message encoding and decoding errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON encoding or parsing failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Discriminator is not a known message type.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Known message type with an invalid layout.
    #[error("malformed {kind} message: {reason}")]
    Malformed {
        /// Message type being decoded.
        kind: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}
